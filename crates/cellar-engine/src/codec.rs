//! Block codec: compress, pad and seal one block, and the inverse.
//!
//! Plaintext layout before sealing:
//!
//! ```text
//! offset 0      1 byte   kind
//! offset 1..5   4 bytes  big-endian compressed payload length L
//! offset 5..5+L          Snappy-compressed payload
//! offset 5+L..P          zero padding
//! ```
//!
//! The padded length P is chosen so the on-disk file (24-byte nonce plus
//! ciphertext with its 16-byte tag) is a multiple of the store's pad size.
//! Padding hides the true compressed size; the header sits inside the
//! encryption envelope so kind and length are authenticated too.

use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Nonce, XSalsa20Poly1305};
use rand::RngCore;

use crate::error::{EngineError, EngineResult};
use crate::keys::SecretKey;
use crate::reference::BlockRef;

/// Nonce length of the block cipher.
pub const NONCE_SIZE: usize = 24;

/// Plaintext header length: 1-byte kind plus 4-byte compressed length.
pub const HEADER_SIZE: usize = 5;

/// Authenticator overhead of the block cipher.
pub const TAG_SIZE: usize = 16;

/// Smallest on-disk length that can hold a nonce and a header.
pub const MIN_BOX_SIZE: usize = NONCE_SIZE + HEADER_SIZE;

/// The two kinds of block the engine stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockKind {
    /// Payload is caller bytes.
    Data = 0,
    /// Payload is a concatenation of 24-byte child references.
    Pointer = 1,
}

impl BlockKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(BlockKind::Data),
            1 => Some(BlockKind::Pointer),
            _ => None,
        }
    }
}

/// Builds the block cipher for a 32-byte key.
pub fn block_cipher(key: &SecretKey) -> XSalsa20Poly1305 {
    XSalsa20Poly1305::new(key.as_bytes().into())
}

/// Padded plaintext length for a header-plus-compressed length of
/// `data_len`: the smallest P >= data_len such that nonce + P + tag is a
/// multiple of `pad_size`.
fn padded_len(data_len: usize, pad_size: usize) -> usize {
    let overhead = NONCE_SIZE + TAG_SIZE;
    (data_len + overhead).div_ceil(pad_size) * pad_size - overhead
}

/// Encodes one block: compress the payload, pad, seal under a fresh random
/// nonce and return the on-disk bytes (`nonce || ciphertext_with_tag`).
///
/// An empty payload is stored with L = 0 and no compression step, which
/// yields the minimum-size file.
pub fn encode_block(
    cipher: &XSalsa20Poly1305,
    pad_size: usize,
    kind: BlockKind,
    payload: &[u8],
) -> EngineResult<Vec<u8>> {
    let compressed = if payload.is_empty() {
        Vec::new()
    } else {
        snap::raw::Encoder::new()
            .compress_vec(payload)
            .map_err(|e| EngineError::CorruptPayload {
                reason: format!("compression failed: {e}"),
            })?
    };

    let data_len = HEADER_SIZE + compressed.len();
    let mut plain = vec![0u8; padded_len(data_len, pad_size)];
    plain[0] = kind as u8;
    plain[1..HEADER_SIZE].copy_from_slice(&(compressed.len() as u32).to_be_bytes());
    plain[HEADER_SIZE..data_len].copy_from_slice(&compressed);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = cipher
        .encrypt(nonce, plain.as_slice())
        .map_err(|_| EngineError::CorruptPayload {
            reason: "encryption failed".into(),
        })?;

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decodes on-disk block bytes back to `(kind, payload)`. The reference is
/// used only for error reporting; content verification against it is the
/// reader's job.
pub fn decode_block(
    cipher: &XSalsa20Poly1305,
    reference: &BlockRef,
    bytes: &[u8],
) -> EngineResult<(BlockKind, Vec<u8>)> {
    if bytes.len() < MIN_BOX_SIZE {
        return Err(EngineError::ShortBlock {
            reference: *reference,
            len: bytes.len(),
        });
    }

    let nonce = Nonce::from_slice(&bytes[..NONCE_SIZE]);
    let plain = cipher
        .decrypt(nonce, &bytes[NONCE_SIZE..])
        .map_err(|_| EngineError::DecryptionFailure {
            reference: *reference,
        })?;

    if plain.len() < HEADER_SIZE {
        return Err(EngineError::CorruptPayload {
            reason: format!("decrypted block is {} bytes, shorter than its header", plain.len()),
        });
    }
    let kind = BlockKind::from_byte(plain[0]).ok_or_else(|| EngineError::CorruptPayload {
        reason: format!("unknown block kind {}", plain[0]),
    })?;
    let compressed_len = u32::from_be_bytes(plain[1..HEADER_SIZE].try_into().unwrap()) as usize;
    if HEADER_SIZE + compressed_len > plain.len() {
        return Err(EngineError::CorruptPayload {
            reason: format!(
                "declared payload length {compressed_len} exceeds decrypted block of {} bytes",
                plain.len()
            ),
        });
    }

    let payload = if compressed_len == 0 {
        Vec::new()
    } else {
        snap::raw::Decoder::new()
            .decompress_vec(&plain[HEADER_SIZE..HEADER_SIZE + compressed_len])
            .map_err(|e| EngineError::CorruptPayload {
                reason: format!("decompression failed: {e}"),
            })?
    };
    Ok((kind, payload))
}
