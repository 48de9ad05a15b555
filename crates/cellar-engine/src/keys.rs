//! Secret key material and the on-disk key file.
//!
//! The key file is exactly 96 bytes: the reference MAC key, the block
//! encryption key and the snapshot encryption key, 32 bytes each, in that
//! order.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{EngineError, EngineResult};

/// Total length of the key file in bytes.
pub const KEY_FILE_LEN: usize = 96;

/// A 256-bit secret key. Zeroed on drop, redacted in debug output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Wraps raw key material.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// The three store keys loaded from the key file.
#[derive(Clone, Debug)]
pub struct Keys {
    /// MAC key for block references.
    pub ref_hash: SecretKey,
    /// Block encryption key.
    pub block_enc: SecretKey,
    /// Snapshot index encryption key. Not consumed by the engine itself.
    pub snapshot_enc: SecretKey,
}

impl Keys {
    /// Splits a 96-byte key file image into the three keys.
    pub fn from_raw(raw: &[u8; KEY_FILE_LEN]) -> Self {
        let mut part = [0u8; 32];
        part.copy_from_slice(&raw[0..32]);
        let ref_hash = SecretKey::from_bytes(part);
        part.copy_from_slice(&raw[32..64]);
        let block_enc = SecretKey::from_bytes(part);
        part.copy_from_slice(&raw[64..96]);
        let snapshot_enc = SecretKey::from_bytes(part);
        part.zeroize();
        Self {
            ref_hash,
            block_enc,
            snapshot_enc,
        }
    }

    /// Loads the key file. Fails unless it is exactly 96 bytes.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let mut data = std::fs::read(path)?;
        if data.len() != KEY_FILE_LEN {
            data.zeroize();
            return Err(EngineError::InvalidConfig(format!(
                "key file {} must be {} bytes, got {}",
                path.display(),
                KEY_FILE_LEN,
                data.len()
            )));
        }
        let mut raw = [0u8; KEY_FILE_LEN];
        raw.copy_from_slice(&data);
        data.zeroize();
        let keys = Self::from_raw(&raw);
        raw.zeroize();
        Ok(keys)
    }
}

/// Generates a fresh key file with random contents, refusing to overwrite
/// an existing one. The file is created read-only for the owner and synced
/// before close: losing these 96 bytes loses every backup.
pub fn generate_key_file(path: &Path) -> EngineResult<()> {
    let mut buf = [0u8; KEY_FILE_LEN];
    rand::thread_rng().fill_bytes(&mut buf);

    let mut f: File = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o400)
        .open(path)?;
    let res = f.write_all(&buf).and_then(|_| f.sync_all());
    buf.zeroize();
    res?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_partitions_in_order() {
        let mut raw = [0u8; KEY_FILE_LEN];
        raw[0] = 1;
        raw[32] = 2;
        raw[64] = 3;
        let keys = Keys::from_raw(&raw);
        assert_eq!(keys.ref_hash.as_bytes()[0], 1);
        assert_eq!(keys.block_enc.as_bytes()[0], 2);
        assert_eq!(keys.snapshot_enc.as_bytes()[0], 3);
    }

    #[test]
    fn debug_is_redacted() {
        let key = SecretKey::from_bytes([0xAA; 32]);
        let s = format!("{key:?}");
        assert!(!s.contains("170"));
        assert!(s.contains("REDACTED"));
    }

    #[test]
    fn generate_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys");
        generate_key_file(&path).unwrap();
        let keys = Keys::load(&path).unwrap();
        assert_ne!(keys.ref_hash.as_bytes(), keys.block_enc.as_bytes());
    }

    #[test]
    fn generate_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys");
        generate_key_file(&path).unwrap();
        assert!(generate_key_file(&path).is_err());
    }

    #[test]
    fn load_rejects_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys");
        std::fs::write(&path, [0u8; 95]).unwrap();
        assert!(matches!(
            Keys::load(&path),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
