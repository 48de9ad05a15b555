//! Block references and the keyed hash that mints them.
//!
//! A [`BlockRef`] is a 24-byte BLAKE2b MAC over a block's uncompressed
//! payload. It doubles as the block's file name, so equality is
//! constant-time: references are MAC outputs and a timing oracle on
//! comparison would leak key material.

use std::fmt;

use blake2::digest::consts::U24;
use blake2::digest::Mac;
use blake2::Blake2bMac;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;

use crate::error::{EngineError, EngineResult};
use crate::keys::SecretKey;

/// Length of a reference in bytes.
pub const REF_LEN: usize = 24;

/// Length of a hex-encoded reference.
pub const REF_HEX_LEN: usize = 2 * REF_LEN;

/// Personalisation string baked into the on-disk block format. Changing it
/// invalidates every reference in every existing store.
const REF_PERSONALIZATION: &[u8] = b"hesfic";

type RefMac = Blake2bMac<U24>;

/// Content identifier of a stored block: a 24-byte keyed BLAKE2b MAC over
/// the block's uncompressed payload. Serialises as 48 lowercase hex chars.
#[derive(Debug, Clone, Copy, Hash)]
pub struct BlockRef([u8; REF_LEN]);

impl BlockRef {
    /// Builds a reference from raw bytes. Fails unless exactly 24 bytes.
    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        let raw: [u8; REF_LEN] = bytes
            .try_into()
            .map_err(|_| EngineError::BadReference(format!("{} raw bytes", bytes.len())))?;
        Ok(Self(raw))
    }

    /// Decodes a reference from 48 hex characters.
    pub fn from_hex(hex_bytes: &[u8]) -> EngineResult<Self> {
        if hex_bytes.len() != REF_HEX_LEN {
            return Err(EngineError::BadReference(
                String::from_utf8_lossy(hex_bytes).into_owned(),
            ));
        }
        let mut raw = [0u8; REF_LEN];
        hex::decode_to_slice(hex_bytes, &mut raw).map_err(|_| {
            EngineError::BadReference(String::from_utf8_lossy(hex_bytes).into_owned())
        })?;
        Ok(Self(raw))
    }

    /// Returns the reference as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; REF_LEN] {
        &self.0
    }
}

impl PartialEq for BlockRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for BlockRef {}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for BlockRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlockRef::from_hex(s.as_bytes()).map_err(D::Error::custom)
    }
}

/// Keyed hash that computes references. Holds a keyed prototype so per-block
/// hashing clones instead of re-deriving the key schedule.
#[derive(Clone)]
pub struct RefHasher {
    proto: RefMac,
}

impl RefHasher {
    /// Creates a hasher keyed with the store's reference MAC key.
    pub fn new(key: &SecretKey) -> EngineResult<Self> {
        let proto = RefMac::new_with_salt_and_personal(key.as_bytes(), &[], REF_PERSONALIZATION)
            .map_err(|_| {
                EngineError::InvalidConfig("reference hash key must be 32 bytes".into())
            })?;
        Ok(Self { proto })
    }

    /// Computes the reference for a payload.
    pub fn compute(&self, data: &[u8]) -> BlockRef {
        let mut mac = self.proto.clone();
        mac.update(data);
        let out = mac.finalize().into_bytes();
        let mut raw = [0u8; REF_LEN];
        raw.copy_from_slice(&out);
        BlockRef(raw)
    }
}
