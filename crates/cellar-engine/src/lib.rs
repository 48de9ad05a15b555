#![warn(missing_docs)]

//! Cellar block engine: content-addressed, encrypted, deduplicating block
//! storage.
//!
//! Write path: stream → fixed-size chunks → keyed BLAKE2b reference →
//! dedup → Snappy → pad → secretbox → disk. An arbitrarily long stream
//! collapses to one root reference through a tree of pointer blocks built
//! from the same pipeline.
//!
//! Read path: disk → secretbox open → Snappy → reference verification →
//! stream.

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod reader;
pub mod reference;
pub mod store;
pub mod writer;

pub use codec::BlockKind;
pub use config::{StoreConfig, DEFAULT_BLOCK_SIZE, DEFAULT_PAD_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
pub use engine::BlockEngine;
pub use error::{EngineError, EngineResult};
pub use keys::{generate_key_file, Keys, SecretKey, KEY_FILE_LEN};
pub use reader::StreamReader;
pub use reference::{BlockRef, RefHasher, REF_HEX_LEN, REF_LEN};
pub use store::BlockStore;
pub use writer::StreamWriter;
