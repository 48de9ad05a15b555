//! The block engine: configured cipher, keyed hasher and store in one
//! place, and the factory for stream writers, readers and reference walks.

use crypto_secretbox::XSalsa20Poly1305;

use crate::codec::{block_cipher, BlockKind};
use crate::config::StoreConfig;
use crate::error::{EngineError, EngineResult};
use crate::keys::Keys;
use crate::reader::StreamReader;
use crate::reference::{BlockRef, RefHasher};
use crate::store::BlockStore;
use crate::writer::StreamWriter;

/// Handle to one block store: owns the on-disk store plus the keyed-hash
/// and cipher instances shared by every writer and reader created from it.
pub struct BlockEngine {
    pub(crate) store: BlockStore,
    pub(crate) hasher: RefHasher,
    pub(crate) cipher: XSalsa20Poly1305,
    pub(crate) block_size: usize,
    pub(crate) pad_size: usize,
}

impl BlockEngine {
    /// Creates an engine for the given configuration and keys. The
    /// configuration is validated first.
    pub fn new(config: StoreConfig, keys: &Keys) -> EngineResult<Self> {
        let config = config.validated()?;
        Ok(Self {
            store: BlockStore::new(config.blocks_path(), config.file_sync),
            hasher: RefHasher::new(&keys.ref_hash)?,
            cipher: block_cipher(&keys.block_enc),
            block_size: config.block_size,
            pad_size: config.pad_size,
        })
    }

    /// Creates a writer for one logical stream.
    pub fn new_writer(&self) -> StreamWriter<'_> {
        StreamWriter::new(self)
    }

    /// Creates a reader positioned at the start of the stream named by
    /// `root`. Fails if the root block cannot be loaded and verified.
    pub fn new_reader(&self, root: &BlockRef) -> EngineResult<StreamReader<'_>> {
        StreamReader::open(self, *root)
    }

    /// Invokes `callback` with every reference transitively reachable from
    /// `root`, the root itself first, then each pointer layer's children in
    /// discovery order. A reference reached through two parents is yielded
    /// twice; callers wanting a live set deduplicate with a set.
    pub fn walk_refs(
        &self,
        root: &BlockRef,
        mut callback: impl FnMut(&BlockRef) -> EngineResult<()>,
    ) -> EngineResult<()> {
        let mut r = StreamReader::new_unloaded(self, *root);
        r.load_block()?;
        callback(root)?;
        while r.kind() == BlockKind::Pointer {
            let layer = r.next_layer()?;
            if layer.is_empty() {
                return Err(EngineError::CorruptPayload {
                    reason: "empty pointer layer".into(),
                });
            }
            for child in &layer {
                callback(child)?;
            }
            r.set_pending(layer);
            r.load_block()?;
        }
        Ok(())
    }

    /// The underlying content-addressed store.
    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    /// The store-wide chunk size in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The store-wide on-disk alignment unit in bytes.
    pub fn pad_size(&self) -> usize {
        self.pad_size
    }
}
