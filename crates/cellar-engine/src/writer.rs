//! Stream writer: chunk, hash, dedup, encode and build the pointer tree.

use std::io::Read;

use tracing::trace;

use crate::codec::{encode_block, BlockKind};
use crate::engine::BlockEngine;
use crate::error::EngineResult;
use crate::reference::BlockRef;

/// Splits a byte stream into fixed-size blocks and collapses the whole
/// stream to a single root reference.
///
/// Every full buffer is flushed as one block: the reference is the keyed
/// hash over the uncompressed bytes, and a block whose reference already
/// exists on disk skips the codec entirely. `finish` then feeds the
/// accumulated references back through the same write path as pointer
/// blocks until one root remains.
pub struct StreamWriter<'e> {
    engine: &'e BlockEngine,
    buf: Vec<u8>,
    refs: Vec<BlockRef>,
    kind: BlockKind,
    block_count: usize,
}

impl<'e> StreamWriter<'e> {
    pub(crate) fn new(engine: &'e BlockEngine) -> Self {
        Self {
            engine,
            buf: Vec::with_capacity(engine.block_size),
            refs: Vec::new(),
            kind: BlockKind::Data,
            block_count: 0,
        }
    }

    /// Appends bytes to the stream, flushing a block each time the buffer
    /// fills exactly. A partially filled buffer stays pending.
    pub fn write(&mut self, mut bytes: &[u8]) -> EngineResult<usize> {
        let total = bytes.len();
        loop {
            let left = self.engine.block_size - self.buf.len();
            if bytes.len() < left {
                self.buf.extend_from_slice(bytes);
                return Ok(total);
            }
            self.buf.extend_from_slice(&bytes[..left]);
            bytes = &bytes[left..];
            self.save_block()?;
        }
    }

    /// Drains `reader` into the stream, flushing on every fill and once
    /// more at end-of-input if bytes are still buffered. Returns the number
    /// of bytes consumed.
    pub fn read_from(&mut self, reader: &mut impl Read) -> EngineResult<u64> {
        let mut total = 0u64;
        loop {
            let want = (self.engine.block_size - self.buf.len()) as u64;
            let n = (&mut *reader).take(want).read_to_end(&mut self.buf)? as u64;
            total += n;
            if self.buf.len() == self.engine.block_size {
                self.save_block()?;
                continue;
            }
            if !self.buf.is_empty() {
                self.save_block()?;
            }
            return Ok(total);
        }
    }

    /// Closes out the stream and returns the root reference. An empty
    /// stream still produces one empty data block, so the root is always
    /// well defined. The writer is reset and reusable afterwards.
    pub fn finish(&mut self) -> EngineResult<BlockRef> {
        if !self.buf.is_empty() || self.refs.is_empty() {
            self.save_block()?;
        }
        let root = self.save_pointers()?;
        self.kind = BlockKind::Data;
        self.refs.clear();
        Ok(root)
    }

    /// Number of data blocks flushed so far. Pointer blocks written during
    /// `finish` are not counted. Not reset by `finish`.
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    fn save_block(&mut self) -> EngineResult<()> {
        let reference = self.engine.hasher.compute(&self.buf);
        if self.engine.store.has(&reference) {
            trace!(reference = %reference, "dedup hit");
        } else {
            let block = encode_block(
                &self.engine.cipher,
                self.engine.pad_size,
                self.kind,
                &self.buf,
            )?;
            self.engine.store.put(&reference, &block)?;
        }
        self.refs.push(reference);
        self.buf.clear();
        if self.kind == BlockKind::Data {
            self.block_count += 1;
        }
        Ok(())
    }

    /// Collapses the accumulated references to a single root by writing
    /// each layer's concatenated references back through the write path as
    /// pointer blocks. A layer larger than one block is chunked, hashed and
    /// deduplicated like any other stream.
    fn save_pointers(&mut self) -> EngineResult<BlockRef> {
        self.kind = BlockKind::Pointer;
        while self.refs.len() > 1 {
            let layer = std::mem::take(&mut self.refs);
            for reference in &layer {
                self.write(reference.as_bytes())?;
            }
            if !self.buf.is_empty() {
                self.save_block()?;
            }
        }
        Ok(self.refs[0])
    }
}

impl std::io::Write for StreamWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(StreamWriter::write(self, buf)?)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
