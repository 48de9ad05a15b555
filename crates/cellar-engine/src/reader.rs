//! Stream reader: walk the pointer tree and yield the original bytes.

use std::collections::VecDeque;
use std::io::Write;

use crate::codec::{decode_block, BlockKind};
use crate::engine::BlockEngine;
use crate::error::{EngineError, EngineResult};
use crate::reference::{BlockRef, REF_LEN};

/// Reads a stream back from its root reference.
///
/// Construction descends the pointer tree to the first data block; `read`
/// then drains data blocks in order. Every loaded block is decoded and its
/// keyed hash recomputed against the reference it was fetched under, so a
/// mis-routed or swapped block file fails instead of yielding wrong bytes.
pub struct StreamReader<'e> {
    engine: &'e BlockEngine,
    block: Vec<u8>,
    pos: usize,
    kind: BlockKind,
    refs: VecDeque<BlockRef>,
    file_buf: Vec<u8>,
}

impl<'e> StreamReader<'e> {
    pub(crate) fn new_unloaded(engine: &'e BlockEngine, root: BlockRef) -> Self {
        Self {
            engine,
            block: Vec::new(),
            pos: 0,
            kind: BlockKind::Data,
            refs: VecDeque::from([root]),
            file_buf: Vec::new(),
        }
    }

    pub(crate) fn open(engine: &'e BlockEngine, root: BlockRef) -> EngineResult<Self> {
        let mut r = Self::new_unloaded(engine, root);
        r.load_block()?;
        r.descend()?;
        Ok(r)
    }

    /// Descends pointer layers until a data block is current.
    fn descend(&mut self) -> EngineResult<()> {
        while self.kind == BlockKind::Pointer {
            let layer = self.next_layer()?;
            if layer.is_empty() {
                return Err(EngineError::CorruptPayload {
                    reason: "empty pointer layer".into(),
                });
            }
            self.refs = layer.into();
            self.load_block()?;
        }
        Ok(())
    }

    /// Fills `out` from the stream, spanning block boundaries. Returns the
    /// number of bytes read; fewer than `out.len()` only at end of stream.
    pub fn read(&mut self, out: &mut [u8]) -> EngineResult<usize> {
        let mut nn = 0;
        while nn < out.len() {
            if self.pos == self.block.len() {
                if self.refs.is_empty() {
                    break;
                }
                self.load_block()?;
                if self.kind != BlockKind::Data {
                    return Err(EngineError::CorruptPayload {
                        reason: "pointer block inside a data layer".into(),
                    });
                }
            }
            let take = (out.len() - nn).min(self.block.len() - self.pos);
            out[nn..nn + take].copy_from_slice(&self.block[self.pos..self.pos + take]);
            self.pos += take;
            nn += take;
        }
        Ok(nn)
    }

    /// Streams the remainder into `sink`. Returns the number of bytes
    /// written.
    pub fn write_to(&mut self, sink: &mut impl Write) -> EngineResult<u64> {
        let mut nn = 0u64;
        loop {
            sink.write_all(&self.block[self.pos..])?;
            nn += (self.block.len() - self.pos) as u64;
            self.pos = self.block.len();
            if self.refs.is_empty() {
                return Ok(nn);
            }
            self.load_block()?;
            if self.kind != BlockKind::Data {
                return Err(EngineError::CorruptPayload {
                    reason: "pointer block inside a data layer".into(),
                });
            }
        }
    }

    pub(crate) fn kind(&self) -> BlockKind {
        self.kind
    }

    pub(crate) fn set_pending(&mut self, refs: Vec<BlockRef>) {
        self.refs = refs.into();
    }

    /// Loads the next pending block, verifying its content hash against the
    /// reference it is fetched under.
    pub(crate) fn load_block(&mut self) -> EngineResult<()> {
        let reference = self.refs.pop_front().ok_or_else(|| EngineError::CorruptPayload {
            reason: "no pending references".into(),
        })?;
        self.engine.store.get(&reference, &mut self.file_buf)?;
        let (kind, payload) = decode_block(&self.engine.cipher, &reference, &self.file_buf)?;
        let actual = self.engine.hasher.compute(&payload);
        if actual != reference {
            return Err(EngineError::ReferenceMismatch {
                expected: reference,
                actual,
            });
        }
        self.kind = kind;
        self.block = payload;
        self.pos = 0;
        Ok(())
    }

    /// Parses the current pointer layer into its child references. The
    /// layer's references are drained as a byte stream across the layer's
    /// blocks, since a reference may straddle two adjacent blocks.
    pub(crate) fn next_layer(&mut self) -> EngineResult<Vec<BlockRef>> {
        let mut layer = Vec::new();
        let mut raw = [0u8; REF_LEN];
        loop {
            match self.fill_ref_bytes(&mut raw)? {
                0 => break,
                REF_LEN => layer.push(BlockRef::from_bytes(&raw)?),
                n => {
                    return Err(EngineError::CorruptPayload {
                        reason: format!("pointer layer ends with {n} trailing bytes"),
                    })
                }
            }
        }
        Ok(layer)
    }

    /// Reads up to 24 bytes of reference material, crossing into the
    /// layer's next block when the current one runs out.
    fn fill_ref_bytes(&mut self, raw: &mut [u8; REF_LEN]) -> EngineResult<usize> {
        let mut n = 0;
        while n < REF_LEN {
            if self.pos == self.block.len() {
                if self.refs.is_empty() {
                    break;
                }
                self.load_block()?;
                if self.kind != BlockKind::Pointer {
                    return Err(EngineError::CorruptPayload {
                        reason: "data block inside a pointer layer".into(),
                    });
                }
            }
            let take = (REF_LEN - n).min(self.block.len() - self.pos);
            raw[n..n + take].copy_from_slice(&self.block[self.pos..self.pos + take]);
            self.pos += take;
            n += take;
        }
        Ok(n)
    }
}

impl std::io::Read for StreamReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(StreamReader::read(self, buf)?)
    }
}
