//! Content-addressed on-disk block store.
//!
//! A block with hex reference `h` lives at `<blocks>/<h[0:2]>/<h[2:48]>`;
//! the two-character shard directory caps per-directory entry counts.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::EngineResult;
use crate::reference::{BlockRef, REF_HEX_LEN};

/// File-backed block store keyed by reference.
#[derive(Debug)]
pub struct BlockStore {
    blocks_path: PathBuf,
    file_sync: bool,
}

impl BlockStore {
    /// Creates a store rooted at the given blocks directory.
    pub fn new(blocks_path: PathBuf, file_sync: bool) -> Self {
        Self {
            blocks_path,
            file_sync,
        }
    }

    /// On-disk path for a reference.
    pub fn path_for(&self, reference: &BlockRef) -> PathBuf {
        let hex = reference.to_hex();
        self.blocks_path.join(&hex[..2]).join(&hex[2..])
    }

    /// Stores a block. An already existing file is a success without a
    /// write: the filename is a MAC over the plaintext, so the existing
    /// content is the same payload. A partial write is unlinked before the
    /// error propagates.
    pub fn put(&self, reference: &BlockRef, bytes: &[u8]) -> EngineResult<()> {
        let path = self.path_for(reference);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o444)
            .open(&path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(reference = %reference, "block already stored");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = self.write_block(&mut f, bytes) {
            drop(f);
            let _ = std::fs::remove_file(&path);
            return Err(e.into());
        }
        debug!(reference = %reference, len = bytes.len(), "stored block");
        Ok(())
    }

    fn write_block(&self, f: &mut File, bytes: &[u8]) -> std::io::Result<()> {
        f.write_all(bytes)?;
        if self.file_sync {
            f.sync_all()?;
        }
        Ok(())
    }

    /// Existence check by `stat` alone; contents are not re-verified here.
    /// Callers needing verification read the block back through a reader.
    pub fn has(&self, reference: &BlockRef) -> bool {
        self.path_for(reference).exists()
    }

    /// Reads the whole block file into `buf` (cleared first). Returns the
    /// number of bytes read.
    pub fn get(&self, reference: &BlockRef, buf: &mut Vec<u8>) -> EngineResult<usize> {
        let mut f = File::open(self.path_for(reference))?;
        buf.clear();
        let n = f.read_to_end(buf)?;
        Ok(n)
    }

    /// Unlinks a block file. Used only by the garbage collector.
    pub fn remove(&self, reference: &BlockRef) -> EngineResult<()> {
        std::fs::remove_file(self.path_for(reference))?;
        Ok(())
    }

    /// Enumerates every stored block as `(reference, file length)`.
    /// Directories that are not two-character shards, and files whose names
    /// do not decode as references, are skipped.
    pub fn scan(
        &self,
        mut f: impl FnMut(BlockRef, u64) -> EngineResult<()>,
    ) -> EngineResult<()> {
        for shard in std::fs::read_dir(&self.blocks_path)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            let prefix = shard.file_name();
            let Some(prefix) = prefix.to_str() else {
                continue;
            };
            if prefix.len() != 2 {
                continue;
            }
            for entry in std::fs::read_dir(shard.path())? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                let mut hex = String::with_capacity(REF_HEX_LEN);
                hex.push_str(prefix);
                hex.push_str(name);
                let Ok(reference) = BlockRef::from_hex(hex.as_bytes()) else {
                    continue;
                };
                f(reference, entry.metadata()?.len())?;
            }
        }
        Ok(())
    }

    /// The blocks directory this store is rooted at.
    pub fn blocks_path(&self) -> &Path {
        &self.blocks_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SecretKey;
    use crate::reference::RefHasher;

    fn store(dir: &Path) -> BlockStore {
        BlockStore::new(dir.join("blocks"), false)
    }

    fn some_ref(seed: &[u8]) -> BlockRef {
        RefHasher::new(&SecretKey::from_bytes([1u8; 32]))
            .unwrap()
            .compute(seed)
    }

    #[test]
    fn put_get_has_remove() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let r = some_ref(b"block one");

        assert!(!s.has(&r));
        s.put(&r, b"stored bytes").unwrap();
        assert!(s.has(&r));

        let mut buf = Vec::new();
        let n = s.get(&r, &mut buf).unwrap();
        assert_eq!(n, 12);
        assert_eq!(buf, b"stored bytes");

        s.remove(&r).unwrap();
        assert!(!s.has(&r));
    }

    #[test]
    fn path_is_sharded_by_hex_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let r = some_ref(b"sharded");
        let hex = r.to_hex();
        let path = s.path_for(&r);
        assert!(path.ends_with(PathBuf::from(&hex[..2]).join(&hex[2..])));
    }

    #[test]
    fn double_put_is_dedup_success() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let r = some_ref(b"dup");
        s.put(&r, b"first").unwrap();
        s.put(&r, b"first").unwrap();
        let mut buf = Vec::new();
        s.get(&r, &mut buf).unwrap();
        assert_eq!(buf, b"first");
    }

    #[test]
    fn stored_files_are_read_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let r = some_ref(b"ro");
        s.put(&r, b"bytes").unwrap();
        let mode = std::fs::metadata(s.path_for(&r)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o444);
    }

    #[test]
    fn scan_skips_foreign_entries() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let r1 = some_ref(b"one");
        let r2 = some_ref(b"two");
        s.put(&r1, b"aaaa").unwrap();
        s.put(&r2, b"bbbbbbbb").unwrap();

        // Not a shard; must be skipped.
        std::fs::create_dir_all(s.blocks_path().join("tmpdir")).unwrap();
        std::fs::write(s.blocks_path().join("tmpdir").join("junk"), b"x").unwrap();
        // Shard-shaped directory holding a file that is not a reference.
        std::fs::create_dir_all(s.blocks_path().join("zz")).unwrap();
        std::fs::write(s.blocks_path().join("zz").join("notaref"), b"x").unwrap();

        let mut seen = Vec::new();
        s.scan(|r, len| {
            seen.push((r, len));
            Ok(())
        })
        .unwrap();
        seen.sort_by_key(|(r, _)| r.to_hex());
        let mut expect = vec![(r1, 4u64), (r2, 8u64)];
        expect.sort_by_key(|(r, _)| r.to_hex());
        assert_eq!(seen, expect);
    }
}
