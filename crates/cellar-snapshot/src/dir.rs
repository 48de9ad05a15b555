//! Directory trees serialised through the block engine.
//!
//! A directory becomes a JSON listing of entries, itself written as a
//! stream; each file entry carries the root reference of the file's
//! contents, each subdirectory entry the reference of its own listing.

use std::fs::{File, FileTimes, OpenOptions};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use cellar_engine::{BlockEngine, BlockRef};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SnapshotResult;

/// One entry of a directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    /// File or directory name, without path.
    pub name: String,
    /// Size in bytes at save time.
    pub size: u64,
    /// Modification time as seconds since the Unix epoch.
    pub modified_secs: u64,
    /// Permission bits.
    pub mode: u32,
    /// Whether this entry is a directory.
    pub is_dir: bool,
    /// Root reference of the file contents, or of the subdirectory listing.
    pub reference: BlockRef,
}

fn modified_secs(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Stores one file's contents and returns its entry.
fn save_file(engine: &BlockEngine, path: &Path) -> SnapshotResult<DirEntry> {
    let meta = std::fs::metadata(path)?;
    let mut f = File::open(path)?;
    let mut w = engine.new_writer();
    w.read_from(&mut f)?;
    let reference = w.finish()?;
    info!(blocks = w.block_count(), path = %path.display(), "stored file");
    Ok(DirEntry {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size: meta.len(),
        modified_secs: modified_secs(&meta),
        mode: meta.permissions().mode() & 0o7777,
        is_dir: false,
        reference,
    })
}

/// Stores a directory tree depth-first and returns the entry for the
/// directory itself. Children are listed in name order so identical trees
/// serialise identically and their listing blocks deduplicate.
pub fn save_directory(engine: &BlockEngine, dir_path: &Path) -> SnapshotResult<DirEntry> {
    let meta = std::fs::metadata(dir_path)?;
    let mut children: Vec<PathBuf> = std::fs::read_dir(dir_path)?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    children.sort();

    let mut entries = Vec::with_capacity(children.len());
    for child in &children {
        let entry = if std::fs::metadata(child)?.is_dir() {
            save_directory(engine, child)?
        } else {
            save_file(engine, child)?
        };
        entries.push(entry);
    }

    let mut w = engine.new_writer();
    serde_json::to_writer(&mut w, &entries)?;
    let reference = w.finish()?;
    info!(blocks = w.block_count(), path = %dir_path.display(), %reference, "stored directory");
    Ok(DirEntry {
        name: dir_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size: meta.len(),
        modified_secs: modified_secs(&meta),
        mode: meta.permissions().mode() & 0o7777,
        is_dir: true,
        reference,
    })
}

/// Loads a directory listing back from its reference.
pub fn load_directory(engine: &BlockEngine, reference: &BlockRef) -> SnapshotResult<Vec<DirEntry>> {
    let reader = engine.new_reader(reference)?;
    Ok(serde_json::from_reader(reader)?)
}

/// Recreates one entry under `out_dir`. Files are created exclusively with
/// their saved mode, fsynced, and unlinked again if restoration fails
/// partway.
fn restore_entry(engine: &BlockEngine, entry: &DirEntry, out_dir: &Path) -> SnapshotResult<()> {
    let path = out_dir.join(&entry.name);
    if entry.is_dir {
        std::fs::create_dir_all(&path)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(entry.mode))?;
    } else {
        let mut r = engine.new_reader(&entry.reference)?;
        let mut f = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(entry.mode)
            .open(&path)?;
        if let Err(e) = fill_restored_file(&mut r, &mut f, entry.modified_secs) {
            drop(f);
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }
    }
    debug!(path = %path.display(), "restored");
    Ok(())
}

fn fill_restored_file(
    r: &mut cellar_engine::StreamReader<'_>,
    f: &mut File,
    modified_secs: u64,
) -> SnapshotResult<()> {
    r.write_to(f)?;
    f.sync_all()?;
    let mtime = UNIX_EPOCH + Duration::from_secs(modified_secs);
    f.set_times(FileTimes::new().set_modified(mtime))?;
    Ok(())
}

/// Restores a directory listing and everything below it into `out_dir`.
pub fn restore_directory(
    engine: &BlockEngine,
    reference: &BlockRef,
    out_dir: &Path,
) -> SnapshotResult<()> {
    std::fs::create_dir_all(out_dir)?;
    for entry in load_directory(engine, reference)? {
        restore_entry(engine, &entry, out_dir)?;
        if entry.is_dir {
            restore_directory(engine, &entry.reference, &out_dir.join(&entry.name))?;
        }
    }
    Ok(())
}

fn walk_inner(
    engine: &BlockEngine,
    reference: &BlockRef,
    base: &Path,
    callback: &mut dyn FnMut(&Path, &DirEntry) -> SnapshotResult<()>,
) -> SnapshotResult<()> {
    for entry in load_directory(engine, reference)? {
        let path = base.join(&entry.name);
        callback(&path, &entry)?;
        if entry.is_dir {
            walk_inner(engine, &entry.reference, &path, callback)?;
        }
    }
    Ok(())
}

/// Invokes `callback` for every entry reachable from a directory listing,
/// with the entry's path relative to the listing root.
pub fn walk(
    engine: &BlockEngine,
    reference: &BlockRef,
    mut callback: impl FnMut(&Path, &DirEntry) -> SnapshotResult<()>,
) -> SnapshotResult<()> {
    walk_inner(engine, reference, Path::new(""), &mut callback)
}

/// Streams every file below a directory listing to a sink, which exercises
/// block decryption and reference verification for the whole tree.
pub fn verify_directory(engine: &BlockEngine, reference: &BlockRef) -> SnapshotResult<()> {
    walk(engine, reference, |path, entry| {
        if entry.is_dir {
            debug!(path = %path.display(), "verified directory");
        } else {
            let mut r = engine.new_reader(&entry.reference)?;
            r.write_to(&mut std::io::sink())?;
            debug!(path = %path.display(), "verified file");
        }
        Ok(())
    })
}
