//! Garbage collection: mark every reference reachable from the retained
//! snapshots, then sweep unmarked block files.

use std::collections::HashSet;

use cellar_engine::{BlockEngine, BlockRef, Keys, StoreConfig};
use tracing::{debug, info};

use crate::dir;
use crate::error::SnapshotResult;
use crate::snapshot;

/// Statistics from one collection cycle.
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Number of block files examined during the sweep.
    pub blocks_scanned: usize,
    /// Number of unreachable block files removed (or, in a dry run, that
    /// would have been removed).
    pub blocks_removed: usize,
    /// Total on-disk bytes of the removed block files.
    pub bytes_reclaimed: u64,
}

/// Removes every block not reachable from the named snapshots. With no
/// names the call is a no-op: an empty retention set would sweep the whole
/// store. In dry-run mode unreachable blocks are reported but kept.
pub fn collect_garbage(
    engine: &BlockEngine,
    config: &StoreConfig,
    keys: &Keys,
    keep: &[String],
    dry_run: bool,
) -> SnapshotResult<GcStats> {
    if keep.is_empty() {
        return Ok(GcStats::default());
    }

    let mut live: HashSet<BlockRef> = HashSet::new();
    for name in keep {
        let info = snapshot::load_info(config, keys, name)?;
        engine.walk_refs(&info.dir_ref, |r| {
            live.insert(*r);
            Ok(())
        })?;
        dir::walk(engine, &info.dir_ref, |_, entry| {
            engine
                .walk_refs(&entry.reference, |r| {
                    live.insert(*r);
                    Ok(())
                })
                .map_err(Into::into)
        })?;
        debug!(snapshot = %name, live = live.len(), "marked snapshot");
    }

    let mut stats = GcStats::default();
    engine.store().scan(|reference, len| {
        stats.blocks_scanned += 1;
        if live.contains(&reference) {
            return Ok(());
        }
        stats.blocks_removed += 1;
        stats.bytes_reclaimed += len;
        if dry_run {
            info!(%reference, "unused block");
        } else {
            info!(%reference, "removing unused block");
            engine.store().remove(&reference)?;
        }
        Ok(())
    })?;
    info!(
        scanned = stats.blocks_scanned,
        removed = stats.blocks_removed,
        bytes = stats.bytes_reclaimed,
        dry_run,
        "collection complete"
    );
    Ok(stats)
}
