//! End-to-end snapshot scenarios: tree fidelity on restore, and garbage
//! collection keeping every reachable block.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use cellar_engine::{BlockEngine, Keys, SecretKey, StoreConfig};

fn store_at(dir: &Path) -> (BlockEngine, StoreConfig, Keys) {
    let keys = Keys {
        ref_hash: SecretKey::from_bytes([0x77; 32]),
        block_enc: SecretKey::from_bytes([0x88; 32]),
        snapshot_enc: SecretKey::from_bytes([0x99; 32]),
    };
    let mut config = StoreConfig::new(dir);
    config.block_size = 65536;
    let engine = BlockEngine::new(config.clone(), &keys).unwrap();
    let config = config.validated().unwrap();
    config.make_paths().unwrap();
    (engine, config, keys)
}

fn build_tree(root: &Path) {
    std::fs::create_dir_all(root.join("sub/deeper")).unwrap();
    std::fs::write(root.join("top.txt"), b"top level file").unwrap();
    std::fs::write(root.join("sub/mid.bin"), vec![0xA5u8; 70_000]).unwrap();
    std::fs::write(root.join("sub/deeper/leaf"), b"").unwrap();
    std::fs::set_permissions(
        root.join("top.txt"),
        std::fs::Permissions::from_mode(0o600),
    )
    .unwrap();
}

fn stored_blocks(engine: &BlockEngine) -> usize {
    let mut n = 0;
    engine
        .store()
        .scan(|_, _| {
            n += 1;
            Ok(())
        })
        .unwrap();
    n
}

#[test]
fn snapshot_restore_preserves_the_tree() {
    let store = tempfile::tempdir().unwrap();
    let src = tempfile::tempdir().unwrap();
    build_tree(src.path());
    let (engine, config, keys) = store_at(store.path());

    let name = cellar_snapshot::create(&engine, &config, &keys, src.path(), "first").unwrap();
    assert!(cellar_snapshot::is_valid_name(&name));
    assert_eq!(cellar_snapshot::list_names(&config).unwrap(), vec![name.clone()]);

    let info = cellar_snapshot::load_info(&config, &keys, &name).unwrap();
    assert_eq!(info.comment, "first");

    let out = tempfile::tempdir().unwrap();
    cellar_snapshot::restore(&engine, &config, &keys, &name, out.path()).unwrap();

    assert_eq!(
        std::fs::read(out.path().join("top.txt")).unwrap(),
        b"top level file"
    );
    assert_eq!(
        std::fs::read(out.path().join("sub/mid.bin")).unwrap(),
        vec![0xA5u8; 70_000]
    );
    assert_eq!(
        std::fs::read(out.path().join("sub/deeper/leaf")).unwrap(),
        b""
    );
    let mode = std::fs::metadata(out.path().join("top.txt"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);

    cellar_snapshot::verify(&engine, &config, &keys, &name).unwrap();
}

#[test]
fn gc_keeps_reachable_blocks_and_removes_orphans() {
    let store = tempfile::tempdir().unwrap();
    let (engine, config, keys) = store_at(store.path());

    let keep_src = tempfile::tempdir().unwrap();
    std::fs::write(keep_src.path().join("kept.txt"), b"kept content").unwrap();
    let kept = cellar_snapshot::create(&engine, &config, &keys, keep_src.path(), "").unwrap();

    let drop_src = tempfile::tempdir().unwrap();
    std::fs::write(drop_src.path().join("dropped.txt"), b"orphaned content").unwrap();
    let dropped = cellar_snapshot::create(&engine, &config, &keys, drop_src.path(), "").unwrap();

    let before = stored_blocks(&engine);
    std::fs::remove_file(config.snapshots_path().join(&dropped)).unwrap();

    // Dry run changes nothing.
    let stats =
        cellar_snapshot::collect_garbage(&engine, &config, &keys, &[kept.clone()], true).unwrap();
    assert!(stats.blocks_removed > 0);
    assert_eq!(stored_blocks(&engine), before);

    // The real sweep removes only the dropped snapshot's blocks.
    let stats =
        cellar_snapshot::collect_garbage(&engine, &config, &keys, &[kept.clone()], false).unwrap();
    assert!(stats.blocks_removed > 0);
    assert!(stats.bytes_reclaimed > 0);
    assert_eq!(stored_blocks(&engine), before - stats.blocks_removed);

    // The retained snapshot still restores and verifies.
    cellar_snapshot::verify(&engine, &config, &keys, &kept).unwrap();
    let out = tempfile::tempdir().unwrap();
    cellar_snapshot::restore(&engine, &config, &keys, &kept, out.path()).unwrap();
    assert_eq!(
        std::fs::read(out.path().join("kept.txt")).unwrap(),
        b"kept content"
    );
}

#[test]
fn gc_without_retained_snapshots_is_a_noop() {
    let store = tempfile::tempdir().unwrap();
    let (engine, config, keys) = store_at(store.path());

    let src = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("a.txt"), b"content").unwrap();
    cellar_snapshot::create(&engine, &config, &keys, src.path(), "").unwrap();

    let before = stored_blocks(&engine);
    let stats = cellar_snapshot::collect_garbage(&engine, &config, &keys, &[], false).unwrap();
    assert_eq!(stats.blocks_scanned, 0);
    assert_eq!(stored_blocks(&engine), before);
}
