//! The snapshot index: labelled roots stored as encrypted files.
//!
//! Each snapshot is a small JSON record sealed under the snapshot key and
//! written to `<snapshots>/<name>`. The file name encodes the 24-byte
//! nonce as six dash-separated groups of 8 hex characters; the nonce leads
//! with a big-endian unix-nanos timestamp so names sort roughly
//! chronologically.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use cellar_engine::{BlockEngine, BlockRef, Keys, SecretKey, StoreConfig};
use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Nonce, XSalsa20Poly1305};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dir;
use crate::error::{SnapshotError, SnapshotResult};

/// Length of a snapshot name: 48 hex characters plus 5 dashes.
pub const NAME_LEN: usize = 53;

const NONCE_LEN: usize = 24;

/// Metadata stored for one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Creation time as seconds since the Unix epoch.
    pub time_secs: u64,
    /// Free-form comment; omitted from the record when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    /// Absolute path the snapshot was taken from.
    pub source_path: std::path::PathBuf,
    /// Reference of the root directory listing.
    pub dir_ref: BlockRef,
}

/// Checks whether a string is a well-formed snapshot name,
/// e.g. `12d22bc3-e1342b30-a9824648-67400c24-039aa13a-169957c2`.
pub fn is_valid_name(name: &str) -> bool {
    if name.len() != NAME_LEN || !name.is_ascii() {
        return false;
    }
    name.bytes().enumerate().all(|(i, b)| {
        if i % 9 == 8 {
            b == b'-'
        } else {
            b.is_ascii_hexdigit()
        }
    })
}

fn nonce_to_name(nonce: &[u8; NONCE_LEN]) -> String {
    nonce
        .chunks(4)
        .map(hex::encode)
        .collect::<Vec<_>>()
        .join("-")
}

fn name_to_nonce(name: &str) -> SnapshotResult<[u8; NONCE_LEN]> {
    if !is_valid_name(name) {
        return Err(SnapshotError::InvalidName(name.to_string()));
    }
    let hex_chars: String = name.chars().filter(|&c| c != '-').collect();
    let mut nonce = [0u8; NONCE_LEN];
    hex::decode_to_slice(hex_chars.as_bytes(), &mut nonce)
        .map_err(|_| SnapshotError::InvalidName(name.to_string()))?;
    Ok(nonce)
}

fn snapshot_cipher(key: &SecretKey) -> XSalsa20Poly1305 {
    XSalsa20Poly1305::new(key.as_bytes().into())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn fresh_nonce() -> [u8; NONCE_LEN] {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..8].copy_from_slice(&nanos.to_be_bytes());
    rand::thread_rng().fill_bytes(&mut nonce[8..]);
    nonce
}

/// Encrypts and stores a snapshot record, returning its name.
pub fn store_info(
    config: &StoreConfig,
    keys: &Keys,
    info: &SnapshotInfo,
) -> SnapshotResult<String> {
    let data = serde_json::to_vec(info)?;
    let nonce = fresh_nonce();
    let sealed = snapshot_cipher(&keys.snapshot_enc)
        .encrypt(Nonce::from_slice(&nonce), data.as_slice())
        .map_err(|_| SnapshotError::DecryptionFailure("encryption failed".into()))?;
    let name = nonce_to_name(&nonce);
    std::fs::write(config.snapshots_path().join(&name), sealed)?;
    Ok(name)
}

/// Loads and decrypts a snapshot record by name.
pub fn load_info(config: &StoreConfig, keys: &Keys, name: &str) -> SnapshotResult<SnapshotInfo> {
    let nonce = name_to_nonce(name)?;
    let sealed = std::fs::read(config.snapshots_path().join(name))?;
    let data = snapshot_cipher(&keys.snapshot_enc)
        .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
        .map_err(|_| SnapshotError::DecryptionFailure(name.to_string()))?;
    Ok(serde_json::from_slice(&data)?)
}

/// Takes a snapshot of `dir_path`: stores the tree through the engine and
/// records the root under a fresh name.
pub fn create(
    engine: &BlockEngine,
    config: &StoreConfig,
    keys: &Keys,
    dir_path: &Path,
    comment: &str,
) -> SnapshotResult<String> {
    let entry = dir::save_directory(engine, dir_path)?;
    let source_path = std::fs::canonicalize(dir_path).unwrap_or_else(|_| dir_path.to_path_buf());
    let info = SnapshotInfo {
        time_secs: now_secs(),
        comment: comment.to_string(),
        source_path,
        dir_ref: entry.reference,
    };
    let name = store_info(config, keys, &info)?;
    info!(snapshot = %name, root = %info.dir_ref, "stored snapshot");
    Ok(name)
}

/// Restores a snapshot into `out_dir`.
pub fn restore(
    engine: &BlockEngine,
    config: &StoreConfig,
    keys: &Keys,
    name: &str,
    out_dir: &Path,
) -> SnapshotResult<()> {
    let info = load_info(config, keys, name)?;
    info!(snapshot = %name, root = %info.dir_ref, out = %out_dir.display(), "restoring snapshot");
    dir::restore_directory(engine, &info.dir_ref, out_dir)
}

/// Reads every block of a snapshot back, verifying the whole tree.
pub fn verify(
    engine: &BlockEngine,
    config: &StoreConfig,
    keys: &Keys,
    name: &str,
) -> SnapshotResult<()> {
    let info = load_info(config, keys, name)?;
    dir::verify_directory(engine, &info.dir_ref)
}

/// Lists stored snapshot names in sorted order. Files that are not
/// snapshot-named are skipped.
pub fn list_names(config: &StoreConfig) -> SnapshotResult<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(config.snapshots_path())? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_valid_name(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn name_codec_round_trips() {
        let nonce: [u8; NONCE_LEN] = core::array::from_fn(|i| (i * 11) as u8);
        let name = nonce_to_name(&nonce);
        assert_eq!(name.len(), NAME_LEN);
        assert!(is_valid_name(&name));
        assert_eq!(name_to_nonce(&name).unwrap(), nonce);
    }

    #[test]
    fn malformed_names_are_rejected() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("12d22bc3")); // too short
        assert!(!is_valid_name(
            "12d22bc3+e1342b30+a9824648+67400c24+039aa13a+169957c2"
        ));
        assert!(!is_valid_name(
            "12d22bc3-e1342b30-a9824648-67400c24-039aa13a-16995zzz"
        ));
        assert!(matches!(
            name_to_nonce("no-dashes"),
            Err(SnapshotError::InvalidName(_))
        ));
    }

    #[test]
    fn info_round_trips_encrypted() {
        let store = tempfile::tempdir().unwrap();
        let (engine, config, keys) = testutil::store_at(store.path());
        config.make_paths().unwrap();

        let mut w = engine.new_writer();
        w.write(b"listing").unwrap();
        let dir_ref = w.finish().unwrap();

        let info = SnapshotInfo {
            time_secs: 1_700_000_000,
            comment: "nightly".into(),
            source_path: "/home/someone/data".into(),
            dir_ref,
        };
        let name = store_info(&config, &keys, &info).unwrap();
        assert!(is_valid_name(&name));

        let back = load_info(&config, &keys, &name).unwrap();
        assert_eq!(back.time_secs, info.time_secs);
        assert_eq!(back.comment, "nightly");
        assert_eq!(back.dir_ref, dir_ref);

        // The file on disk is ciphertext only.
        let raw = std::fs::read(config.snapshots_path().join(&name)).unwrap();
        assert!(!raw.windows(7).any(|w| w == b"nightly"));
    }

    #[test]
    fn tampered_info_fails_decryption() {
        let store = tempfile::tempdir().unwrap();
        let (engine, config, keys) = testutil::store_at(store.path());
        config.make_paths().unwrap();

        let mut w = engine.new_writer();
        w.write(b"x").unwrap();
        let dir_ref = w.finish().unwrap();
        let info = SnapshotInfo {
            time_secs: 1,
            comment: String::new(),
            source_path: "/src".into(),
            dir_ref,
        };
        let name = store_info(&config, &keys, &info).unwrap();

        let path = config.snapshots_path().join(&name);
        let mut raw = std::fs::read(&path).unwrap();
        raw[0] ^= 0xFF;
        std::fs::write(&path, raw).unwrap();

        assert!(matches!(
            load_info(&config, &keys, &name),
            Err(SnapshotError::DecryptionFailure(_))
        ));
    }

    #[test]
    fn empty_comment_is_omitted_from_the_record() {
        let info = SnapshotInfo {
            time_secs: 5,
            comment: String::new(),
            source_path: "/p".into(),
            dir_ref: BlockRef::from_bytes(&[1u8; 24]).unwrap(),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("comment"));
    }

    #[test]
    fn list_names_sorts_and_filters() {
        let store = tempfile::tempdir().unwrap();
        let (_engine, config, _keys) = testutil::store_at(store.path());
        config.make_paths().unwrap();

        let n1 = nonce_to_name(&[0x22u8; NONCE_LEN]);
        let n2 = nonce_to_name(&[0x11u8; NONCE_LEN]);
        std::fs::write(config.snapshots_path().join(&n1), b"x").unwrap();
        std::fs::write(config.snapshots_path().join(&n2), b"x").unwrap();
        std::fs::write(config.snapshots_path().join("README"), b"x").unwrap();

        assert_eq!(list_names(&config).unwrap(), vec![n2, n1]);
    }
}
