//! Store configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Smallest accepted chunk size: 64 KiB.
pub const MIN_BLOCK_SIZE: usize = 64 * 1024;

/// Largest accepted chunk size: 1 GiB.
pub const MAX_BLOCK_SIZE: usize = 1 << 30;

/// Default chunk size: 2 MiB.
pub const DEFAULT_BLOCK_SIZE: usize = 2 * 1024 * 1024;

/// Default alignment unit for on-disk block files.
pub const DEFAULT_PAD_SIZE: usize = 512;

/// Store-wide configuration. `block_size` and `pad_size` are format
/// parameters: changing either for an existing store invalidates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct StoreConfig {
    /// Maximum payload size of a single block, in bytes.
    pub block_size: usize,
    /// Base directory holding `blocks/` and `snapshots/`.
    pub out_path: PathBuf,
    /// Issue fsync when writing blocks.
    pub file_sync: bool,
    /// Alignment unit of on-disk block file lengths.
    pub pad_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            out_path: PathBuf::new(),
            file_sync: false,
            pad_size: DEFAULT_PAD_SIZE,
        }
    }
}

impl StoreConfig {
    /// Creates a config with defaults rooted at `out_path`.
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            ..Self::default()
        }
    }

    /// Loads a config file. A `.toml` extension selects TOML; anything else
    /// parses as JSON.
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let config: StoreConfig = if ext.eq_ignore_ascii_case("toml") {
            toml::from_str(&contents)
                .map_err(|e| EngineError::InvalidConfig(format!("{}: {e}", path.display())))?
        } else {
            serde_json::from_str(&contents)
                .map_err(|e| EngineError::InvalidConfig(format!("{}: {e}", path.display())))?
        };
        config.validated()
    }

    /// Normalises and checks the configuration: a zero block size selects
    /// the default, undersized values clamp up to the minimum, oversized
    /// values and a zero pad size are rejected.
    pub fn validated(mut self) -> EngineResult<Self> {
        if self.block_size == 0 {
            self.block_size = DEFAULT_BLOCK_SIZE;
        } else if self.block_size < MIN_BLOCK_SIZE {
            self.block_size = MIN_BLOCK_SIZE;
        } else if self.block_size > MAX_BLOCK_SIZE {
            return Err(EngineError::InvalidConfig(format!(
                "BlockSize must be at most {MAX_BLOCK_SIZE}"
            )));
        }
        if self.pad_size == 0 {
            return Err(EngineError::InvalidConfig("PadSize must be positive".into()));
        }
        if self.out_path.as_os_str().is_empty() {
            return Err(EngineError::InvalidConfig("OutPath must be set".into()));
        }
        Ok(self)
    }

    /// Directory holding block shard directories.
    pub fn blocks_path(&self) -> PathBuf {
        self.out_path.join("blocks")
    }

    /// Directory holding snapshot index files.
    pub fn snapshots_path(&self) -> PathBuf {
        self.out_path.join("snapshots")
    }

    /// Creates the blocks and snapshots directories.
    pub fn make_paths(&self) -> EngineResult<()> {
        std::fs::create_dir_all(self.blocks_path())?;
        std::fs::create_dir_all(self.snapshots_path())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let c = StoreConfig::new("/tmp/store").validated().unwrap();
        assert_eq!(c.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(c.pad_size, DEFAULT_PAD_SIZE);
        assert!(!c.file_sync);
        assert_eq!(c.blocks_path(), PathBuf::from("/tmp/store/blocks"));
        assert_eq!(c.snapshots_path(), PathBuf::from("/tmp/store/snapshots"));
    }

    #[test]
    fn block_size_clamping() {
        let mut c = StoreConfig::new("/tmp/store");
        c.block_size = 0;
        assert_eq!(c.clone().validated().unwrap().block_size, DEFAULT_BLOCK_SIZE);
        c.block_size = 1024;
        assert_eq!(c.clone().validated().unwrap().block_size, MIN_BLOCK_SIZE);
        c.block_size = MAX_BLOCK_SIZE + 1;
        assert!(c.clone().validated().is_err());
    }

    #[test]
    fn zero_pad_size_rejected() {
        let mut c = StoreConfig::new("/tmp/store");
        c.pad_size = 0;
        assert!(matches!(
            c.validated(),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn json_config_round_trip() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"BlockSize": 65536, "OutPath": "/backup/store", "FileSync": true}}"#
        )
        .unwrap();
        let c = StoreConfig::from_file(f.path()).unwrap();
        assert_eq!(c.block_size, 65536);
        assert_eq!(c.out_path, PathBuf::from("/backup/store"));
        assert!(c.file_sync);
        assert_eq!(c.pad_size, DEFAULT_PAD_SIZE);
    }

    #[test]
    fn toml_config_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        std::fs::write(&path, "BlockSize = 131072\nOutPath = \"/backup/store\"\n").unwrap();
        let c = StoreConfig::from_file(&path).unwrap();
        assert_eq!(c.block_size, 131072);
    }
}
