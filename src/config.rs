use crate::errors::{FsError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Repository format this build reads and writes (logical addressing only).
pub const FORMAT_LOGICAL_ADDRESSING: u32 = 1;

/// Repository configuration, stored as `fsfs.toml` at the repository root.
///
/// Written once at creation time; mutating it on a live repository is not
/// supported. All tuning knobs for the index engine and the deltifier live
/// here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// On-disk format; opening fails on anything but the current one.
    pub format: u32,
    /// Revisions (and revprop files) per shard directory.
    pub max_files_per_dir: u64,
    /// Maximum number of entries in one L2P index page.
    pub l2p_page_size: u64,
    /// Bytes of revision-file offset space covered by one P2L index page.
    pub p2l_page_size: u64,
    /// Block size for aligned index reads.
    pub block_size: u64,
    /// Below this walk distance the deltifier chains linearly off the
    /// immediate predecessor instead of the skip target.
    pub max_linear_deltification: u64,
    /// Predecessor-walk cap; longer walks restart the delta chain.
    pub max_deltification_walk: u64,
    /// Deltify directory contents (rather than storing them plain).
    pub deltify_directories: bool,
    /// Deltify property lists.
    pub deltify_properties: bool,
    /// Consult and feed the SHA-1 rep cache.
    pub rep_sharing_allowed: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            format: FORMAT_LOGICAL_ADDRESSING,
            max_files_per_dir: 1000,
            l2p_page_size: 0x2000,
            p2l_page_size: 0x10000,
            block_size: 0x10000,
            max_linear_deltification: 16,
            max_deltification_walk: 1024,
            deltify_directories: true,
            deltify_properties: true,
            rep_sharing_allowed: true,
        }
    }
}

impl FsConfig {
    /// Read the configuration from `fsfs.toml` under ROOT.
    ///
    /// # Errors
    /// `Config` if the file is missing or malformed, or if the recorded
    /// format is not the logical-addressing one.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("fsfs.toml");
        let text = std::fs::read_to_string(&path)
            .map_err(FsError::io(format!("reading '{}'", path.display())))?;
        let config: FsConfig =
            toml::from_str(&text).map_err(|e| FsError::Config(e.to_string()))?;
        if config.format != FORMAT_LOGICAL_ADDRESSING {
            return Err(FsError::Config(format!(
                "unsupported repository format {}; this build reads format {}",
                config.format, FORMAT_LOGICAL_ADDRESSING
            )));
        }
        if config.l2p_page_size == 0 || config.p2l_page_size == 0 || config.block_size == 0 {
            return Err(FsError::Config("page and block sizes must be non-zero".into()));
        }
        Ok(config)
    }

    /// Write the configuration to `fsfs.toml` under ROOT.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn store(&self, root: &Path) -> Result<()> {
        let path = root.join("fsfs.toml");
        let text = toml::to_string_pretty(self).map_err(|e| FsError::Config(e.to_string()))?;
        std::fs::write(&path, text)
            .map_err(FsError::io(format!("writing '{}'", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let config = FsConfig { max_files_per_dir: 64, ..Default::default() };
        config.store(dir.path()).unwrap();
        let loaded = FsConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.max_files_per_dir, 64);
        assert_eq!(loaded.l2p_page_size, 0x2000);
    }

    #[test]
    fn rejects_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let config = FsConfig { format: 99, ..Default::default() };
        config.store(dir.path()).unwrap();
        assert!(matches!(FsConfig::load(dir.path()), Err(FsError::Config(_))));
    }
}
