use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use kvault_fs::StoreConfig;
use kvault_watch::WatchConfig;

/// Directory used when neither a config file nor a flag names one.
const DEFAULT_DATA_DIR: &str = "kvault-data";

/// Top-level configuration file.
///
/// ```toml
/// [kv]
/// directory = "/var/lib/kvault/kv"
///
/// [blob]
/// directory = "/var/lib/kvault/blobs"
/// lock_stripes = 128
///
/// [watch]
/// poll_interval_ms = 250
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvaultConfig {
    pub kv: StoreConfig,
    pub blob: StoreConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

impl Default for KvaultConfig {
    fn default() -> Self {
        let base = PathBuf::from(DEFAULT_DATA_DIR);
        Self {
            kv: StoreConfig::new(base.join("kv")),
            blob: StoreConfig::new(base.join("blobs")),
            watch: WatchConfig::default(),
        }
    }
}

impl KvaultConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load `path` if given, else start from defaults, then apply the
    /// directory overrides.
    pub fn resolve(
        path: Option<&Path>,
        kv_dir: Option<PathBuf>,
        blob_dir: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(dir) = kv_dir {
            config.kv.directory = dir;
        }
        if let Some(dir) = blob_dir {
            config.blob.directory = dir;
        }
        Ok(config)
    }
}
