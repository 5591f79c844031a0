use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::locks::DEFAULT_STRIPES;

/// Configuration for one logical store (key-value or blob).
///
/// `directory` is required; the key-value and blob stores may point at
/// different directories.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Filesystem root of the store.
    pub directory: PathBuf,
    /// Size of the striped lock pool.
    #[serde(default = "default_lock_stripes")]
    pub lock_stripes: usize,
}

fn default_lock_stripes() -> usize {
    DEFAULT_STRIPES
}

impl StoreConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            lock_stripes: DEFAULT_STRIPES,
        }
    }

    pub fn with_lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = StoreConfig::new("/var/lib/kvault");
        assert_eq!(c.directory, PathBuf::from("/var/lib/kvault"));
        assert_eq!(c.lock_stripes, DEFAULT_STRIPES);
    }

    #[test]
    fn parses_from_toml_with_default_stripes() {
        let c: StoreConfig = toml::from_str(r#"directory = "/data/kv""#).unwrap();
        assert_eq!(c, StoreConfig::new("/data/kv"));
    }

    #[test]
    fn directory_is_required() {
        let err = toml::from_str::<StoreConfig>("lock_stripes = 8").unwrap_err();
        assert!(err.to_string().contains("directory"));
    }
}
