//! Registry configuration.
//!
//! Read from `registry.toml` at the storage root. Every key is optional:
//!
//! ```toml
//! default_strategy = "higher_version"
//!
//! [lock]
//! initial_interval_ms = 10
//! max_interval_ms = 100
//! max_elapsed_ms = 500
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use registry_fs::{ConfigStore, LockPolicy};

use crate::Result;
use crate::conflict::ConflictStrategy;

/// Name of the configuration file at the storage root.
pub const CONFIG_FILENAME: &str = "registry.toml";

/// Directory under the storage root holding extension records.
pub const EXTENSIONS_DIR: &str = "extensions";

/// Name of the advisory lock file at the storage root.
pub const LOCK_FILENAME: &str = "registry.lock";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Strategy applied when a registration names none.
    pub default_strategy: ConflictStrategy,
    /// Retry budget for the storage lock.
    pub lock: LockPolicy,
}

impl RegistryConfig {
    /// Parse configuration from TOML content.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(registry_fs::Format::Toml.parse(content, Path::new(CONFIG_FILENAME))?)
    }

    /// Load `registry.toml` from `root`, or defaults when it does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        Ok(ConfigStore::new().load_or_default(&root.join(CONFIG_FILENAME))?)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        ConfigStore::new().save(&root.join(CONFIG_FILENAME), self)?;
        Ok(())
    }

    /// Per-user storage root, e.g. `~/.local/share/extension-registry`.
    pub fn default_root() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("extension-registry"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn empty_content_yields_defaults() {
        let config = RegistryConfig::parse("").unwrap();
        assert_eq!(config, RegistryConfig::default());
        assert_eq!(config.default_strategy, ConflictStrategy::LatestWins);
        assert_eq!(config.lock.max_elapsed_ms, 500);
    }

    #[test]
    fn partial_lock_section_keeps_other_defaults() {
        let config = RegistryConfig::parse(
            r#"
default_strategy = "reject_new"

[lock]
max_elapsed_ms = 50
"#,
        )
        .unwrap();
        assert_eq!(config.default_strategy, ConflictStrategy::RejectNew);
        assert_eq!(config.lock.max_elapsed_ms, 50);
        assert_eq!(config.lock.initial_interval_ms, 10);
    }

    #[test]
    fn rendered_defaults_parse_back() {
        let text = toml::to_string(&RegistryConfig::default()).unwrap();
        assert!(text.contains("[lock]"));
        assert_eq!(RegistryConfig::parse(&text).unwrap(), RegistryConfig::default());
    }

    #[test]
    fn unknown_strategy_is_an_error() {
        assert!(RegistryConfig::parse(r#"default_strategy = "coin_flip""#).is_err());
    }

    #[test]
    fn load_missing_file_then_save_round_trip() {
        let dir = tempdir().unwrap();
        assert_eq!(RegistryConfig::load(dir.path()).unwrap(), RegistryConfig::default());

        let config = RegistryConfig {
            default_strategy: ConflictStrategy::Merge,
            ..RegistryConfig::default()
        };
        config.save(dir.path()).unwrap();
        let text = std::fs::read_to_string(dir.path().join(CONFIG_FILENAME)).unwrap();
        assert!(text.contains(r#"default_strategy = "merge""#));
        assert_eq!(RegistryConfig::load(dir.path()).unwrap(), config);
    }
}
