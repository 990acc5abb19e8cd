//! Bulk export and import of a plugin's active extensions.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use registry_fs::ConfigStore;

use crate::dependency::ValidationReport;
use crate::error::{Error, Result};
use crate::record::{ExtensionRecord, SlotId};

/// Manifest schema version written by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// Snapshot of one plugin's active extensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub plugin: String,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub extensions: Vec<ExtensionRecord>,
}

impl Manifest {
    /// Build a manifest, sorting records by name.
    pub fn new(plugin: impl Into<String>, mut extensions: Vec<ExtensionRecord>) -> Self {
        extensions.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            format_version: FORMAT_VERSION,
            plugin: plugin.into(),
            exported_at: Utc::now(),
            extensions,
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Write atomically; the format follows the file extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        ConfigStore::new().save(path, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(ConfigStore::new().load(path)?)
    }

    /// Fail when `record` is not owned by the manifest's plugin.
    pub fn check_ownership(&self, record: &ExtensionRecord) -> Result<()> {
        if record.plugin_name == self.plugin {
            Ok(())
        } else {
            Err(Error::ManifestPlugin {
                manifest: self.plugin.clone(),
                record: record.plugin_name.clone(),
            })
        }
    }
}

/// Per-record outcome of an import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    /// Records that were stored, as active or historical versions.
    pub accepted: Vec<SlotId>,
    /// Records refused, with the reason.
    pub rejected: Vec<(SlotId, String)>,
    /// Records stored under another name: `(original, renamed)`.
    pub renamed: Vec<(SlotId, SlotId)>,
    /// Records already present with identical content.
    pub kept: Vec<SlotId>,
    /// Graph validation after the last record was handled.
    pub validation: ValidationReport,
}

impl ImportReport {
    pub fn total(&self) -> usize {
        self.accepted.len() + self.rejected.len() + self.renamed.len() + self.kept.len()
    }

    /// True when nothing was refused.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DependencySpec, ExtensionType};
    use pretty_assertions::assert_eq;
    use semver::Version;
    use tempfile::tempdir;

    fn manifest() -> Manifest {
        Manifest::new(
            "fmt",
            vec![
                ExtensionRecord::new("fmt", "printer", Version::new(1, 0, 0), ExtensionType::Utility),
                ExtensionRecord::new("fmt", "formatter", Version::new(1, 0, 0), ExtensionType::Command)
                    .with_dependency(DependencySpec::required("parser", "^1.0.0")),
            ],
        )
    }

    #[test]
    fn records_are_sorted_by_name() {
        let names: Vec<_> = manifest().extensions.into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["formatter", "printer"]);
    }

    #[test]
    fn text_round_trips() {
        let m = manifest();
        assert_eq!(Manifest::from_yaml(&m.to_yaml().unwrap()).unwrap(), m);
        assert_eq!(Manifest::from_json(&m.to_json().unwrap()).unwrap(), m);
    }

    #[test]
    fn save_picks_format_from_extension() {
        let dir = tempdir().unwrap();
        let m = manifest();
        for file in ["manifest.yaml", "manifest.json"] {
            let path = dir.path().join(file);
            m.save(&path).unwrap();
            assert_eq!(Manifest::load(&path).unwrap(), m, "{file}");
        }
        assert!(m.save(&dir.path().join("manifest.txt")).is_err());
    }

    #[test]
    fn foreign_records_fail_ownership() {
        let m = manifest();
        assert!(m.check_ownership(&m.extensions[0]).is_ok());
        let mut foreign = m.extensions[0].clone();
        foreign.plugin_name = "other".into();
        assert!(matches!(
            m.check_ownership(&foreign),
            Err(Error::ManifestPlugin { ref record, .. }) if record == "other"
        ));
    }
}
