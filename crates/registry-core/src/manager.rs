//! Plugin-facing registry API.
//!
//! A [`RegistryManager`] is bound to one plugin name: every record it
//! registers is owned by that plugin, and per-plugin queries default to it.

use std::collections::BTreeSet;
use std::sync::Arc;

use semver::Version;

use crate::conflict::ConflictStrategy;
use crate::dependency::{DependencyReport, ValidationReport};
use crate::discovery::Discovery;
use crate::error::{Error, Result};
use crate::handle::{RegistrationOutcome, RegistryHandle, Removal};
use crate::manifest::{ImportReport, Manifest};
use crate::record::{
    CompatibilityLevel, DependencySpec, ExtensionRecord, ExtensionType, Metadata, SlotId,
};
use crate::store::RecordFilter;
use crate::version::parse_version;

/// Everything a plugin supplies to register one capability.
#[derive(Debug, Clone)]
pub struct ExtensionRegistration {
    pub name: String,
    pub version: String,
    pub extension_type: ExtensionType,
    pub title: Option<String>,
    pub description: String,
    pub entry_point: String,
    pub keywords: BTreeSet<String>,
    pub dependencies: Vec<DependencySpec>,
    pub metadata: Metadata,
    pub compatibility_level: CompatibilityLevel,
    /// Overrides the manager's default strategy for this registration.
    pub strategy: Option<ConflictStrategy>,
}

impl ExtensionRegistration {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        extension_type: ExtensionType,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            extension_type,
            title: None,
            description: String::new(),
            entry_point: String::new(),
            keywords: BTreeSet::new(),
            dependencies: Vec::new(),
            metadata: Metadata::new(),
            compatibility_level: CompatibilityLevel::default(),
            strategy: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>, constraint: impl Into<String>) -> Self {
        self.dependencies.push(DependencySpec::required(name, constraint));
        self
    }

    pub fn optionally_depends_on(
        mut self,
        name: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        self.dependencies.push(DependencySpec::optional(name, constraint));
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn compatibility(mut self, level: CompatibilityLevel) -> Self {
        self.compatibility_level = level;
        self
    }

    pub fn strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Build the record owned by `plugin`.
    fn into_record(self, plugin: &str) -> Result<ExtensionRecord> {
        let version = parse_version(&self.version)?;
        let mut record = ExtensionRecord::new(plugin, self.name, version, self.extension_type)
            .with_description(self.description)
            .with_entry_point(self.entry_point)
            .with_keywords(self.keywords)
            .with_compatibility(self.compatibility_level);
        if let Some(title) = self.title {
            record.title = title;
        }
        record.dependencies = self.dependencies;
        record.metadata = self.metadata;
        Ok(record)
    }
}

/// Result of [`RegistryManager::register_plugin_extension`].
#[derive(Debug, Clone)]
pub struct RegistrationReport {
    /// False only when the strategy discarded the incoming record.
    pub success: bool,
    pub outcome: RegistrationOutcome,
    /// The record as stored (possibly renamed or merged).
    pub record: ExtensionRecord,
    /// Registration message followed by validation messages for this plugin.
    pub messages: Vec<String>,
    /// Validation of this plugin's slots after the registration.
    pub validation: ValidationReport,
}

/// Registry API bound to one plugin.
#[derive(Debug, Clone)]
pub struct RegistryManager {
    handle: Arc<RegistryHandle>,
    plugin: String,
    strategy: ConflictStrategy,
}

impl RegistryManager {
    /// Bind a manager to `plugin`, using the root's configured default strategy.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidName`] when `plugin` cannot be used as a registry key.
    pub fn new(handle: Arc<RegistryHandle>, plugin: impl Into<String>) -> Result<Self> {
        let plugin = plugin.into();
        registry_fs::validate_path_segment(&plugin)?;
        let strategy = handle.config().default_strategy;
        Ok(Self {
            handle,
            plugin,
            strategy,
        })
    }

    /// Use `strategy` for registrations that do not name one.
    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn handle(&self) -> &Arc<RegistryHandle> {
        &self.handle
    }

    fn slot(&self, name: &str) -> SlotId {
        SlotId::new(&self.plugin, name)
    }

    /// Register a capability of this plugin.
    ///
    /// Conflicts are settled by the registration's strategy, or the
    /// manager's default. The dependency graph is validated afterwards and
    /// the plugin-scoped report is returned alongside the outcome.
    ///
    /// # Errors
    ///
    /// Invalid version, name or constraint, [`Error::Conflict`],
    /// [`Error::MergeConflict`], [`Error::RegistryBusy`] and storage errors.
    pub fn register_plugin_extension(
        &self,
        registration: ExtensionRegistration,
    ) -> Result<RegistrationReport> {
        let strategy = registration.strategy.unwrap_or(self.strategy);
        let record = registration.into_record(&self.plugin)?;

        let registration = self.handle.register(record, strategy)?;
        let validation = self.validate_plugin_extensions();

        let mut messages = vec![registration.message.clone()];
        messages.extend(validation.messages());

        Ok(RegistrationReport {
            success: registration.persisted
                || registration.outcome == RegistrationOutcome::Unchanged,
            outcome: registration.outcome,
            record: registration.record,
            messages,
            validation,
        })
    }

    /// Active records of any plugin matching all given filters.
    pub fn discover_extensions(
        &self,
        extension_type: Option<ExtensionType>,
        keywords: Option<&[&str]>,
    ) -> Vec<ExtensionRecord> {
        self.handle.read(|store| {
            Discovery::new(store)
                .discover(extension_type, keywords)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    /// Free-text search over active records of any plugin.
    pub fn search_extensions(&self, text: &str) -> Vec<ExtensionRecord> {
        self.handle
            .read(|store| Discovery::new(store).search(text).into_iter().cloned().collect())
    }

    /// Active record for `name` (optionally `plugin:name`) satisfying `constraint`.
    pub fn find_extension_for_dependency(
        &self,
        name: &str,
        constraint: &str,
    ) -> Result<Option<ExtensionRecord>> {
        self.handle.read(|store| {
            Discovery::new(store)
                .find_extension_for_dependency(name, constraint)
                .map(|found| found.cloned())
        })
    }

    /// Validation issues involving `plugin`'s slots.
    pub fn validate_extensions_of(&self, plugin: &str) -> ValidationReport {
        self.handle.validate().for_plugin(plugin)
    }

    /// Validation issues involving this plugin's slots.
    pub fn validate_plugin_extensions(&self) -> ValidationReport {
        self.validate_extensions_of(&self.plugin)
    }

    /// Status of every dependency declared by this plugin's active records.
    pub fn check_plugin_dependencies(&self) -> DependencyReport {
        self.handle.dependency_graph().report_for_plugin(&self.plugin)
    }

    pub fn export_extension_manifest(&self) -> Manifest {
        self.handle.export(&self.plugin)
    }

    /// Import a manifest of this plugin.
    ///
    /// The returned report carries the validation issues involving this
    /// plugin once every record has been handled.
    ///
    /// # Errors
    ///
    /// [`Error::ManifestPlugin`] when the manifest belongs to another plugin.
    pub fn import_extension_manifest(
        &self,
        manifest: &Manifest,
        overwrite: bool,
    ) -> Result<ImportReport> {
        if manifest.plugin != self.plugin {
            return Err(Error::ManifestPlugin {
                manifest: manifest.plugin.clone(),
                record: self.plugin.clone(),
            });
        }
        let mut report = self.handle.import(manifest, overwrite)?;
        report.validation = report.validation.for_plugin(&self.plugin);
        Ok(report)
    }

    /// Remove one version of an extension, or every version when `version`
    /// is `None`.
    ///
    /// The removal's validation covers the whole registry: the slots hurt
    /// by a removal usually belong to other plugins.
    pub fn remove_extension(&self, name: &str, version: Option<&Version>) -> Result<Removal> {
        self.handle.remove(&self.slot(name), version)
    }

    /// Active record of one of this plugin's extensions.
    pub fn get_extension(&self, name: &str) -> Option<ExtensionRecord> {
        let slot = self.slot(name);
        self.handle.read(|store| store.get_active(&slot).cloned())
    }

    /// Every retained version of one of this plugin's extensions, lowest first.
    pub fn extension_history(&self, name: &str) -> Vec<ExtensionRecord> {
        let slot = self.slot(name);
        self.handle
            .read(|store| store.history(&slot).into_iter().cloned().collect())
    }

    /// Active records owned by this plugin, sorted by name.
    pub fn list_plugin_extensions(&self) -> Vec<ExtensionRecord> {
        let filter = RecordFilter::plugin(&self.plugin);
        self.handle
            .read(|store| store.list(&filter).into_iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictOutcome;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    fn manager(plugin: &str) -> (TempDir, RegistryManager) {
        let dir = tempdir().unwrap();
        let handle = Arc::new(RegistryHandle::open(dir.path()).unwrap());
        (dir, RegistryManager::new(handle, plugin).unwrap())
    }

    #[test]
    fn rejects_unusable_plugin_name() {
        let dir = tempdir().unwrap();
        let handle = Arc::new(RegistryHandle::open(dir.path()).unwrap());
        assert!(matches!(
            RegistryManager::new(handle, "a/b"),
            Err(Error::InvalidName { .. })
        ));
    }

    #[test]
    fn registration_builds_a_full_record() {
        let (_dir, manager) = manager("core");
        let report = manager
            .register_plugin_extension(
                ExtensionRegistration::new("parser", "1.2.0", ExtensionType::Skill)
                    .title("Parser")
                    .description("Parses things")
                    .entry_point("core.parser:run")
                    .keywords(["parse"])
                    .metadata("owner", json!("core-team"))
                    .compatibility(CompatibilityLevel::Partial),
            )
            .unwrap();

        assert!(report.success);
        assert!(report.validation.valid);
        assert_eq!(report.outcome, RegistrationOutcome::Inserted);

        let stored = manager.get_extension("parser").unwrap();
        assert_eq!(stored.plugin_name, "core");
        assert_eq!(stored.title, "Parser");
        assert_eq!(stored.entry_point, "core.parser:run");
        assert_eq!(stored.compatibility_level, CompatibilityLevel::Partial);
        assert_eq!(stored.metadata["owner"], json!("core-team"));
    }

    #[test]
    fn partial_version_is_invalid() {
        let (_dir, manager) = manager("core");
        let err = manager
            .register_plugin_extension(ExtensionRegistration::new("parser", "1.2", ExtensionType::Skill))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidVersion { .. }));
    }

    #[test]
    fn missing_dependency_is_reported_but_stored() {
        let (_dir, manager) = manager("fmt");
        let report = manager
            .register_plugin_extension(
                ExtensionRegistration::new("formatter", "1.0.0", ExtensionType::Command)
                    .depends_on("parser", "^1.0.0"),
            )
            .unwrap();

        assert!(report.success);
        assert!(!report.validation.valid);
        assert_eq!(report.messages.len(), 2);
        assert!(report.messages[1].contains("not found"));
        assert!(manager.get_extension("formatter").is_some());
        assert!(!manager.check_plugin_dependencies().all_required_satisfied());
    }

    #[test]
    fn discarded_registration_is_unsuccessful() {
        let (_dir, manager) = manager("core");
        let manager = manager.with_strategy(ConflictStrategy::OldestWins);
        manager
            .register_plugin_extension(ExtensionRegistration::new("parser", "1.0.0", ExtensionType::Skill))
            .unwrap();
        let report = manager
            .register_plugin_extension(
                ExtensionRegistration::new("parser", "1.0.0", ExtensionType::Skill)
                    .description("different"),
            )
            .unwrap();

        assert!(!report.success);
        assert_eq!(
            report.outcome,
            RegistrationOutcome::Resolved(ConflictOutcome::Kept)
        );
        assert_eq!(manager.get_extension("parser").unwrap().description, "");
    }

    #[test]
    fn per_registration_strategy_overrides_default() {
        let (_dir, manager) = manager("core");
        manager
            .register_plugin_extension(ExtensionRegistration::new("parser", "1.0.0", ExtensionType::Skill))
            .unwrap();
        let err = manager
            .register_plugin_extension(
                ExtensionRegistration::new("parser", "2.0.0", ExtensionType::Skill)
                    .strategy(ConflictStrategy::RejectNew),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn remove_and_history() {
        let (_dir, manager) = manager("core");
        for version in ["1.0.0", "1.1.0", "2.0.0"] {
            manager
                .register_plugin_extension(ExtensionRegistration::new("parser", version, ExtensionType::Skill))
                .unwrap();
        }
        let versions = |m: &RegistryManager| -> Vec<String> {
            m.extension_history("parser")
                .iter()
                .map(|r| r.version.to_string())
                .collect()
        };
        assert_eq!(versions(&manager), vec!["1.0.0", "1.1.0", "2.0.0"]);

        manager
            .remove_extension("parser", Some(&Version::new(2, 0, 0)))
            .unwrap();
        assert_eq!(
            manager.get_extension("parser").unwrap().version,
            Version::new(1, 1, 0)
        );

        let removal = manager.remove_extension("parser", None).unwrap();
        assert_eq!(removal.removed.len(), 2);
        assert!(removal.validation.valid);
        assert!(manager.list_plugin_extensions().is_empty());
    }

    #[test]
    fn removing_a_dependency_reports_its_dependents() {
        let (_dir, core) = manager("core");
        let handle = Arc::clone(core.handle());
        let fmt = RegistryManager::new(handle, "fmt").unwrap();
        core.register_plugin_extension(ExtensionRegistration::new("parser", "1.0.0", ExtensionType::Skill))
            .unwrap();
        fmt.register_plugin_extension(
            ExtensionRegistration::new("formatter", "1.0.0", ExtensionType::Command)
                .depends_on("core:parser", "^1.0.0"),
        )
        .unwrap();

        let removal = core.remove_extension("parser", None).unwrap();
        assert!(!removal.validation.valid);
        assert!(!removal.validation.is_slot_valid(&SlotId::new("fmt", "formatter")));
        let issue = removal.validation.errors().next().unwrap();
        assert!(matches!(
            &issue.kind,
            crate::dependency::IssueKind::Dependency {
                status: crate::dependency::DependencyStatus::NotFound,
                ..
            }
        ));
        assert!(issue.to_string().contains("not found"), "{issue}");
    }

    #[test]
    fn import_reports_validation_for_the_plugin() {
        let (_dir, core) = manager("core");
        let manifest = Manifest::new(
            "core",
            vec![
                ExtensionRecord::new("core", "lint", Version::new(1, 0, 0), ExtensionType::Command)
                    .with_dependency(DependencySpec::required("missing", "*")),
            ],
        );
        let report = core.import_extension_manifest(&manifest, false).unwrap();
        assert_eq!(report.accepted, vec![SlotId::new("core", "lint")]);
        assert!(!report.validation.valid);
        assert_eq!(report.validation.errors().count(), 1);
    }

    #[test]
    fn import_of_foreign_manifest_fails() {
        let (_dir, manager) = manager("core");
        let manifest = Manifest::new("other", Vec::new());
        assert!(matches!(
            manager.import_extension_manifest(&manifest, false),
            Err(Error::ManifestPlugin { .. })
        ));
    }
}
