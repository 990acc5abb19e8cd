//! Storage-root handle with scoped write access.
//!
//! A [`RegistryHandle`] owns the in-memory copy of one storage root. Every
//! mutation runs inside [`RegistryHandle::write`]:
//!
//! 1. take the writer mutex (serializes writers in this process);
//! 2. take `<root>/registry.lock` (serializes writers across processes),
//!    retrying with bounded backoff before failing with `RegistryBusy`;
//! 3. load the on-disk state into a fresh store so changes by other
//!    processes are seen;
//! 4. apply the mutation to that store;
//! 5. swap it in under a short write guard, then release both locks.
//!
//! Readers only ever wait for step 5.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use semver::Version;

use registry_fs::LockFile;

use crate::config::{EXTENSIONS_DIR, LOCK_FILENAME, RegistryConfig};
use crate::conflict::{Action, ConflictEvent, ConflictOutcome, ConflictResolver, ConflictStrategy};
use crate::dependency::{DependencyGraph, IssueKind, ValidationReport};
use crate::error::{Error, Result};
use crate::manifest::{ImportReport, Manifest};
use crate::record::{ExtensionRecord, SlotId};
use crate::store::{RecordFilter, RecordStore};

/// How a registration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The slot was empty; the record is now its active version.
    Inserted,
    /// An identical record was already stored. Nothing changed.
    Unchanged,
    /// The slot was occupied and a conflict strategy decided.
    Resolved(ConflictOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub outcome: RegistrationOutcome,
    /// The record as stored: renamed or merged when the strategy did so,
    /// or the previously stored record when nothing changed.
    pub record: ExtensionRecord,
    pub event: Option<ConflictEvent>,
    /// False when nothing was written: the record was already present or
    /// the strategy discarded it.
    pub persisted: bool,
    pub message: String,
}

impl Registration {
    /// Whether the registered record is now the active version of its slot.
    pub fn is_active(&self) -> bool {
        matches!(
            self.outcome,
            RegistrationOutcome::Inserted
                | RegistrationOutcome::Resolved(
                    ConflictOutcome::Replaced | ConflictOutcome::Renamed | ConflictOutcome::Merged
                )
        )
    }
}

/// What a removal took out and how the graph looks afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    pub removed: Vec<ExtensionRecord>,
    /// Whole-registry validation after the removal; dependents left without
    /// their target show up here.
    pub validation: ValidationReport,
}

/// Shared access to one registry storage root.
///
/// `RegistryHandle` is `Send + Sync`; wrap it in an `Arc` to share it
/// between threads.
#[derive(Debug)]
pub struct RegistryHandle {
    root: PathBuf,
    config: RegistryConfig,
    writer: Mutex<()>,
    store: RwLock<RecordStore>,
}

impl RegistryHandle {
    /// Open a storage root, creating it if needed, with the configuration
    /// found in its `registry.toml`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| registry_fs::Error::io(&root, e))?;
        let config = RegistryConfig::load(&root)?;
        Self::with_config(root, config)
    }

    /// Open a storage root with an explicit configuration.
    pub fn with_config(root: impl Into<PathBuf>, config: RegistryConfig) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| registry_fs::Error::io(&root, e))?;
        let store = RecordStore::open(root.join(EXTENSIONS_DIR))?;
        tracing::debug!(root = %root.display(), "opened registry");
        Ok(Self {
            root,
            config,
            writer: Mutex::new(()),
            store: RwLock::new(store),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Run `f` against the current in-memory state.
    pub fn read<R>(&self, f: impl FnOnce(&RecordStore) -> R) -> R {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        f(&store)
    }

    /// Run `f` with exclusive access to freshly reloaded state.
    ///
    /// Readers keep seeing the previous state until `f` returns; the store
    /// `f` worked on is published whether or not it succeeded, since it
    /// mirrors what is on disk.
    ///
    /// # Errors
    ///
    /// [`Error::RegistryBusy`] when the storage lock stays held by another
    /// writer past the configured retry budget, or any error from `f`.
    pub fn write<R>(&self, f: impl FnOnce(&mut RecordStore) -> Result<R>) -> Result<R> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _lock = LockFile::acquire(&self.root.join(LOCK_FILENAME), &self.config.lock)?;

        let mut next = RecordStore::open(self.root.join(EXTENSIONS_DIR))?;
        let result = f(&mut next);
        *self.store.write().unwrap_or_else(PoisonError::into_inner) = next;
        result
    }

    /// Reload the in-memory state from disk.
    pub fn refresh(&self) -> Result<()> {
        self.write(|_| Ok(()))
    }

    /// Register one record, settling collisions with `strategy`.
    ///
    /// # Errors
    ///
    /// Invalid names or constraints, [`Error::Conflict`] under
    /// [`ConflictStrategy::RejectNew`], [`Error::MergeConflict`], busy or
    /// storage failures. Nothing is persisted on error.
    pub fn register(
        &self,
        record: ExtensionRecord,
        strategy: ConflictStrategy,
    ) -> Result<Registration> {
        record.validate()?;
        let slot = record.slot();

        let registration = self.write(|store| {
            let identical = store
                .get_version(&slot, &record.version)
                .filter(|stored| stored.same_content(&record))
                .cloned();
            let active = store.get_active(&slot).cloned();

            if let Some(stored) = &identical {
                if active.as_ref().is_some_and(|a| a.version == stored.version) {
                    return Ok(unchanged(&slot, stored.clone()));
                }
            }

            let Some(existing) = active else {
                store.put_active(record.clone())?;
                return Ok(Registration {
                    outcome: RegistrationOutcome::Inserted,
                    message: format!("registered {slot}@{}", record.version),
                    record,
                    event: None,
                    persisted: true,
                });
            };

            let resolution = match ConflictResolver::new(store).resolve(&record, &existing, strategy) {
                Ok(resolution) => resolution,
                Err(e) => match identical {
                    Some(stored) => return Ok(unchanged(&slot, stored)),
                    None => {
                        tracing::warn!(%slot, %strategy, outcome = ?ConflictOutcome::Rejected, "{e}");
                        return Err(e);
                    }
                },
            };

            // A retained copy of the record is only ever re-activated, never
            // rewritten or folded into another record.
            if let Some(stored) = identical {
                return match resolution.action {
                    Action::Activate(r) if r.slot() == slot && r.version == stored.version => {
                        store.set_active(&slot, &stored.version)?;
                        Ok(Registration {
                            outcome: RegistrationOutcome::Resolved(resolution.event.outcome),
                            record: stored,
                            event: Some(resolution.event),
                            persisted: true,
                            message: resolution.message,
                        })
                    }
                    _ => Ok(unchanged(&slot, stored)),
                };
            }

            let (stored, persisted) = match resolution.action {
                Action::Activate(r) => {
                    store.put_active(r.clone())?;
                    (r, true)
                }
                Action::Retain(r) => {
                    store.put(r.clone())?;
                    (r, true)
                }
                Action::Nothing => (existing, false),
            };

            Ok(Registration {
                outcome: RegistrationOutcome::Resolved(resolution.event.outcome),
                record: stored,
                event: Some(resolution.event),
                persisted,
                message: resolution.message,
            })
        })?;

        tracing::info!(
            slot = %registration.record.slot(),
            version = %registration.record.version,
            outcome = ?registration.outcome,
            "{}",
            registration.message
        );
        Ok(registration)
    }

    /// Remove one version of a slot, or the whole slot when `version` is `None`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when nothing matched.
    pub fn remove(&self, slot: &SlotId, version: Option<&Version>) -> Result<Removal> {
        let removed = self.write(|store| match version {
            Some(v) => Ok(store.delete(slot, v)?.into_iter().collect::<Vec<_>>()),
            None => store.delete_slot(slot),
        })?;

        if removed.is_empty() {
            let what = match version {
                Some(v) => format!("{slot}@{v}"),
                None => slot.to_string(),
            };
            return Err(Error::NotFound(what));
        }

        let validation = self.validate();
        let broken: Vec<String> = validation
            .errors()
            .filter(|issue| match &issue.kind {
                IssueKind::Dependency { dependency, .. } => {
                    dependency.name == slot.name || dependency.name == slot.to_string()
                }
                IssueKind::Cycle(_) => false,
            })
            .map(|issue| issue.slot.to_string())
            .collect();
        if broken.is_empty() {
            tracing::info!(%slot, count = removed.len(), "removed extension");
        } else {
            tracing::warn!(%slot, count = removed.len(), dependents = ?broken, "removed extension that others depend on");
        }
        Ok(Removal { removed, validation })
    }

    /// Snapshot a plugin's active records.
    pub fn export(&self, plugin: &str) -> Manifest {
        let records = self.read(|store| {
            store
                .list(&RecordFilter::plugin(plugin))
                .into_iter()
                .cloned()
                .collect()
        });
        Manifest::new(plugin, records)
    }

    /// Register every record of `manifest`, one lock scope per record.
    ///
    /// With `overwrite` collisions resolve as [`ConflictStrategy::LatestWins`],
    /// otherwise as [`ConflictStrategy::RejectNew`]. Record-level failures
    /// are collected in the report.
    ///
    /// # Errors
    ///
    /// Storage and lock failures abort the import; records handled before
    /// the failure stay registered.
    pub fn import(&self, manifest: &Manifest, overwrite: bool) -> Result<ImportReport> {
        let strategy = if overwrite {
            ConflictStrategy::LatestWins
        } else {
            ConflictStrategy::RejectNew
        };
        let mut report = ImportReport::default();

        for record in &manifest.extensions {
            let slot = record.slot();
            if let Err(e) = manifest.check_ownership(record) {
                report.rejected.push((slot, e.to_string()));
                continue;
            }

            match self.register(record.clone(), strategy) {
                Ok(registration) => match registration.outcome {
                    RegistrationOutcome::Unchanged => report.kept.push(slot),
                    RegistrationOutcome::Resolved(ConflictOutcome::Renamed) => {
                        report.renamed.push((slot, registration.record.slot()));
                    }
                    RegistrationOutcome::Inserted | RegistrationOutcome::Resolved(_) => {
                        report.accepted.push(slot);
                    }
                },
                Err(e) if is_record_error(&e) => report.rejected.push((slot, e.to_string())),
                Err(e) => return Err(e),
            }
        }

        report.validation = self.validate();
        tracing::info!(
            plugin = %manifest.plugin,
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            renamed = report.renamed.len(),
            kept = report.kept.len(),
            valid = report.validation.valid,
            "imported manifest"
        );
        Ok(report)
    }

    /// Graph over the current active records.
    pub fn dependency_graph(&self) -> DependencyGraph {
        self.read(DependencyGraph::from_store)
    }

    /// Validate the whole registry.
    pub fn validate(&self) -> ValidationReport {
        self.dependency_graph().validate()
    }
}

fn unchanged(slot: &SlotId, stored: ExtensionRecord) -> Registration {
    Registration {
        outcome: RegistrationOutcome::Unchanged,
        message: format!("{slot}@{} already registered", stored.version),
        record: stored,
        event: None,
        persisted: false,
    }
}

/// Errors caused by the record itself rather than by storage.
fn is_record_error(error: &Error) -> bool {
    matches!(
        error,
        Error::InvalidConstraint { .. }
            | Error::InvalidVersion { .. }
            | Error::InvalidName { .. }
            | Error::Conflict { .. }
            | Error::MergeConflict { .. }
            | Error::ManifestPlugin { .. }
    )
}
