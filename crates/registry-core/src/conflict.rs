//! Conflict resolution between an incoming record and an occupied slot.
//!
//! The resolver only decides. It returns a [`Resolution`] describing what to
//! persist, and the [`RegistryHandle`](crate::handle::RegistryHandle) applies
//! it under the storage lock so a failed resolution leaves nothing behind.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::{ExtensionRecord, SlotId};
use crate::store::RecordStore;
use crate::version::{compare_precedence, compare_release};

/// How a name collision is settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Higher `major.minor.patch` becomes active; ties go to the later registration.
    #[default]
    LatestWins,
    /// The existing active version always stays active.
    OldestWins,
    /// Higher version by full semver precedence; ties keep the existing version.
    HigherVersion,
    /// Register the incoming record under a new, disambiguated name.
    RenameNew,
    /// Refuse the incoming record.
    RejectNew,
    /// Fold the incoming record into the existing one.
    Merge,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LatestWins => "latest_wins",
            Self::OldestWins => "oldest_wins",
            Self::HigherVersion => "higher_version",
            Self::RenameNew => "rename_new",
            Self::RejectNew => "reject_new",
            Self::Merge => "merge",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictOutcome {
    /// Incoming became active; existing moved to history.
    Replaced,
    /// Existing stayed active.
    Kept,
    /// Incoming was registered under another name.
    Renamed,
    /// Incoming was refused.
    Rejected,
    /// Incoming was folded into existing.
    Merged,
}

/// Record of one collision and how it was settled.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictEvent {
    pub incoming: ExtensionRecord,
    pub existing: ExtensionRecord,
    pub strategy: ConflictStrategy,
    pub outcome: ConflictOutcome,
}

/// What the store must do to apply a resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Persist the record and make it the active version of its slot.
    Activate(ExtensionRecord),
    /// Persist the record as a non-active historical version.
    Retain(ExtensionRecord),
    /// Persist nothing.
    Nothing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub event: ConflictEvent,
    pub action: Action,
    pub message: String,
}

/// Applies a [`ConflictStrategy`] to a collision.
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver<'a> {
    store: &'a RecordStore,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(store: &'a RecordStore) -> Self {
        Self { store }
    }

    /// Decide the outcome of registering `incoming` over the active `existing`.
    ///
    /// # Errors
    ///
    /// [`Error::Conflict`] under `RejectNew`; [`Error::MergeConflict`] when a
    /// `Merge` is not legal.
    pub fn resolve(
        &self,
        incoming: &ExtensionRecord,
        existing: &ExtensionRecord,
        strategy: ConflictStrategy,
    ) -> Result<Resolution> {
        let slot = existing.slot();
        let event = |outcome| ConflictEvent {
            incoming: incoming.clone(),
            existing: existing.clone(),
            strategy,
            outcome,
        };

        let resolution = match strategy {
            ConflictStrategy::LatestWins => match compare_release(&incoming.version, &existing.version) {
                Ordering::Less => retain(event(ConflictOutcome::Kept), incoming, existing),
                Ordering::Equal | Ordering::Greater => Resolution {
                    event: event(ConflictOutcome::Replaced),
                    action: Action::Activate(incoming.clone()),
                    message: format!(
                        "{slot}: {} replaces {} as active version",
                        incoming.version, existing.version
                    ),
                },
            },
            ConflictStrategy::HigherVersion => {
                match compare_precedence(&incoming.version, &existing.version) {
                    Ordering::Greater => Resolution {
                        event: event(ConflictOutcome::Replaced),
                        action: Action::Activate(incoming.clone()),
                        message: format!(
                            "{slot}: {} outranks {} and becomes active",
                            incoming.version, existing.version
                        ),
                    },
                    Ordering::Less | Ordering::Equal => {
                        retain(event(ConflictOutcome::Kept), incoming, existing)
                    }
                }
            }
            ConflictStrategy::OldestWins => retain(event(ConflictOutcome::Kept), incoming, existing),
            ConflictStrategy::RenameNew => self.rename(incoming, event(ConflictOutcome::Renamed)),
            ConflictStrategy::RejectNew => {
                return Err(Error::Conflict {
                    slot: slot.to_string(),
                    existing: existing.version.clone(),
                    incoming: incoming.version.clone(),
                });
            }
            ConflictStrategy::Merge => {
                let merged = merge(incoming, existing)?;
                Resolution {
                    event: event(ConflictOutcome::Merged),
                    action: Action::Activate(merged),
                    message: format!("{slot}: merged {} into {}", incoming.version, existing.version),
                }
            }
        };

        Ok(resolution)
    }

    /// Register under `name__plugin`, then `name__plugin_2`, ... until a free
    /// slot (or one already holding this exact record) is found.
    fn rename(&self, incoming: &ExtensionRecord, event: ConflictEvent) -> Resolution {
        let base = format!("{}__{}", incoming.name, incoming.plugin_name);
        let mut suffix = 1u32;
        loop {
            let name = if suffix == 1 {
                base.clone()
            } else {
                format!("{base}_{suffix}")
            };
            let mut renamed = incoming.clone();
            renamed.name = name;
            let slot = renamed.slot();

            match self.store.get_version(&slot, &renamed.version) {
                Some(stored) if stored.same_content(&renamed) => {
                    return Resolution {
                        event,
                        action: Action::Nothing,
                        message: format!("{} already registered as {slot}", incoming.slot()),
                    };
                }
                None if !self.store.contains_slot(&slot) => {
                    return Resolution {
                        event,
                        message: format!("{} registered as {slot}", incoming.slot()),
                        action: Action::Activate(renamed),
                    };
                }
                _ => suffix += 1,
            }
        }
    }
}

/// Keep the existing version active and file the incoming one as history.
fn retain(event: ConflictEvent, incoming: &ExtensionRecord, existing: &ExtensionRecord) -> Resolution {
    let slot = existing.slot();
    if incoming.version == existing.version {
        // One record per key: the stored one stays, the incoming one is dropped.
        return Resolution {
            event,
            action: Action::Nothing,
            message: format!(
                "{slot}: version {} already active, incoming record discarded",
                existing.version
            ),
        };
    }
    Resolution {
        event,
        action: Action::Retain(incoming.clone()),
        message: format!(
            "{slot}: {} stays active, {} kept in history",
            existing.version, incoming.version
        ),
    }
}

/// Merge `incoming` into `existing`, keeping the existing identity.
pub fn merge(incoming: &ExtensionRecord, existing: &ExtensionRecord) -> Result<ExtensionRecord> {
    let slot: SlotId = existing.slot();
    if incoming.extension_type != existing.extension_type {
        return Err(Error::MergeConflict {
            slot: slot.to_string(),
            reason: format!(
                "extension types differ ({} vs {})",
                existing.extension_type, incoming.extension_type
            ),
        });
    }

    let colliding: Vec<&str> = incoming
        .metadata
        .keys()
        .filter(|k| existing.metadata.contains_key(*k))
        .map(String::as_str)
        .collect();
    if !colliding.is_empty() {
        return Err(Error::MergeConflict {
            slot: slot.to_string(),
            reason: format!("metadata keys collide: {}", colliding.join(", ")),
        });
    }

    let mut merged = existing.clone();
    merged.keywords.extend(incoming.keywords.iter().cloned());
    for dep in &incoming.dependencies {
        let duplicate = merged
            .dependencies
            .iter()
            .any(|d| d.name == dep.name && d.version_constraint == dep.version_constraint);
        if !duplicate {
            merged.dependencies.push(dep.clone());
        }
    }
    merged
        .metadata
        .extend(incoming.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DependencySpec, ExtensionType};
    use pretty_assertions::assert_eq;
    use semver::Version;
    use serde_json::json;
    use tempfile::tempdir;

    fn rec(version: &str) -> ExtensionRecord {
        ExtensionRecord::new(
            "plugin-a",
            "parser",
            Version::parse(version).unwrap(),
            ExtensionType::Skill,
        )
    }

    fn resolve(incoming: &str, existing: &str, strategy: ConflictStrategy) -> Result<Resolution> {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        ConflictResolver::new(&store).resolve(&rec(incoming), &rec(existing), strategy)
    }

    #[test]
    fn latest_wins_activates_newer() {
        let r = resolve("2.0.0", "1.0.0", ConflictStrategy::LatestWins).unwrap();
        assert_eq!(r.event.outcome, ConflictOutcome::Replaced);
        assert!(matches!(r.action, Action::Activate(ref record) if record.version == Version::new(2, 0, 0)));
    }

    #[test]
    fn latest_wins_keeps_newer_existing() {
        let r = resolve("1.0.0", "2.0.0", ConflictStrategy::LatestWins).unwrap();
        assert_eq!(r.event.outcome, ConflictOutcome::Kept);
        assert!(matches!(r.action, Action::Retain(_)));
    }

    #[test]
    fn latest_wins_tie_goes_to_later_registration() {
        let r = resolve("1.0.0-rc.1", "1.0.0", ConflictStrategy::LatestWins).unwrap();
        assert_eq!(r.event.outcome, ConflictOutcome::Replaced);
    }

    #[test]
    fn higher_version_uses_prerelease_precedence() {
        let r = resolve("1.0.0-rc.1", "1.0.0", ConflictStrategy::HigherVersion).unwrap();
        assert_eq!(r.event.outcome, ConflictOutcome::Kept);
        assert!(matches!(r.action, Action::Retain(_)));

        let r = resolve("1.0.0", "1.0.0-rc.1", ConflictStrategy::HigherVersion).unwrap();
        assert_eq!(r.event.outcome, ConflictOutcome::Replaced);
    }

    #[test]
    fn higher_version_tie_keeps_existing() {
        let r = resolve("1.0.0", "1.0.0", ConflictStrategy::HigherVersion).unwrap();
        assert_eq!(r.event.outcome, ConflictOutcome::Kept);
        assert_eq!(r.action, Action::Nothing);
    }

    #[test]
    fn oldest_wins_always_keeps_existing() {
        let r = resolve("9.0.0", "1.0.0", ConflictStrategy::OldestWins).unwrap();
        assert_eq!(r.event.outcome, ConflictOutcome::Kept);
        assert!(matches!(r.action, Action::Retain(_)));
    }

    #[test]
    fn reject_new_returns_conflict_error() {
        let err = resolve("2.0.0", "1.0.0", ConflictStrategy::RejectNew).unwrap_err();
        assert!(matches!(err, Error::Conflict { ref slot, .. } if slot == "plugin-a:parser"));
    }

    #[test]
    fn rename_new_creates_disambiguated_slot() {
        let r = resolve("2.0.0", "1.0.0", ConflictStrategy::RenameNew).unwrap();
        assert_eq!(r.event.outcome, ConflictOutcome::Renamed);
        match r.action {
            Action::Activate(record) => assert_eq!(record.name, "parser__plugin-a"),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn rename_new_skips_taken_names() {
        let dir = tempdir().unwrap();
        let mut store = RecordStore::open(dir.path()).unwrap();
        let mut taken = rec("5.0.0");
        taken.name = "parser__plugin-a".into();
        store.put(taken).unwrap();

        let r = ConflictResolver::new(&store)
            .resolve(&rec("2.0.0"), &rec("1.0.0"), ConflictStrategy::RenameNew)
            .unwrap();
        match r.action {
            Action::Activate(record) => assert_eq!(record.name, "parser__plugin-a_2"),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn merge_unions_keywords_and_dedups_dependencies() {
        let existing = rec("1.0.0")
            .with_keywords(["parse"])
            .with_dependency(DependencySpec::required("lexer", "^1.0.0"))
            .with_metadata("owner", json!("a"));
        let incoming = rec("1.1.0")
            .with_keywords(["ast"])
            .with_dependency(DependencySpec::required("lexer", "^1.0.0"))
            .with_dependency(DependencySpec::optional("printer", "*"))
            .with_metadata("docs", json!("https://example.com"));

        let merged = merge(&incoming, &existing).unwrap();
        assert_eq!(merged.version, Version::new(1, 0, 0));
        assert_eq!(
            merged.keywords.iter().collect::<Vec<_>>(),
            vec!["ast", "parse"]
        );
        assert_eq!(merged.dependencies.len(), 2);
        assert_eq!(merged.metadata.len(), 2);
    }

    #[test]
    fn merge_with_colliding_metadata_is_rejected() {
        let existing = rec("1.0.0").with_metadata("owner", json!("a"));
        let incoming = rec("1.1.0").with_metadata("owner", json!("b"));
        let err = merge(&incoming, &existing).unwrap_err();
        assert!(matches!(err, Error::MergeConflict { ref reason, .. } if reason.contains("owner")));
    }

    #[test]
    fn merge_with_different_types_is_rejected() {
        let existing = rec("1.0.0");
        let mut incoming = rec("1.1.0");
        incoming.extension_type = ExtensionType::Command;
        assert!(matches!(
            merge(&incoming, &existing),
            Err(Error::MergeConflict { .. })
        ));
    }
}
