//! Read-only queries over active records.

use std::collections::BTreeSet;

use crate::dependency::resolve_name;
use crate::error::{Error, Result};
use crate::record::{ExtensionRecord, ExtensionType, SlotId};
use crate::store::RecordStore;
use crate::version::VersionConstraint;

/// Query engine borrowing a loaded store.
#[derive(Debug, Clone, Copy)]
pub struct Discovery<'a> {
    store: &'a RecordStore,
}

impl<'a> Discovery<'a> {
    pub fn new(store: &'a RecordStore) -> Self {
        Self { store }
    }

    /// Active records matching every given filter, sorted by `(plugin, name)`.
    ///
    /// With no filters every active record is returned. A record matches the
    /// keyword filter only if it carries all of the keywords.
    pub fn discover(
        &self,
        extension_type: Option<ExtensionType>,
        keywords: Option<&[&str]>,
    ) -> Vec<&'a ExtensionRecord> {
        let index = self.store.index();
        let mut selected: Option<BTreeSet<SlotId>> = extension_type.map(|t| index.of_type(t));

        for keyword in keywords.unwrap_or_default() {
            let matching = index.with_keyword(keyword);
            selected = Some(match selected {
                Some(current) => current.intersection(&matching).cloned().collect(),
                None => matching,
            });
        }

        match selected {
            Some(slots) => slots
                .iter()
                .filter_map(|slot| self.store.get_active(slot))
                .collect(),
            None => self.store.active_records().collect(),
        }
    }

    /// The active record for `name` if it satisfies `constraint`.
    ///
    /// `name` may be plugin-qualified. Superseded versions are never
    /// returned, even when one of them would satisfy the constraint.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConstraint`] for an unparsable constraint and
    /// [`Error::AmbiguousDependency`] when an unqualified name exists in
    /// several plugins.
    pub fn find_extension_for_dependency(
        &self,
        name: &str,
        constraint: &str,
    ) -> Result<Option<&'a ExtensionRecord>> {
        let constraint = VersionConstraint::parse(constraint)?;
        let slot = match resolve_name(self.store, name).as_slice() {
            [] => return Ok(None),
            [single] => single.clone(),
            many => {
                return Err(Error::AmbiguousDependency {
                    name: name.to_string(),
                    candidates: many.iter().map(ToString::to_string).collect(),
                });
            }
        };

        let found = self
            .store
            .get_active(&slot)
            .filter(|record| constraint.matches(&record.version));
        tracing::debug!(%name, %constraint, found = found.is_some(), "dependency lookup");
        Ok(found)
    }

    /// Case-insensitive substring search over name, title, description and
    /// keywords of active records.
    pub fn search(&self, text: &str) -> Vec<&'a ExtensionRecord> {
        let needle = text.to_lowercase();
        self.store
            .active_records()
            .filter(|record| {
                record.name.to_lowercase().contains(&needle)
                    || record.title.to_lowercase().contains(&needle)
                    || record.description.to_lowercase().contains(&needle)
                    || record
                        .keywords
                        .iter()
                        .any(|kw| kw.to_lowercase().contains(&needle))
            })
            .collect()
    }
}
