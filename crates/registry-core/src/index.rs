//! Secondary indexes over active records.
//!
//! The index is a cache: it can always be rebuilt from the active record set
//! and is never persisted.

use std::collections::{BTreeSet, HashMap};

use crate::record::{ExtensionRecord, ExtensionType, SlotId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionIndex {
    by_type: HashMap<ExtensionType, BTreeSet<SlotId>>,
    by_keyword: HashMap<String, BTreeSet<SlotId>>,
    by_name: HashMap<String, BTreeSet<SlotId>>,
}

impl ExtensionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from scratch.
    pub fn build<'a>(records: impl IntoIterator<Item = &'a ExtensionRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.insert(record);
        }
        index
    }

    pub fn insert(&mut self, record: &ExtensionRecord) {
        let slot = record.slot();
        self.by_type
            .entry(record.extension_type)
            .or_default()
            .insert(slot.clone());
        for keyword in &record.keywords {
            self.by_keyword
                .entry(keyword.to_lowercase())
                .or_default()
                .insert(slot.clone());
        }
        self.by_name
            .entry(record.name.clone())
            .or_default()
            .insert(slot);
    }

    pub fn remove(&mut self, record: &ExtensionRecord) {
        let slot = record.slot();
        remove_from(&mut self.by_type, &record.extension_type, &slot);
        for keyword in &record.keywords {
            remove_from(&mut self.by_keyword, &keyword.to_lowercase(), &slot);
        }
        remove_from(&mut self.by_name, &record.name, &slot);
    }

    /// Slots whose active record has the given type.
    pub fn of_type(&self, extension_type: ExtensionType) -> BTreeSet<SlotId> {
        self.by_type.get(&extension_type).cloned().unwrap_or_default()
    }

    /// Slots whose active record carries the keyword (case-insensitive).
    pub fn with_keyword(&self, keyword: &str) -> BTreeSet<SlotId> {
        self.by_keyword
            .get(&keyword.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Active slots with the given unqualified name, across all plugins.
    pub fn named(&self, name: &str) -> BTreeSet<SlotId> {
        self.by_name.get(name).cloned().unwrap_or_default()
    }
}

fn remove_from<K>(map: &mut HashMap<K, BTreeSet<SlotId>>, key: &K, slot: &SlotId)
where
    K: std::hash::Hash + Eq,
{
    if let Some(set) = map.get_mut(key) {
        set.remove(slot);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    fn record(plugin: &str, name: &str, ty: ExtensionType, keywords: &[&str]) -> ExtensionRecord {
        ExtensionRecord::new(plugin, name, Version::new(1, 0, 0), ty)
            .with_keywords(keywords.iter().copied())
    }

    #[test]
    fn lookups_by_type_keyword_and_name() {
        let a = record("p1", "parser", ExtensionType::Skill, &["Parse", "syntax"]);
        let b = record("p2", "parser", ExtensionType::Command, &["parse"]);
        let index = ExtensionIndex::build([&a, &b]);

        assert_eq!(index.of_type(ExtensionType::Skill).len(), 1);
        assert_eq!(index.with_keyword("PARSE").len(), 2);
        assert_eq!(
            index.named("parser").into_iter().collect::<Vec<_>>(),
            vec![SlotId::new("p1", "parser"), SlotId::new("p2", "parser")]
        );
        assert!(index.with_keyword("missing").is_empty());
    }

    #[test]
    fn remove_drops_empty_buckets() {
        let a = record("p1", "parser", ExtensionType::Skill, &["parse"]);
        let mut index = ExtensionIndex::build([&a]);
        index.remove(&a);
        assert_eq!(index, ExtensionIndex::new());
    }
}
