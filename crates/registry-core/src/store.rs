//! Durable storage of extension records.
//!
//! Layout under the store directory:
//!
//! ```text
//! <plugin>/<name>/<version>.yaml   one file per retained version
//! <plugin>/<name>/slot.yaml        active version pointer
//! ```
//!
//! Record files and slot pointers are the source of truth. The in-memory
//! [`ExtensionIndex`] is rebuilt from them on load and kept current on every
//! mutation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};

use registry_fs::{ConfigStore, io};

use crate::error::{Error, Result};
use crate::index::ExtensionIndex;
use crate::record::{ExtensionRecord, ExtensionType, SlotId};
use crate::version::compare_precedence;

/// File holding the active version pointer of a slot.
pub const SLOT_FILENAME: &str = "slot.yaml";

const RECORD_EXTENSION: &str = "yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlotPointer {
    active: Version,
}

/// All retained versions of one slot and which of them is active.
#[derive(Debug, Clone, Default)]
struct SlotEntry {
    active: Option<Version>,
    versions: BTreeMap<Version, ExtensionRecord>,
}

impl SlotEntry {
    fn active_record(&self) -> Option<&ExtensionRecord> {
        self.active.as_ref().and_then(|v| self.versions.get(v))
    }

    /// Highest retained version by semver precedence.
    fn highest(&self) -> Option<Version> {
        self.versions
            .keys()
            .max_by(|a, b| compare_precedence(a, b).then_with(|| a.cmp(b)))
            .cloned()
    }
}

/// Filter for [`RecordStore::list`]. Empty filter lists every active record.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub plugin: Option<String>,
    pub extension_type: Option<ExtensionType>,
    pub keyword: Option<String>,
    /// Include superseded versions, not just active ones.
    pub include_history: bool,
}

impl RecordFilter {
    pub fn plugin(plugin: impl Into<String>) -> Self {
        Self {
            plugin: Some(plugin.into()),
            ..Self::default()
        }
    }

    fn accepts(&self, record: &ExtensionRecord) -> bool {
        self.plugin
            .as_deref()
            .is_none_or(|p| record.plugin_name == p)
            && self
                .extension_type
                .is_none_or(|t| record.extension_type == t)
            && self.keyword.as_deref().is_none_or(|k| {
                record
                    .keywords
                    .iter()
                    .any(|kw| kw.eq_ignore_ascii_case(k))
            })
    }
}

/// Keyed record storage with one active version per slot.
#[derive(Debug)]
pub struct RecordStore {
    dir: PathBuf,
    documents: ConfigStore,
    slots: BTreeMap<SlotId, SlotEntry>,
    index: ExtensionIndex,
}

impl RecordStore {
    /// Open the store rooted at `dir`, loading every record found there.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self {
            dir: dir.into(),
            documents: ConfigStore::new(),
            slots: BTreeMap::new(),
            index: ExtensionIndex::new(),
        };
        store.reload()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Discard in-memory state and load everything from disk again.
    pub fn reload(&mut self) -> Result<()> {
        self.slots.clear();

        for plugin_dir in read_subdirs(&self.dir)? {
            for slot_dir in read_subdirs(&plugin_dir)? {
                let Some(slot) = slot_from_dirs(&plugin_dir, &slot_dir) else {
                    continue;
                };
                let entry = self.load_slot(&slot, &slot_dir)?;
                if !entry.versions.is_empty() {
                    self.slots.insert(slot, entry);
                }
            }
        }

        self.rebuild_index();
        tracing::debug!(dir = %self.dir.display(), slots = self.slots.len(), "record store loaded");
        Ok(())
    }

    fn load_slot(&self, slot: &SlotId, slot_dir: &Path) -> Result<SlotEntry> {
        let mut entry = SlotEntry::default();

        let dir_entries = fs::read_dir(slot_dir).map_err(|e| registry_fs::Error::io(slot_dir, e))?;
        for dir_entry in dir_entries {
            let dir_entry = dir_entry.map_err(|e| registry_fs::Error::io(slot_dir, e))?;
            let path = dir_entry.path();
            let file_name = dir_entry.file_name().to_string_lossy().into_owned();

            if file_name == SLOT_FILENAME
                || io::is_temp_file(&file_name)
                || path.extension().is_none_or(|e| e != RECORD_EXTENSION)
            {
                continue;
            }

            let record: ExtensionRecord = match self.documents.load(&path) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record");
                    continue;
                }
            };
            if record.slot() != *slot || format!("{}.{RECORD_EXTENSION}", record.version) != file_name {
                tracing::warn!(path = %path.display(), "record does not match its storage key, skipping");
                continue;
            }
            entry.versions.insert(record.version.clone(), record);
        }

        let pointer_path = slot_dir.join(SLOT_FILENAME);
        let pointed = match self.documents.load_or_default::<Option<SlotPointer>>(&pointer_path) {
            Ok(pointer) => pointer.map(|p| p.active),
            Err(e) => {
                tracing::warn!(path = %pointer_path.display(), error = %e, "unreadable slot pointer");
                None
            }
        };

        entry.active = match pointed {
            Some(version) if entry.versions.contains_key(&version) => Some(version),
            _ if entry.versions.is_empty() => None,
            _ => {
                let fallback = entry.highest();
                tracing::warn!(%slot, ?fallback, "slot pointer missing or stale, activating highest version");
                fallback
            }
        };
        Ok(entry)
    }

    /// Rebuild the secondary index from the active records.
    pub fn rebuild_index(&mut self) {
        self.index = ExtensionIndex::build(self.slots.values().filter_map(SlotEntry::active_record));
    }

    pub fn index(&self) -> &ExtensionIndex {
        &self.index
    }

    fn slot_dir(&self, slot: &SlotId) -> PathBuf {
        self.dir.join(&slot.plugin).join(&slot.name)
    }

    fn record_path(&self, slot: &SlotId, version: &Version) -> PathBuf {
        self.slot_dir(slot)
            .join(format!("{version}.{RECORD_EXTENSION}"))
    }

    /// Persist a record without changing which version is active.
    ///
    /// Overwrites an existing record with the same `(plugin, name, version)`.
    /// A record for a previously unknown slot becomes its active version.
    pub fn put(&mut self, record: ExtensionRecord) -> Result<()> {
        record.validate()?;
        let slot = record.slot();
        let path = self.record_path(&slot, &record.version);
        self.documents.save(&path, &record)?;

        let is_active = self
            .slots
            .get(&slot)
            .and_then(|e| e.active.as_ref())
            .is_some_and(|v| *v == record.version);
        let is_new_slot = !self.slots.contains_key(&slot);

        if is_active {
            if let Some(old) = self.get_active(&slot) {
                let old = old.clone();
                self.index.remove(&old);
            }
            self.index.insert(&record);
        }

        let version = record.version.clone();
        self.slots
            .entry(slot.clone())
            .or_default()
            .versions
            .insert(version.clone(), record);

        if is_new_slot {
            self.set_active(&slot, &version)?;
        }
        Ok(())
    }

    /// Persist a record and make it the active version of its slot.
    pub fn put_active(&mut self, record: ExtensionRecord) -> Result<()> {
        let slot = record.slot();
        let version = record.version.clone();
        self.put(record)?;
        self.set_active(&slot, &version)
    }

    /// Point a slot at one of its retained versions.
    pub fn set_active(&mut self, slot: &SlotId, version: &Version) -> Result<()> {
        let entry = self
            .slots
            .get(slot)
            .ok_or_else(|| Error::NotFound(slot.to_string()))?;
        if !entry.versions.contains_key(version) {
            return Err(Error::NotFound(format!("{slot}@{version}")));
        }
        if entry.active.as_ref() == Some(version) {
            return Ok(());
        }

        let pointer_path = self.slot_dir(slot).join(SLOT_FILENAME);
        self.documents.save(
            &pointer_path,
            &SlotPointer {
                active: version.clone(),
            },
        )?;

        if let Some(old) = entry.active_record() {
            let old = old.clone();
            self.index.remove(&old);
        }
        if let Some(entry) = self.slots.get_mut(slot) {
            entry.active = Some(version.clone());
        }
        if let Some(new) = self.get_active(slot) {
            let new = new.clone();
            self.index.insert(&new);
        }
        Ok(())
    }

    /// The active record of a slot.
    pub fn get_active(&self, slot: &SlotId) -> Option<&ExtensionRecord> {
        self.slots.get(slot).and_then(SlotEntry::active_record)
    }

    /// A specific retained version of a slot.
    pub fn get_version(&self, slot: &SlotId, version: &Version) -> Option<&ExtensionRecord> {
        self.slots.get(slot).and_then(|e| e.versions.get(version))
    }

    /// Every retained version of a slot, lowest precedence first.
    pub fn history(&self, slot: &SlotId) -> Vec<&ExtensionRecord> {
        let mut records: Vec<&ExtensionRecord> = self
            .slots
            .get(slot)
            .map(|e| e.versions.values().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| compare_precedence(&a.version, &b.version));
        records
    }

    pub fn contains_slot(&self, slot: &SlotId) -> bool {
        self.slots.contains_key(slot)
    }

    /// Active records sorted by `(plugin_name, name)`.
    pub fn active_records(&self) -> impl Iterator<Item = &ExtensionRecord> {
        self.slots.values().filter_map(SlotEntry::active_record)
    }

    /// Records accepted by `filter`, sorted by `(plugin_name, name)` then version.
    pub fn list(&self, filter: &RecordFilter) -> Vec<&ExtensionRecord> {
        let mut out = Vec::new();
        for entry in self.slots.values() {
            if filter.include_history {
                let mut versions: Vec<&ExtensionRecord> =
                    entry.versions.values().filter(|r| filter.accepts(r)).collect();
                versions.sort_by(|a, b| compare_precedence(&a.version, &b.version));
                out.extend(versions);
            } else if let Some(record) = entry.active_record().filter(|r| filter.accepts(r)) {
                out.push(record);
            }
        }
        out
    }

    /// Plugin names owning at least one slot, sorted.
    pub fn plugins(&self) -> Vec<String> {
        let mut plugins: Vec<String> = self.slots.keys().map(|s| s.plugin.clone()).collect();
        plugins.dedup();
        plugins
    }

    /// Remove one retained version.
    ///
    /// Removing the active version promotes the highest remaining version;
    /// removing the last version removes the slot.
    pub fn delete(&mut self, slot: &SlotId, version: &Version) -> Result<Option<ExtensionRecord>> {
        let Some(entry) = self.slots.get(slot) else {
            return Ok(None);
        };
        if !entry.versions.contains_key(version) {
            return Ok(None);
        }
        let was_active = entry.active.as_ref() == Some(version);

        io::remove_file(&self.record_path(slot, version))?;
        if was_active {
            if let Some(active) = self.get_active(slot) {
                let active = active.clone();
                self.index.remove(&active);
            }
        }

        let Some(entry) = self.slots.get_mut(slot) else {
            return Ok(None);
        };
        let removed = entry.versions.remove(version);
        if was_active {
            entry.active = None;
        }

        if entry.versions.is_empty() {
            self.slots.remove(slot);
            self.remove_slot_files(slot)?;
        } else if was_active {
            if let Some(promoted) = entry.highest() {
                tracing::info!(%slot, %promoted, "promoting retained version after removal");
                self.force_active(slot, &promoted)?;
            }
        }
        Ok(removed)
    }

    /// Remove every version of a slot.
    pub fn delete_slot(&mut self, slot: &SlotId) -> Result<Vec<ExtensionRecord>> {
        let Some(entry) = self.slots.remove(slot) else {
            return Ok(Vec::new());
        };
        if let Some(active) = entry.active_record() {
            self.index.remove(active);
        }
        for version in entry.versions.keys() {
            io::remove_file(&self.record_path(slot, version))?;
        }
        self.remove_slot_files(slot)?;
        Ok(entry.versions.into_values().collect())
    }

    /// Write the pointer even when the in-memory entry was cleared.
    fn force_active(&mut self, slot: &SlotId, version: &Version) -> Result<()> {
        let pointer_path = self.slot_dir(slot).join(SLOT_FILENAME);
        self.documents.save(
            &pointer_path,
            &SlotPointer {
                active: version.clone(),
            },
        )?;
        if let Some(entry) = self.slots.get_mut(slot) {
            entry.active = Some(version.clone());
        }
        if let Some(record) = self.get_active(slot) {
            let record = record.clone();
            self.index.insert(&record);
        }
        Ok(())
    }

    fn remove_slot_files(&self, slot: &SlotId) -> Result<()> {
        let slot_dir = self.slot_dir(slot);
        io::remove_file(&slot_dir.join(SLOT_FILENAME))?;
        io::remove_dir_if_empty(&slot_dir)?;
        io::remove_dir_if_empty(&self.dir.join(&slot.plugin))?;
        Ok(())
    }
}

fn read_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(registry_fs::Error::io(dir, e).into()),
    };
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| registry_fs::Error::io(dir, e))?;
        if entry.file_type().map_err(|e| registry_fs::Error::io(dir, e))?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn slot_from_dirs(plugin_dir: &Path, slot_dir: &Path) -> Option<SlotId> {
    let plugin = plugin_dir.file_name()?.to_str()?;
    let name = slot_dir.file_name()?.to_str()?;
    Some(SlotId::new(plugin, name))
}
