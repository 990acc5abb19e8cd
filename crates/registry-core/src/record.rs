//! Extension records and their dependency declarations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::version::VersionConstraint;

/// Separator between plugin and extension name in a qualified reference.
pub const QUALIFIER: char = ':';

/// Free-form metadata attached to a record. Never interpreted by the registry.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Kind of capability an extension provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionType {
    Skill,
    Command,
    Agent,
    Hook,
    Pattern,
    Utility,
    Workflow,
}

impl ExtensionType {
    pub const ALL: [ExtensionType; 7] = [
        Self::Skill,
        Self::Command,
        Self::Agent,
        Self::Hook,
        Self::Pattern,
        Self::Utility,
        Self::Workflow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::Command => "command",
            Self::Agent => "agent",
            Self::Hook => "hook",
            Self::Pattern => "pattern",
            Self::Utility => "utility",
            Self::Workflow => "workflow",
        }
    }
}

impl fmt::Display for ExtensionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExtensionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::NotFound(format!("extension type '{s}'")))
    }
}

/// How well an extension supports the host runtime. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatibilityLevel {
    #[default]
    Full,
    Partial,
    Experimental,
}

/// Identity of a logical extension slot: `(plugin_name, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId {
    pub plugin: String,
    pub name: String,
}

impl SlotId {
    pub fn new(plugin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            name: name.into(),
        }
    }

    /// Parse a `plugin:name` reference.
    pub fn parse_qualified(reference: &str) -> Option<Self> {
        let (plugin, name) = reference.split_once(QUALIFIER)?;
        if plugin.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(plugin, name))
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{QUALIFIER}{}", self.plugin, self.name)
    }
}

/// A directed edge from the owning record to a capability it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Target name, either `name` or plugin-qualified `plugin:name`.
    pub name: String,
    /// Raw constraint expression, parsed lazily.
    pub version_constraint: String,
    #[serde(default)]
    pub optional: bool,
}

impl DependencySpec {
    pub fn required(name: impl Into<String>, version_constraint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_constraint: version_constraint.into(),
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>, version_constraint: impl Into<String>) -> Self {
        Self {
            optional: true,
            ..Self::required(name, version_constraint)
        }
    }

    /// The plugin-qualified target, if the name is qualified.
    pub fn qualified_target(&self) -> Option<SlotId> {
        SlotId::parse_qualified(&self.name)
    }

    /// Parse the version constraint.
    pub fn constraint(&self) -> Result<VersionConstraint> {
        VersionConstraint::parse(&self.version_constraint)
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version_constraint)?;
        if self.optional {
            f.write_str(" (optional)")?;
        }
        Ok(())
    }
}

/// One registered capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionRecord {
    pub name: String,
    pub version: Version,
    pub plugin_name: String,
    pub extension_type: ExtensionType,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    #[serde(default)]
    pub compatibility_level: CompatibilityLevel,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    pub entry_point: String,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ExtensionRecord {
    /// Create a record with empty keywords, dependencies and metadata.
    pub fn new(
        plugin_name: impl Into<String>,
        name: impl Into<String>,
        version: Version,
        extension_type: ExtensionType,
    ) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            version,
            plugin_name: plugin_name.into(),
            extension_type,
            description: String::new(),
            keywords: BTreeSet::new(),
            compatibility_level: CompatibilityLevel::default(),
            dependencies: Vec::new(),
            entry_point: String::new(),
            registered_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn slot(&self) -> SlotId {
        SlotId::new(&self.plugin_name, &self.name)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn with_dependency(mut self, dependency: DependencySpec) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_compatibility(mut self, level: CompatibilityLevel) -> Self {
        self.compatibility_level = level;
        self
    }

    /// Check names and dependency constraints before the record is stored.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidName`] for names unusable as storage keys,
    /// [`Error::InvalidConstraint`] for any unparsable dependency constraint.
    pub fn validate(&self) -> Result<()> {
        registry_fs::validate_path_segment(&self.plugin_name)?;
        registry_fs::validate_path_segment(&self.name)?;

        for dep in &self.dependencies {
            let target = dep.name.as_str();
            let valid_target = match dep.qualified_target() {
                Some(slot) => {
                    registry_fs::validate_path_segment(&slot.plugin).is_ok()
                        && registry_fs::validate_path_segment(&slot.name).is_ok()
                }
                None => registry_fs::validate_path_segment(target).is_ok(),
            };
            if !valid_target {
                return Err(Error::InvalidName {
                    name: target.to_string(),
                    reason: "dependency target must be 'name' or 'plugin:name'".to_string(),
                });
            }
            dep.constraint()?;
        }
        Ok(())
    }

    /// Equality on every field except `registered_at`.
    pub fn same_content(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.plugin_name == other.plugin_name
            && self.extension_type == other.extension_type
            && self.title == other.title
            && self.description == other.description
            && self.keywords == other.keywords
            && self.compatibility_level == other.compatibility_level
            && self.dependencies == other.dependencies
            && self.entry_point == other.entry_point
            && self.metadata == other.metadata
    }
}
