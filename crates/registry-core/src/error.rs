//! Error types for registry-core

use std::path::PathBuf;

/// Result type for registry-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned synchronously by registry operations.
///
/// Dependency-graph problems (cycles, missing or ambiguous targets) found
/// during validation are aggregated into a
/// [`ValidationReport`](crate::dependency::ValidationReport) instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A version constraint expression could not be parsed.
    #[error("invalid version constraint '{constraint}': {reason}")]
    InvalidConstraint { constraint: String, reason: String },

    /// A concrete version string is not valid semver.
    #[error("invalid version '{version}': {source}")]
    InvalidVersion {
        version: String,
        #[source]
        source: semver::Error,
    },

    /// A plugin or extension name cannot be used as a registry key.
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Registration collided with an existing slot under a rejecting strategy.
    #[error("extension {slot} already has active version {existing}; incoming {incoming} rejected")]
    Conflict {
        slot: String,
        existing: semver::Version,
        incoming: semver::Version,
    },

    /// A `Merge` registration could not be merged.
    #[error("cannot merge into {slot}: {reason}")]
    MergeConflict { slot: String, reason: String },

    /// Required dependencies form a cycle, so no load order exists.
    #[error("dependency cycle among: {}", participants.join(", "))]
    DependencyCycle { participants: Vec<String> },

    /// An unqualified extension name matched more than one plugin.
    #[error("extension name '{name}' is ambiguous; qualify it as one of: {}", candidates.join(", "))]
    AmbiguousDependency {
        name: String,
        candidates: Vec<String>,
    },

    /// The storage root is locked by another writer.
    #[error("registry at {root} is busy")]
    RegistryBusy { root: PathBuf },

    /// No record matches the requested key.
    #[error("not found: {0}")]
    NotFound(String),

    /// A manifest was applied to the wrong plugin.
    #[error("manifest for plugin '{manifest}' contains record owned by '{record}'")]
    ManifestPlugin { manifest: String, record: String },

    /// Filesystem error from registry-fs
    #[error(transparent)]
    Fs(registry_fs::Error),

    /// YAML serialization/deserialization error
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<registry_fs::Error> for Error {
    fn from(err: registry_fs::Error) -> Self {
        match err {
            registry_fs::Error::LockBusy { path } => Self::RegistryBusy {
                root: path.parent().map(|p| p.to_path_buf()).unwrap_or(path),
            },
            registry_fs::Error::InvalidSegment { segment, reason } => Self::InvalidName {
                name: segment,
                reason,
            },
            other => Self::Fs(other),
        }
    }
}
