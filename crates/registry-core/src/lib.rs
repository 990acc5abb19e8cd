//! Namespaced extension registry.
//!
//! Plugins register versioned capabilities (skills, commands, agents, ...),
//! declare semver-constrained dependencies on each other and discover what
//! is available at load time. Naming collisions are settled by a
//! configurable [`ConflictStrategy`], and the dependency graph is validated
//! for cycles and unsatisfiable constraints after every change.
//!
//! Entry points are [`RegistryHandle`], which owns a storage root, and
//! [`RegistryManager`], which binds a handle to one plugin.

pub mod config;
pub mod conflict;
pub mod dependency;
pub mod discovery;
pub mod error;
pub mod handle;
pub mod index;
pub mod logging;
pub mod manager;
pub mod manifest;
pub mod record;
pub mod store;
pub mod version;

pub use config::RegistryConfig;
pub use conflict::{ConflictEvent, ConflictOutcome, ConflictResolver, ConflictStrategy};
pub use dependency::{
    Cycle, DependencyGraph, DependencyReport, DependencyStatus, Issue, IssueKind, Severity,
    ValidationReport,
};
pub use discovery::Discovery;
pub use error::{Error, Result};
pub use handle::{Registration, RegistrationOutcome, RegistryHandle, Removal};
pub use manager::{ExtensionRegistration, RegistrationReport, RegistryManager};
pub use manifest::{ImportReport, Manifest};
pub use record::{
    CompatibilityLevel, DependencySpec, ExtensionRecord, ExtensionType, Metadata, SlotId,
};
pub use store::{RecordFilter, RecordStore};
pub use version::VersionConstraint;
