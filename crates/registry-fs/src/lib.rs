//! Filesystem layer for the extension registry
//!
//! Provides atomic writes, format-agnostic document storage and advisory
//! lock files with bounded retry.

pub mod config;
pub mod error;
pub mod io;
pub mod lock;
pub mod path;

pub use config::{ConfigStore, Format};
pub use error::{Error, Result};
pub use lock::{LockFile, LockPolicy};
pub use path::validate_path_segment;
