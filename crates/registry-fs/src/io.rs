//! Atomic I/O operations

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Error, Result};

/// Suffix used for in-flight temporary files.
pub const TEMP_SUFFIX: &str = ".tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write content atomically to a file.
///
/// Uses write-to-temp-then-rename so a crash mid-write never leaves a
/// truncated target behind: readers see either the old content or the new.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    // Temp file lives next to the target so the rename stays on one filesystem.
    let temp_name = format!(
        ".{}.{}.{}{}",
        path.file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default(),
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed),
        TEMP_SUFFIX
    );
    let temp_path = path.with_file_name(&temp_name);

    let result = (|| {
        let mut temp_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Error::io(&temp_path, e))?;

        temp_file
            .write_all(content)
            .map_err(|e| Error::io(&temp_path, e))?;
        temp_file
            .sync_all()
            .map_err(|e| Error::io(&temp_path, e))?;

        fs::rename(&temp_path, path).map_err(|e| Error::io(path, e))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Read text content from a file.
pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Write text content to a file atomically.
pub fn write_text(path: &Path, content: &str) -> Result<()> {
    write_atomic(path, content.as_bytes())
}

/// Remove a file, treating a missing file as already removed.
///
/// Returns `true` if a file was actually deleted.
pub fn remove_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Remove a directory if it is empty. Non-empty or missing directories are left alone.
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    let mut entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(Error::io(path, e)),
    };
    if entries.next().is_some() {
        return Ok(false);
    }
    fs::remove_dir(path).map_err(|e| Error::io(path, e))?;
    Ok(true)
}

/// Whether a file name belongs to an in-flight or abandoned atomic write.
pub fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomic_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/c.yaml");

        write_text(&path, "key: value\n").unwrap();

        assert_eq!(read_text(&path).unwrap(), "key: value\n");
    }

    #[test]
    fn write_atomic_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("record.yaml");

        write_text(&path, "first").unwrap();
        write_text(&path, "second").unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["record.yaml".to_string()]);
        assert_eq!(read_text(&path).unwrap(), "second");
    }

    #[test]
    fn remove_file_missing_is_ok() {
        let dir = tempdir().unwrap();
        assert!(!remove_file(&dir.path().join("nope")).unwrap());
    }

    #[test]
    fn remove_dir_if_empty_keeps_populated_dirs() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        write_text(&sub.join("file"), "x").unwrap();

        assert!(!remove_dir_if_empty(&sub).unwrap());
        remove_file(&sub.join("file")).unwrap();
        assert!(remove_dir_if_empty(&sub).unwrap());
        assert!(!sub.exists());
    }

    #[test]
    fn temp_file_detection() {
        assert!(is_temp_file(".1.0.0.yaml.4242.0.tmp"));
        assert!(!is_temp_file("1.0.0.yaml"));
    }
}
