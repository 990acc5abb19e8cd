//! Validation of identifiers that become on-disk path segments

use crate::{Error, Result};

/// Validate that `segment` is safe to use as a single directory or file name.
///
/// Accepted characters are ASCII alphanumerics, `-`, `_`, `.` and `+`. The
/// segment must be non-empty, must not start with `.` and must not be a
/// relative component such as `..`.
pub fn validate_path_segment(segment: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(Error::InvalidSegment {
            segment: segment.to_string(),
            reason: reason.to_string(),
        })
    };

    if segment.is_empty() {
        return reject("must not be empty");
    }
    if segment.starts_with('.') {
        return reject("must not start with '.'");
    }
    if let Some(c) = segment
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+')))
    {
        return reject(&format!("contains disallowed character {c:?}"));
    }
    Ok(())
}
