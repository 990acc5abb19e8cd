//! Diagnostics setup for hosts embedding the registry.
//!
//! The registry itself only emits `tracing` events (registrations, conflict
//! outcomes, recovery of stale slot pointers, lock contention). Hosts that
//! do not install their own subscriber can call [`init`].

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable read before `RUST_LOG`.
pub const LOG_ENV: &str = "EXTENSION_REGISTRY_LOG";

/// Directives used when neither variable is set.
pub const DEFAULT_DIRECTIVES: &str = "registry_core=info,registry_fs=warn";

/// Install a global subscriber writing compact lines to stderr.
///
/// Fails if a global subscriber is already set.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(filter()?)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .try_init()?;
    Ok(())
}

fn filter() -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new(DEFAULT_DIRECTIVES))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_parse() {
        assert!(EnvFilter::try_new(DEFAULT_DIRECTIVES).is_ok());
    }

    #[test]
    fn second_init_fails_without_panicking() {
        let _ = init();
        assert!(init().is_err());
        tracing::info!(slot = "core:parser", "registry logging active");
    }
}
