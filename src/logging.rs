//! Logging setup for binaries and demos embedding the tracker
//!
//! The library itself only emits `tracing` events (duplicate ids, ambiguous
//! names, read-only no-ops, dangling snapshot pointers). Installing a
//! subscriber is left to the application; these helpers cover the common case.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVE: &str = "run_ledger=info";

/// Install a formatted subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_DIRECTIVE`].
///
/// Returns `false` if a global subscriber was already installed.
pub fn init() -> bool {
    init_with_default(DEFAULT_DIRECTIVE)
}

/// Same as [`init`] with a caller-chosen fallback directive.
pub fn init_with_default(directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
