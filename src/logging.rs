//! Logging setup, mirroring `ironclaw`'s `tracing` + `tracing-subscriber`
//! wiring. A single `init` call at process start; verbosity is
//! controlled by `CASS_MEMORY_VERBOSE` or `--verbose`.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. Idempotent per-process: call
/// once from `main`.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
