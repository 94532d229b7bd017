//! Process-wide diagnostics sink
//!
//! The library emits diagnostics through `tracing`; this installs a
//! default stderr subscriber for applications that do not bring their
//! own. Fire-and-forget: correctness never depends on it.

use tracing_subscriber::EnvFilter;

/// Install the default diagnostics subscriber
///
/// `verbose` raises the level from warnings to debug. Calling this when a
/// subscriber is already installed is a no-op.
pub fn set_notify_values(verbose: bool) {
    let directive = if verbose {
        "ewfvault=debug"
    } else {
        "ewfvault=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
