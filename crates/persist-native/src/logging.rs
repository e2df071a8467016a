//! tracing-subscriber setup for native hosts.

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// Respects `RUST_LOG`; otherwise defaults to info (or debug with `verbose`).
/// Returns false if a subscriber was already installed.
pub fn init_tracing(verbose: bool) -> bool {
    let default_filter = if verbose {
        "debug,persist_core=debug,persist_native=debug"
    } else {
        "info,persist_core=info,persist_native=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
