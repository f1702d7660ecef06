//! Diagnostic log setup.
//!
//! Diagnostics go to the systemd journal when it is reachable, and to stderr
//! when running in the foreground or when the journal is not available.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global subscriber. `RUST_LOG` overrides the default level.
pub fn init(debug: bool, foreground: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let journald = tracing_journald::layer()
        .ok()
        .map(|layer| layer.with_syslog_identifier("varlnfs".to_string()));
    let stderr = (foreground || journald.is_none())
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(journald)
        .with(stderr)
        .try_init();
}
