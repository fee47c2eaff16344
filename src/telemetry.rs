//! Logging setup
//!
//! The adapter only emits `tracing` events. Test drivers that want to see
//! them install a subscriber once, here or with their own setup.
//!
//! # Example
//!
//! ```no_run
//! use sovitin::telemetry::init_logging;
//!
//! init_logging();
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber filtered by `RUST_LOG` (default: info)
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    init_logging_with("info");
}

/// Like [`init_logging`] with a custom fallback filter (e.g. `"sovitin=debug"`)
pub fn init_logging_with(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
