use std::io;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` overrides `default_filter`.
///
/// Logs go to stderr; stdout is reserved for the run report.
pub fn configure_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stderr_log = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_filter(filter);

    // A second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::Registry::default()
        .with(stderr_log)
        .try_init();
}
