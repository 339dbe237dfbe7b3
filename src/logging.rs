//! One-shot `tracing` subscriber setup for binaries and tests.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber: `RUST_LOG`-style filtering (default
/// `info`), compact console output, or newline-delimited JSON when
/// `TRACEWAY_LOG_FORMAT=json`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let use_json = std::env::var("TRACEWAY_LOG_FORMAT").as_deref() == Ok("json");

    let result = if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
    };
    // A subscriber installed elsewhere (e.g. by a test harness) wins.
    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_does_not_panic() {
        init_logging();
        init_logging();
    }
}
