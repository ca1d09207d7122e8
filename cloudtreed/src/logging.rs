//! Structured logging on stderr. Stdout carries the JSON-lines protocol, so
//! nothing else may write there.

use cloudtree_core::LogLevel;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn default_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "info,sqlx=warn",
        LogLevel::Debug => "debug,sqlx=info",
    }
}

/// `RUST_LOG` overrides the configured level when it is set and valid.
pub fn build_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(level)))
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init_logging(level: LogLevel) {
    let _ = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .try_init();
}
