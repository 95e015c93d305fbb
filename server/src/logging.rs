//! Tracing setup for the gateway.
//!
//! A bare level such as `debug` applies to the CertGate crates and the
//! HTTP trace layer only. sled and the rest of the dependency tree stay at
//! `warn` so store internals don't drown out access decisions. A full
//! directive string (`certgate_auth=trace,sled=info`) is used verbatim, and
//! `RUST_LOG` beats both.

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Targets a bare level is applied to.
const GATEWAY_TARGETS: [&str; 4] = [
    "certgate_server",
    "certgate_auth",
    "certgate_contracts",
    "tower_http",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    /// One JSON object per line, event fields at the top level.
    Json,
}

/// Expand `level` into filter directives.
pub fn directives(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    let level = if level.is_empty() { "info" } else { level };
    GATEWAY_TARGETS
        .iter()
        .fold(String::from("warn"), |mut acc, target| {
            acc.push_str(&format!(",{target}={level}"));
            acc
        })
}

/// Install the global subscriber on stderr. stdout carries the `init` and
/// `seed-admin` summaries.
pub fn init_logging(level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(level)));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_line_number(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    tracing::debug!(?format, level, "tracing ready");
}
