//! Tracing subscriber setup
//!
//! The writer itself only emits `tracing` events. Host processes that do not
//! install their own subscriber can call one of these helpers.

use clap::ValueEnum;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter,
};

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event, for log collectors
    Json,
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("table_batch_writer={},info", log_level).into())
}

fn install(log_level: &str, format: LogFormat) -> std::result::Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(env_filter(log_level));
    match format {
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    }
}

/// Install a global fmt subscriber. `RUST_LOG` wins over `log_level`.
///
/// Panics if a global subscriber is already set; see `try_init_tracing`.
pub fn init_tracing(log_level: &str, format: LogFormat) {
    if let Err(e) = install(log_level, format) {
        panic!("failed to install tracing subscriber: {}", e);
    }
}

/// Like `init_tracing`, returning `false` if a subscriber was already set.
pub fn try_init_tracing(log_level: &str, format: LogFormat) -> bool {
    install(log_level, format).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_refused() {
        try_init_tracing("debug", LogFormat::Json);
        assert!(!try_init_tracing("info", LogFormat::Text));
        tracing::info!(format = "json", "subscriber installed");
    }

    #[test]
    fn test_format_parses_from_name() {
        assert_eq!(LogFormat::from_str("json", true), Ok(LogFormat::Json));
        assert_eq!(LogFormat::from_str("TEXT", true), Ok(LogFormat::Text));
        assert!(LogFormat::from_str("xml", true).is_err());
    }
}
