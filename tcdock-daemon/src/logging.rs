//! Logging initialization for tcdock-daemon.
//!
//! The filter is chosen in this order:
//!
//! 1. `-d/--debug`: `debug` for tcdock, Docker client crates capped at `warn`
//! 2. `RUST_LOG`, when set and non-empty
//! 3. `[general] log_level`, Docker client crates capped at `warn`
//!
//! `bollard` and the `hyper` stack under it log every request at debug level,
//! which buries the per-command lines the shaper emits.

use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use tcdock_core::config::GeneralConfig;

/// Docker client targets capped at `warn` in the default directive.
const DOCKER_CLIENT_TARGETS: &[&str] = &["bollard", "hyper", "hyper_util"];

/// Builds the default directive for `level`.
pub fn default_directive(level: &str) -> String {
    std::iter::once(level.to_owned())
        .chain(DOCKER_CLIENT_TARGETS.iter().map(|target| format!("{target}=warn")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Chooses the filter directive. `debug` wins over `rust_log`.
pub fn filter_directive(config: &GeneralConfig, debug: bool, rust_log: Option<&str>) -> String {
    if debug {
        return default_directive("debug");
    }
    match rust_log.map(str::trim) {
        Some(env) if !env.is_empty() => env.to_owned(),
        _ => default_directive(&config.log_level),
    }
}

fn build_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|e| anyhow::anyhow!("invalid log filter '{}': {}", directive, e))
}

fn format_layer(format: &str) -> Result<Box<dyn Layer<Registry> + Send + Sync>> {
    match format {
        "json" => Ok(tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .boxed()),
        "pretty" => Ok(tracing_subscriber::fmt::layer().pretty().boxed()),
        other => Err(anyhow::anyhow!(
            "unknown log format '{}', expected 'json' or 'pretty'",
            other
        )),
    }
}

/// Install the global tracing subscriber.
///
/// Call once, before the daemon connects to Docker, so the connection
/// attempt and the bootstrap pass are logged.
pub fn init_tracing(config: &GeneralConfig, debug: bool) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = filter_directive(config, debug, rust_log.as_deref());

    let filter = build_filter(&directive)?;
    let layer = format_layer(&config.log_format)?;

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {}", e))?;

    tracing::debug!(
        filter = directive.as_str(),
        format = config.log_format.as_str(),
        "logging ready"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn general(level: &str) -> GeneralConfig {
        GeneralConfig {
            log_level: level.to_owned(),
            log_format: "pretty".to_owned(),
        }
    }

    #[test]
    fn default_directive_caps_docker_client() {
        assert_eq!(
            default_directive("info"),
            "info,bollard=warn,hyper=warn,hyper_util=warn"
        );
    }

    #[test]
    fn configured_level_used_without_rust_log() {
        let directive = filter_directive(&general("warn"), false, None);
        assert!(directive.starts_with("warn,"));
    }

    #[test]
    fn rust_log_wins_over_config() {
        let directive = filter_directive(&general("info"), false, Some("tcdock_shaper=trace"));
        assert_eq!(directive, "tcdock_shaper=trace");
    }

    #[test]
    fn blank_rust_log_is_ignored() {
        let directive = filter_directive(&general("error"), false, Some("  "));
        assert!(directive.starts_with("error,"));
    }

    #[test]
    fn debug_flag_wins_over_rust_log() {
        let directive = filter_directive(&general("info"), true, Some("error"));
        assert_eq!(directive, default_directive("debug"));
    }

    #[test]
    fn every_default_directive_parses() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(build_filter(&default_directive(level)).is_ok(), "{level}");
        }
    }

    #[test]
    fn rejects_invalid_directive() {
        assert!(build_filter("bollard=loud").is_err());
    }

    #[test]
    fn rejects_unknown_format() {
        let err = format_layer("xml").err().unwrap();
        assert!(err.to_string().contains("unknown log format"));
    }
}
