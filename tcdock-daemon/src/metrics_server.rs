//! Prometheus metrics HTTP server.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`
//! to expose the shaper counters (`tcdock_*_total`).
//!
//! # Usage
//!
//! ```ignore
//! let config = MetricsConfig::default();
//! install_metrics_recorder(&config)?;
//! // After this, every metrics::counter!() call in the shaper is recorded
//! ```

use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tcdock_core::config::MetricsConfig;

/// Path served by the exporter's built-in listener.
const SCRAPE_PATH: &str = "/metrics";

/// Parses `listen_addr:port` into a socket address.
pub fn listen_address(config: &MetricsConfig) -> Result<SocketAddr> {
    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))
}

/// Serves the shaper counters at `http://<listen_addr>:<port>/metrics`.
///
/// Exposed series: `tcdock_policies_applied_total`,
/// `tcdock_policy_failures_total`, `tcdock_events_received_total{action}`,
/// `tcdock_teardowns_total`, `tcdock_teardown_failures_total` and
/// `tcdock_event_stream_reconnects_total`. Descriptions are registered right
/// after the recorder is installed so they show up before the first event.
///
/// # Errors
///
/// - `endpoint` is not `/metrics` (the built-in listener serves no other path)
/// - `listen_addr:port` is not a socket address, or binding fails
/// - A recorder is already installed in this process
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    if config.endpoint != SCRAPE_PATH {
        return Err(anyhow::anyhow!(
            "metrics endpoint '{}' is not served; set endpoint = \"{}\"",
            config.endpoint,
            SCRAPE_PATH
        ));
    }

    let addr = listen_address(config)?;
    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "shaper counters reachable from every interface"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("cannot serve metrics on {}: {}", addr, e))?;
    tcdock_core::metrics::describe_all();

    tracing::info!(url = %format!("http://{addr}{SCRAPE_PATH}"), "serving shaper counters");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_custom_endpoint() {
        let config = MetricsConfig {
            endpoint: "/stats".to_owned(),
            ..MetricsConfig::default()
        };
        let err = install_metrics_recorder(&config).unwrap_err();
        assert!(err.to_string().contains("is not served"));
    }

    #[test]
    fn listen_address_from_config() {
        let addr = listen_address(&MetricsConfig::default()).unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:9464");
    }

    #[test]
    fn listen_address_rejects_hostname() {
        let config = MetricsConfig {
            listen_addr: "localhost".to_owned(),
            ..MetricsConfig::default()
        };
        assert!(listen_address(&config).is_err());
    }
}
