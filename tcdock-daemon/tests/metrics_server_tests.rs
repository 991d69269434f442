//! Integration tests for metrics server functionality.

use serial_test::serial;
use tcdock_core::config::MetricsConfig;
use tcdock_daemon::metrics_server;

#[test]
#[serial]
fn test_install_metrics_recorder_once_per_process() {
    // Given: A valid metrics configuration
    let config = MetricsConfig {
        enabled: true,
        listen_addr: "127.0.0.1".to_string(),
        port: 19464, // Use non-standard port to avoid conflicts
        endpoint: "/metrics".to_string(),
    };

    // When: Installing the metrics recorder
    let result = metrics_server::install_metrics_recorder(&config);

    // Then: First install succeeds
    assert!(
        result.is_ok(),
        "install_metrics_recorder should succeed with valid config: {:?}",
        result.err()
    );

    // And: A second global recorder is refused
    let second = MetricsConfig {
        port: 19465,
        ..config
    };
    assert!(metrics_server::install_metrics_recorder(&second).is_err());
}

#[test]
#[serial]
fn test_install_metrics_recorder_rejects_custom_endpoint() {
    let config = MetricsConfig {
        enabled: true,
        listen_addr: "127.0.0.1".to_string(),
        port: 19466,
        endpoint: "/custom".to_string(),
    };

    let err = metrics_server::install_metrics_recorder(&config).unwrap_err();
    assert!(err.to_string().contains("/custom"));
}
