//! Configuration loading tests for the daemon entry point.
//!
//! Tests file loading, CLI overrides, env overrides, and validation.

use std::env;
use std::io::Write;

use clap::Parser;
use serial_test::serial;
use tcdock_daemon::cli::DaemonCli;
use tcdock_daemon::orchestrator::load_config;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

fn cli_for(path: &std::path::Path, extra: &[&str]) -> DaemonCli {
    let path = path.to_str().expect("utf-8 path");
    let mut argv = vec!["tcdock-daemon", "--config", path];
    argv.extend_from_slice(extra);
    DaemonCli::try_parse_from(argv).expect("cli should parse")
}

#[tokio::test]
#[serial]
async fn test_load_config_from_file() {
    // Given: A config file with custom shaper paths
    let file = write_config(
        r#"
[general]
log_level = "warn"

[docker]
event_reconnect_secs = 10

[shaper]
tc_binary = "/sbin/tc"
state_dir = "/tmp/tcdock-test/reflectors"
"#,
    );

    // When: Loading through the daemon entry point
    let config = load_config(&cli_for(file.path(), &[]))
        .await
        .expect("config should load");

    // Then: File values are applied, unspecified fields keep defaults
    assert_eq!(config.general.log_level, "warn");
    assert_eq!(config.docker.event_reconnect_secs, 10);
    assert_eq!(config.shaper.tc_binary, "/sbin/tc");
    assert_eq!(config.shaper.ip_binary, "/usr/sbin/ip");
    assert_eq!(config.shaper.state_dir, "/tmp/tcdock-test/reflectors");
}

#[tokio::test]
#[serial]
async fn test_debug_flag_wins_over_file() {
    // Given: A file asking for error-level logging
    let file = write_config("[general]\nlog_level = \"error\"\n");

    // When: Loading with --debug
    let config = load_config(&cli_for(file.path(), &["--debug"]))
        .await
        .expect("config should load");

    // Then: CLI flag takes precedence
    assert_eq!(config.general.log_level, "debug");
}

#[tokio::test]
#[serial]
async fn test_debug_flag_wins_over_env() {
    let file = write_config("[general]\nlog_level = \"info\"\n");

    // SAFETY: Test isolation - serialized, and the var is removed below
    unsafe {
        env::set_var("TCDOCK_GENERAL_LOG_LEVEL", "warn");
    }

    let from_env = load_config(&cli_for(file.path(), &[])).await;
    let from_flag = load_config(&cli_for(file.path(), &["-d"])).await;

    // SAFETY: Test cleanup
    unsafe {
        env::remove_var("TCDOCK_GENERAL_LOG_LEVEL");
    }

    assert_eq!(from_env.expect("should load").general.log_level, "warn");
    assert_eq!(from_flag.expect("should load").general.log_level, "debug");
}

#[tokio::test]
#[serial]
async fn test_invalid_log_format_flag_rejected() {
    let file = write_config("");

    let result = load_config(&cli_for(file.path(), &["--log-format", "xml"])).await;

    let err = result.expect_err("unknown log format should fail validation");
    assert!(err.to_string().contains("general.log_format"), "got: {err}");
}

#[tokio::test]
#[serial]
async fn test_explicit_missing_config_is_error() {
    // Given: A --config path that does not exist
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("absent.toml");

    // When/Then: Loading fails instead of silently falling back to defaults
    let err = load_config(&cli_for(&missing, &[]))
        .await
        .expect_err("missing explicit config should fail");
    assert!(err.to_string().contains("not found"), "got: {err}");
}

#[tokio::test]
#[serial]
async fn test_malformed_config_is_error() {
    let file = write_config("[shaper\ntc_binary = ");

    let err = load_config(&cli_for(file.path(), &[]))
        .await
        .expect_err("malformed TOML should fail");
    assert!(err.to_string().contains("failed to load config"), "got: {err}");
}

#[tokio::test]
#[serial]
async fn test_zero_reconnect_delay_rejected() {
    let file = write_config("[docker]\nevent_reconnect_secs = 0\n");

    let err = load_config(&cli_for(file.path(), &[]))
        .await
        .expect_err("zero reconnect delay should fail");
    assert!(err.to_string().contains("event_reconnect_secs"), "got: {err}");
}
