//! tcdock.toml 통합 설정 테스트
//!
//! - tcdock.toml.example 파싱 테스트
//! - 파일 로딩 + 환경변수 우선순위 테스트
//! - 잘못된 값 에러 테스트

use serial_test::serial;
use tcdock_core::config::TcdockConfig;
use tcdock_core::error::{ConfigError, TcdockError};

#[test]
fn example_config_parses_successfully() {
    let content = include_str!("../../../tcdock.toml.example");
    let config = TcdockConfig::parse(content).expect("example config should parse");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "pretty");
    assert_eq!(config.docker.socket, "");
    assert_eq!(config.docker.event_reconnect_secs, 5);
    assert_eq!(config.shaper.netns_dir, "/var/run/docker/netns");
    assert_eq!(config.shaper.state_dir, "/var/lib/tcdock/reflectors");
    assert_eq!(config.metrics.port, 9464);
}

#[test]
fn example_config_passes_validation() {
    let content = include_str!("../../../tcdock.toml.example");
    let config = TcdockConfig::parse(content).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[tokio::test]
#[serial]
async fn load_applies_env_overrides_over_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tcdock.toml");
    std::fs::write(&path, "[shaper]\ntc_binary = \"/opt/tc\"\n").unwrap();

    // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 안전합니다.
    unsafe { std::env::set_var("TCDOCK_SHAPER_TC_BINARY", "/sbin/tc") };
    let config = TcdockConfig::load(&path).await;
    unsafe { std::env::remove_var("TCDOCK_SHAPER_TC_BINARY") };

    assert_eq!(config.unwrap().shaper.tc_binary, "/sbin/tc");
}

#[tokio::test]
#[serial]
async fn load_rejects_invalid_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tcdock.toml");
    std::fs::write(&path, "[docker]\nevent_reconnect_secs = 0\n").unwrap();

    let err = TcdockConfig::load(&path).await.unwrap_err();
    assert!(matches!(
        err,
        TcdockError::Config(ConfigError::InvalidValue { .. })
    ));
}

#[test]
#[serial]
fn from_env_without_overrides_matches_defaults() {
    let config = TcdockConfig::from_env().unwrap();
    assert_eq!(config.shaper.ip_binary, "/usr/sbin/ip");
    assert_eq!(config.docker.event_reconnect_secs, 5);
}
