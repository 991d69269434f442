//! 설정 관리 -- tcdock.toml 파싱 및 런타임 설정
//!
//! [`TcdockConfig`]는 데몬과 셰이퍼가 사용하는 모든 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`TCDOCK_SHAPER_TC_BINARY=/sbin/tc` 형식)
//! 3. 설정 파일 (`tcdock.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), tcdock_core::error::TcdockError> {
//! use tcdock_core::config::TcdockConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = TcdockConfig::load("tcdock.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = TcdockConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, TcdockError};

/// 이벤트 재구독 대기 시간 상한 (초)
const MAX_EVENT_RECONNECT_SECS: u64 = 3600;

/// tcdock 통합 설정
///
/// `tcdock.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TcdockConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// Docker 연결 설정
    #[serde(default)]
    pub docker: DockerConfig,
    /// 셰이퍼(ip/tc, 상태 디렉토리) 설정
    #[serde(default)]
    pub shaper: ShaperSection,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl TcdockConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    ///
    /// 설정 로딩 순서:
    /// 1. TOML 파일 파싱
    /// 2. 환경변수 오버라이드 적용
    /// 3. 유효성 검증
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TcdockError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 기본값에 환경변수 오버라이드만 적용한 설정을 반환합니다.
    ///
    /// 설정 파일 없이 실행할 때 사용합니다.
    pub fn from_env() -> Result<Self, TcdockError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, TcdockError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TcdockError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                TcdockError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, TcdockError> {
        toml::from_str(toml_str).map_err(|e| {
            TcdockError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `TCDOCK_{SECTION}_{FIELD}`
    /// 예: `TCDOCK_DOCKER_EVENT_RECONNECT_SECS=10`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "TCDOCK_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "TCDOCK_GENERAL_LOG_FORMAT");

        // Docker
        override_string(&mut self.docker.socket, "TCDOCK_DOCKER_SOCKET");
        override_u64(
            &mut self.docker.event_reconnect_secs,
            "TCDOCK_DOCKER_EVENT_RECONNECT_SECS",
        );

        // Shaper
        override_string(&mut self.shaper.ip_binary, "TCDOCK_SHAPER_IP_BINARY");
        override_string(&mut self.shaper.tc_binary, "TCDOCK_SHAPER_TC_BINARY");
        override_string(&mut self.shaper.netns_dir, "TCDOCK_SHAPER_NETNS_DIR");
        override_string(&mut self.shaper.state_dir, "TCDOCK_SHAPER_STATE_DIR");

        // Metrics
        override_bool(&mut self.metrics.enabled, "TCDOCK_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "TCDOCK_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "TCDOCK_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), TcdockError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.docker.event_reconnect_secs == 0
            || self.docker.event_reconnect_secs > MAX_EVENT_RECONNECT_SECS
        {
            return Err(ConfigError::InvalidValue {
                field: "docker.event_reconnect_secs".to_owned(),
                reason: format!("must be 1-{MAX_EVENT_RECONNECT_SECS}"),
            }
            .into());
        }

        // 셰이퍼 경로는 비어 있으면 안 됨
        let paths = [
            ("shaper.ip_binary", &self.shaper.ip_binary),
            ("shaper.tc_binary", &self.shaper.tc_binary),
            ("shaper.netns_dir", &self.shaper.netns_dir),
            ("shaper.state_dir", &self.shaper.state_dir),
        ];
        for (field, value) in paths {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_owned(),
                    reason: "must not be empty".to_owned(),
                }
                .into());
            }
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "metrics.port".to_owned(),
                reason: "port must be non-zero when metrics are enabled".to_owned(),
            }
            .into());
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// Docker 연결 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Docker 소켓 경로 (비어 있으면 플랫폼 기본값)
    pub socket: String,
    /// 이벤트 스트림 실패 시 재구독까지 대기 시간 (초)
    pub event_reconnect_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: String::new(),
            event_reconnect_secs: 5,
        }
    }
}

/// 셰이퍼 설정
///
/// 호스트 명령 경로와 영속 상태 위치를 지정합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaperSection {
    /// `ip` 바이너리 경로
    pub ip_binary: String,
    /// `tc` 바이너리 경로
    pub tc_binary: String,
    /// 네트워크 네임스페이스 핸들 디렉토리
    pub netns_dir: String,
    /// 컨테이너 → reflector 매핑 저장 디렉토리
    pub state_dir: String,
}

impl Default for ShaperSection {
    fn default() -> Self {
        Self {
            ip_binary: "/usr/sbin/ip".to_owned(),
            tc_binary: "/usr/sbin/tc".to_owned(),
            netns_dir: "/var/run/docker/netns".to_owned(),
            state_dir: "/var/lib/tcdock/reflectors".to_owned(),
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9464,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = TcdockConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.docker.event_reconnect_secs, 5);
        assert_eq!(config.shaper.tc_binary, "/usr/sbin/tc");
        assert_eq!(config.shaper.netns_dir, "/var/run/docker/netns");
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        TcdockConfig::default().validate().unwrap();
    }

    #[test]
    fn parse_empty_toml_uses_defaults() {
        let config = TcdockConfig::parse("").unwrap();
        assert_eq!(config.shaper.ip_binary, "/usr/sbin/ip");
    }

    #[test]
    fn parse_partial_toml_merges_with_defaults() {
        let config = TcdockConfig::parse(
            r#"
            [shaper]
            tc_binary = "/sbin/tc"
            "#,
        )
        .unwrap();
        assert_eq!(config.shaper.tc_binary, "/sbin/tc");
        assert_eq!(config.shaper.ip_binary, "/usr/sbin/ip");
        assert_eq!(config.general.log_format, "pretty");
    }

    #[test]
    fn parse_invalid_toml_returns_error() {
        let result = TcdockConfig::parse("[general\nlog_level =");
        assert!(matches!(
            result.unwrap_err(),
            TcdockError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = TcdockConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_zero_reconnect_delay() {
        let mut config = TcdockConfig::default();
        config.docker.event_reconnect_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("event_reconnect_secs"));
    }

    #[test]
    fn validate_rejects_empty_state_dir() {
        let mut config = TcdockConfig::default();
        config.shaper.state_dir = "  ".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("shaper.state_dir"));
    }

    #[test]
    fn validate_rejects_zero_metrics_port_when_enabled() {
        let mut config = TcdockConfig::default();
        config.metrics.enabled = true;
        config.metrics.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn env_override_string() {
        let mut val = "original".to_owned();
        // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 안전합니다.
        unsafe { std::env::set_var("TEST_TCDOCK_STR", "overridden") };
        override_string(&mut val, "TEST_TCDOCK_STR");
        assert_eq!(val, "overridden");
        unsafe { std::env::remove_var("TEST_TCDOCK_STR") };
    }

    #[test]
    #[serial]
    fn env_override_u64_invalid_keeps_original() {
        let mut val = 5;
        // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 안전합니다.
        unsafe { std::env::set_var("TEST_TCDOCK_U64_BAD", "soon") };
        override_u64(&mut val, "TEST_TCDOCK_U64_BAD");
        assert_eq!(val, 5);
        unsafe { std::env::remove_var("TEST_TCDOCK_U64_BAD") };
    }

    #[test]
    #[serial]
    fn env_override_bool_valid() {
        let mut val = false;
        // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 안전합니다.
        unsafe { std::env::set_var("TEST_TCDOCK_BOOL", "true") };
        override_bool(&mut val, "TEST_TCDOCK_BOOL");
        assert!(val);
        unsafe { std::env::remove_var("TEST_TCDOCK_BOOL") };
    }

    #[test]
    fn env_override_missing_var_keeps_original() {
        let mut val = 9464;
        override_u16(&mut val, "TEST_TCDOCK_NONEXISTENT_12345");
        assert_eq!(val, 9464);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let result = TcdockConfig::from_file("/nonexistent/path/tcdock.toml").await;
        assert!(matches!(
            result.unwrap_err(),
            TcdockError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
