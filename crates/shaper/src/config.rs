//! 셰이퍼 설정
//!
//! [`ShaperConfig`]는 core의 [`TcdockConfig`](tcdock_core::config::TcdockConfig)에서
//! 셰이퍼가 쓰는 값만 골라 담습니다.
//!
//! # 사용 예시
//! ```
//! use tcdock_core::config::TcdockConfig;
//! use tcdock_shaper::config::ShaperConfig;
//!
//! let config = ShaperConfig::from_core(&TcdockConfig::default());
//! assert_eq!(config.tc_binary, "/usr/sbin/tc");
//! ```

use std::time::Duration;

use tcdock_core::config::TcdockConfig;

use crate::error::ShaperError;

/// 셰이퍼 설정
#[derive(Debug, Clone)]
pub struct ShaperConfig {
    /// `ip` 바이너리 경로
    pub ip_binary: String,
    /// `tc` 바이너리 경로
    pub tc_binary: String,
    /// 네트워크 네임스페이스 핸들 디렉토리
    pub netns_dir: String,
    /// 컨테이너 → reflector 매핑 저장 디렉토리
    pub state_dir: String,
    /// 이벤트 스트림 재구독 대기 시간
    pub reconnect_delay: Duration,
}

impl Default for ShaperConfig {
    fn default() -> Self {
        Self::from_core(&TcdockConfig::default())
    }
}

impl ShaperConfig {
    /// core 설정에서 셰이퍼 설정을 생성합니다.
    pub fn from_core(core: &TcdockConfig) -> Self {
        Self {
            ip_binary: core.shaper.ip_binary.clone(),
            tc_binary: core.shaper.tc_binary.clone(),
            netns_dir: core.shaper.netns_dir.clone(),
            state_dir: core.shaper.state_dir.clone(),
            reconnect_delay: Duration::from_secs(core.docker.event_reconnect_secs),
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ShaperError> {
        let fields = [
            ("ip_binary", &self.ip_binary),
            ("tc_binary", &self.tc_binary),
            ("netns_dir", &self.netns_dir),
            ("state_dir", &self.state_dir),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(ShaperError::Config {
                    field: field.to_owned(),
                    reason: "must not be empty".to_owned(),
                });
            }
        }

        if self.reconnect_delay.is_zero() {
            return Err(ShaperError::Config {
                field: "reconnect_delay".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        Ok(())
    }
}

/// 셰이퍼 설정 빌더
#[derive(Default)]
pub struct ShaperConfigBuilder {
    config: ShaperConfig,
}

impl ShaperConfigBuilder {
    /// 기본값으로 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// `ip` 바이너리 경로를 설정합니다.
    pub fn ip_binary(mut self, path: impl Into<String>) -> Self {
        self.config.ip_binary = path.into();
        self
    }

    /// `tc` 바이너리 경로를 설정합니다.
    pub fn tc_binary(mut self, path: impl Into<String>) -> Self {
        self.config.tc_binary = path.into();
        self
    }

    /// 네임스페이스 핸들 디렉토리를 설정합니다.
    pub fn netns_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.netns_dir = dir.into();
        self
    }

    /// 매핑 저장 디렉토리를 설정합니다.
    pub fn state_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.state_dir = dir.into();
        self
    }

    /// 재구독 대기 시간을 설정합니다.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// 설정을 검증하고 반환합니다.
    pub fn build(self) -> Result<ShaperConfig, ShaperError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_core_copies_paths_and_delay() {
        let mut core = TcdockConfig::default();
        core.shaper.tc_binary = "/sbin/tc".to_owned();
        core.docker.event_reconnect_secs = 7;

        let config = ShaperConfig::from_core(&core);
        assert_eq!(config.tc_binary, "/sbin/tc");
        assert_eq!(config.ip_binary, "/usr/sbin/ip");
        assert_eq!(config.reconnect_delay, Duration::from_secs(7));
    }

    #[test]
    fn default_passes_validation() {
        ShaperConfig::default().validate().unwrap();
    }

    #[test]
    fn builder_overrides_fields() {
        let config = ShaperConfigBuilder::new()
            .ip_binary("ip")
            .tc_binary("tc")
            .netns_dir("/tmp/netns")
            .state_dir("/tmp/state")
            .reconnect_delay(Duration::from_millis(10))
            .build()
            .unwrap();
        assert_eq!(config.ip_binary, "ip");
        assert_eq!(config.netns_dir, "/tmp/netns");
        assert_eq!(config.reconnect_delay, Duration::from_millis(10));
    }

    #[test]
    fn builder_rejects_empty_binary() {
        let err = ShaperConfigBuilder::new().tc_binary("").build().unwrap_err();
        assert!(matches!(err, ShaperError::Config { ref field, .. } if field == "tc_binary"));
    }

    #[test]
    fn builder_rejects_zero_delay() {
        let result = ShaperConfigBuilder::new()
            .reconnect_delay(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }
}
