//! 셰이퍼 에러 타입
//!
//! [`ShaperError`]는 셰이퍼 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<ShaperError> for TcdockError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! 컨테이너 하나 또는 링크 하나로 범위가 한정된 에러(`InterfaceNotFound`,
//! `ProvisionFailed`, `IngressUnavailable`, `ShapingCommandFailed`,
//! `TeardownPartialFailure`)는 로그로 남기고 다음 컨테이너 처리를 계속합니다.

use tcdock_core::error::{ConfigError, RuntimeError, ShapingError, TcdockError};

/// 셰이퍼 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ShaperError {
    /// Docker API 호출 실패
    #[error("docker api error: {0}")]
    DockerApi(String),

    /// Docker 소켓 연결 실패
    #[error("docker connection error: {0}")]
    DockerConnection(String),

    /// 컨테이너를 찾을 수 없음
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// 이벤트 구독 자체가 실패함 (재구독 대상)
    #[error("event subscription failed: {0}")]
    SubscriptionFailed(String),

    /// 컨테이너에 조건을 만족하는 veth 링크가 없음
    #[error("container: {0}, no matching veth interface found")]
    InterfaceNotFound(String),

    /// reflector(ifb) 장치 생성 실패
    #[error("cannot provision reflector for container '{container}': {reason}")]
    ProvisionFailed {
        /// 대상 컨테이너 이름
        container: String,
        /// 실패 사유
        reason: String,
    },

    /// reflector 없이 ingress 셰이핑을 시도함
    #[error("container '{0}' has no reflector device, ingress traffic cannot be shaped")]
    IngressUnavailable(String),

    /// tc 명령 실패 (허용되는 not-found 응답 제외)
    #[error("cmd: {command}, out: {output}")]
    ShapingCommandFailed {
        /// 실행한 명령 전체
        command: String,
        /// stdout + stderr
        output: String,
    },

    /// tc 이외의 호스트 명령 실패
    #[error("cmd: {command}, out: {output}")]
    CommandFailed {
        /// 실행한 명령 전체
        command: String,
        /// stdout + stderr
        output: String,
    },

    /// 명령 프로세스를 시작할 수 없음
    #[error("cannot spawn '{command}': {reason}")]
    CommandSpawn {
        /// 실행하려던 명령
        command: String,
        /// 실패 사유
        reason: String,
    },

    /// 컨테이너에 대한 reflector 매핑이 저장되어 있지 않음
    #[error("no persisted reflector mapping for container '{0}'")]
    MappingNotFound(String),

    /// 정지된 컨테이너 정리 중 일부 단계 실패
    #[error("teardown of container '{container}' partially failed: {reason}")]
    TeardownPartialFailure {
        /// 대상 컨테이너 이름
        container: String,
        /// 실패한 단계와 사유
        reason: String,
    },

    /// 상태 저장소 에러
    #[error("store error for key '{key}': {reason}")]
    Store {
        /// 저장 키 (컨테이너 이름)
        key: String,
        /// 실패 사유
        reason: String,
    },

    /// 네트워크 네임스페이스 핸들 조작 실패
    #[error("namespace handle error for '{name}': {reason}")]
    Namespace {
        /// 핸들 이름 (컨테이너 이름)
        name: String,
        /// 실패 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },
}

impl From<ShaperError> for TcdockError {
    fn from(err: ShaperError) -> Self {
        match err {
            ShaperError::DockerApi(msg) => TcdockError::Runtime(RuntimeError::Api(msg)),
            ShaperError::DockerConnection(msg) => {
                TcdockError::Runtime(RuntimeError::Connection(msg))
            }
            ShaperError::ContainerNotFound(id) => TcdockError::Runtime(RuntimeError::NotFound(id)),
            ShaperError::SubscriptionFailed(msg) => {
                TcdockError::Runtime(RuntimeError::Subscription(msg))
            }
            ShaperError::InterfaceNotFound(name) => {
                TcdockError::Shaping(ShapingError::InterfaceNotFound(name))
            }
            ShaperError::ShapingCommandFailed { command, output }
            | ShaperError::CommandFailed { command, output } => {
                TcdockError::Shaping(ShapingError::Command { command, output })
            }
            ShaperError::CommandSpawn { command, reason } => {
                TcdockError::Shaping(ShapingError::Command {
                    command,
                    output: reason,
                })
            }
            ShaperError::ProvisionFailed { container, reason } => {
                TcdockError::Shaping(ShapingError::Reflector { container, reason })
            }
            ShaperError::IngressUnavailable(container) => {
                TcdockError::Shaping(ShapingError::Reflector {
                    container,
                    reason: "no reflector device".to_owned(),
                })
            }
            ShaperError::MappingNotFound(container) => {
                TcdockError::Shaping(ShapingError::Reflector {
                    container,
                    reason: "no persisted mapping".to_owned(),
                })
            }
            ShaperError::TeardownPartialFailure { container, reason } => {
                TcdockError::Shaping(ShapingError::Teardown { container, reason })
            }
            err @ (ShaperError::Store { .. } | ShaperError::Namespace { .. }) => {
                TcdockError::Shaping(ShapingError::Store(err.to_string()))
            }
            ShaperError::Config { field, reason } => {
                TcdockError::Config(ConfigError::InvalidValue { field, reason })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_not_found_names_container() {
        let err = ShaperError::InterfaceNotFound("web".to_owned());
        assert!(err.to_string().contains("web"));
    }

    #[test]
    fn shaping_command_failed_display_has_command_and_output() {
        let err = ShaperError::ShapingCommandFailed {
            command: "/usr/sbin/tc qdisc add dev veth1 ingress".to_owned(),
            output: "Error: Exclusivity flag on, cannot modify.".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("qdisc add dev veth1 ingress"));
        assert!(msg.contains("Exclusivity flag"));
    }

    #[test]
    fn provision_failed_display() {
        let err = ShaperError::ProvisionFailed {
            container: "db".to_owned(),
            reason: "Operation not permitted".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("db"));
        assert!(msg.contains("Operation not permitted"));
    }

    #[test]
    fn converts_docker_connection_to_runtime_error() {
        let err: TcdockError = ShaperError::DockerConnection("no socket".to_owned()).into();
        assert!(matches!(
            err,
            TcdockError::Runtime(RuntimeError::Connection(_))
        ));
    }

    #[test]
    fn converts_ingress_unavailable_to_reflector_error() {
        let err: TcdockError = ShaperError::IngressUnavailable("web".to_owned()).into();
        assert!(matches!(
            err,
            TcdockError::Shaping(ShapingError::Reflector { .. })
        ));
    }

    #[test]
    fn converts_teardown_failure() {
        let err: TcdockError = ShaperError::TeardownPartialFailure {
            container: "web".to_owned(),
            reason: "device: no mapping".to_owned(),
        }
        .into();
        assert!(matches!(
            err,
            TcdockError::Shaping(ShapingError::Teardown { .. })
        ));
    }

    #[test]
    fn converts_config_error() {
        let err: TcdockError = ShaperError::Config {
            field: "tc_binary".to_owned(),
            reason: "empty".to_owned(),
        }
        .into();
        assert!(matches!(err, TcdockError::Config(_)));
    }
}
