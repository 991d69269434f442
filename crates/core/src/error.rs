//! 에러 타입 -- 도메인별 에러 정의

/// tcdock 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum TcdockError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 컨테이너 런타임 (Docker) 에러
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// 트래픽 셰이핑 에러
    #[error("shaping error: {0}")]
    Shaping(#[from] ShapingError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 컨테이너 런타임 에러
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// 런타임 연결 실패
    #[error("connection failed: {0}")]
    Connection(String),

    /// API 호출 실패
    #[error("api call failed: {0}")]
    Api(String),

    /// 컨테이너를 찾을 수 없음
    #[error("container not found: {0}")]
    NotFound(String),

    /// 이벤트 구독 실패
    #[error("event subscription failed: {0}")]
    Subscription(String),
}

/// 트래픽 셰이핑 에러
#[derive(Debug, thiserror::Error)]
pub enum ShapingError {
    /// 컨테이너에 해당하는 veth 인터페이스 없음
    #[error("no virtual interface for container '{0}'")]
    InterfaceNotFound(String),

    /// 호스트 명령 실행 실패
    #[error("command failed: {command}: {output}")]
    Command { command: String, output: String },

    /// reflector(ifb) 장치 관련 실패
    #[error("reflector error for container '{container}': {reason}")]
    Reflector { container: String, reason: String },

    /// 정지된 컨테이너 정리 실패
    #[error("teardown failed for container '{container}': {reason}")]
    Teardown { container: String, reason: String },

    /// 상태 저장소 에러
    #[error("state store error: {0}")]
    Store(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_into_top_level() {
        let err: TcdockError = ConfigError::InvalidValue {
            field: "docker.event_reconnect_secs".to_owned(),
            reason: "must be 1-3600".to_owned(),
        }
        .into();
        assert!(matches!(err, TcdockError::Config(_)));
        assert!(err.to_string().contains("event_reconnect_secs"));
    }

    #[test]
    fn shaping_command_error_display_includes_output() {
        let err = ShapingError::Command {
            command: "/usr/sbin/tc qdisc del dev veth1 root".to_owned(),
            output: "Cannot find device \"veth1\"".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("qdisc del dev veth1 root"));
        assert!(msg.contains("Cannot find device"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: TcdockError = io.into();
        assert!(matches!(err, TcdockError::Io(_)));
    }
}
