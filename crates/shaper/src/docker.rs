//! 컨테이너 런타임 추상화
//!
//! [`ContainerRuntime`] trait은 셰이퍼가 쓰는 Docker 작업 네 가지를 다룹니다:
//! 연결 확인, opt-in 된 실행 중 컨테이너 목록, 이름과 네트워크 네임스페이스를 얻는
//! inspect, start/die 이벤트 구독. 운영 코드는 [`BollardRuntime`], 테스트는
//! `MockRuntime`을 사용합니다.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────┐
//!   │ Synchronizer │
//!   └──────┬───────┘
//!          ▼
//!   ┌──────────────┐
//!   │  Inventory   │
//!   └──────┬───────┘
//!          ▼
//!  ┌────────────────┐
//!  │ContainerRuntime│ (trait)
//!  └────────────────┘
//!       │       │
//!       ▼       ▼
//!   ┌───────┐ ┌────┐
//!   │Bollard│ │Mock│
//!   └───┬───┘ └────┘
//!       ▼
//!   Docker Daemon
//! ```
//!
//! # 컨테이너 ID 검증
//!
//! [`ContainerRuntime::inspect`]는 데몬 호출 전에 ID를 검증합니다:
//! 1-64자, ASCII 16진수만 허용.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::error::ShaperError;

/// 라이프사이클 메시지 스트림
///
/// `Err` 항목이 오거나 스트림이 끝나면 구독이 끊어진 것이므로 다시 구독해야 합니다.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<LifecycleMessage, ShaperError>> + Send>>;

/// 컨테이너 ID를 검증합니다.
///
/// Docker 컨테이너 ID는 64자 16진수 문자열(또는 더 짧은 접두어)입니다.
fn validate_container_id(id: &str) -> Result<(), ShaperError> {
    if id.is_empty() || id.len() > 64 {
        return Err(ShaperError::DockerApi(format!(
            "invalid container ID: length {} (must be 1-64)",
            id.len()
        )));
    }
    if !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ShaperError::DockerApi(
            "invalid container ID: contains non-hex characters".to_owned(),
        ));
    }
    Ok(())
}

/// 목록 조회로 얻은 실행 중 컨테이너
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContainer {
    /// 전체 컨테이너 ID
    pub id: String,
    /// 컨테이너 라벨
    pub labels: HashMap<String, String>,
}

/// inspect 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    /// 전체 컨테이너 ID
    pub id: String,
    /// 앞의 `/`를 뗀 이름
    pub name: String,
    /// 컨테이너 네트워크 네임스페이스 경로 (`NetworkSettings.SandboxKey`)
    pub sandbox_key: String,
    /// 컨테이너 라벨
    pub labels: HashMap<String, String>,
}

/// 이벤트의 라이프사이클 동작
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    /// 컨테이너 시작
    Start,
    /// 컨테이너 종료
    Die,
    /// 그 밖의 동작 (구독 대상은 아니지만 무시하고 넘어감)
    Other(String),
}

impl LifecycleAction {
    /// Docker 이벤트 action 문자열을 해석합니다.
    pub fn parse(action: &str) -> Self {
        match action {
            "start" => Self::Start,
            "die" => Self::Die,
            other => Self::Other(other.to_owned()),
        }
    }

    /// `action` 메트릭 라벨 값
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Die => "die",
            Self::Other(other) => other,
        }
    }
}

/// 컨테이너 라이프사이클 알림
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleMessage {
    /// 발생한 동작
    pub action: LifecycleAction,
    /// 전체 컨테이너 ID
    pub container_id: String,
    /// Actor 속성 (라벨과 `name`, `image` 등)
    pub attributes: HashMap<String, String>,
}

/// 컨테이너 런타임 trait
///
/// 이벤트 펌프 태스크와 공유하므로 `Send + Sync + 'static`입니다.
///
/// # 에러 처리
///
/// - **404**: `ShaperError::ContainerNotFound`
/// - **연결 실패**: `ShaperError::DockerConnection`
/// - **스트림 에러**: `ShaperError::SubscriptionFailed`
pub trait ContainerRuntime: Send + Sync + 'static {
    /// 데몬 연결을 확인합니다.
    fn ping(&self) -> impl Future<Output = Result<(), ShaperError>> + Send;

    /// `label_filter`(`key=value`)가 붙은 실행 중 컨테이너를 조회합니다.
    fn list_running(
        &self,
        label_filter: &str,
    ) -> impl Future<Output = Result<Vec<RuntimeContainer>, ShaperError>> + Send;

    /// 컨테이너를 inspect 합니다.
    ///
    /// # Errors
    ///
    /// - `ShaperError::ContainerNotFound`: 컨테이너 없음 (404)
    /// - `ShaperError::DockerApi`: 잘못된 ID 또는 기타 API 에러
    fn inspect(&self, id: &str)
    -> impl Future<Output = Result<ContainerDetails, ShaperError>> + Send;

    /// `label_filter`가 붙은 컨테이너의 start/die 이벤트를 구독합니다.
    fn subscribe(
        &self,
        label_filter: &str,
    ) -> impl Future<Output = Result<EventStream, ShaperError>> + Send;
}

/// `bollard` 기반 운영 런타임
///
/// # 연결 관리
///
/// - 연결 타임아웃: 120초
/// - API 버전: 기본값 (자동 협상)
/// - 소켓 경로: 설정 가능, 비어 있으면 플랫폼 기본값
pub struct BollardRuntime {
    docker: Arc<bollard::Docker>,
}

impl BollardRuntime {
    /// 플랫폼 기본 소켓으로 연결합니다.
    ///
    /// # Errors
    ///
    /// 클라이언트를 만들 수 없으면 `ShaperError::DockerConnection`.
    pub fn connect_local() -> Result<Self, ShaperError> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            ShaperError::DockerConnection(format!("failed to connect to docker: {e}"))
        })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// 지정한 소켓 경로로 연결합니다.
    ///
    /// # Errors
    ///
    /// 클라이언트를 만들 수 없으면 `ShaperError::DockerConnection`.
    pub fn connect_with_socket(socket_path: &str) -> Result<Self, ShaperError> {
        let docker =
            bollard::Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| {
                    ShaperError::DockerConnection(format!(
                        "failed to connect to docker at {socket_path}: {e}"
                    ))
                })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// `socket`으로 연결하고, 비어 있으면 플랫폼 기본값을 사용합니다.
    pub fn connect(socket: &str) -> Result<Self, ShaperError> {
        if socket.is_empty() {
            Self::connect_local()
        } else {
            Self::connect_with_socket(socket)
        }
    }
}

impl ContainerRuntime for BollardRuntime {
    async fn ping(&self) -> Result<(), ShaperError> {
        self.docker
            .ping()
            .await
            .map_err(|e| ShaperError::DockerConnection(format!("ping failed: {e}")))?;
        Ok(())
    }

    async fn list_running(&self, label_filter: &str) -> Result<Vec<RuntimeContainer>, ShaperError> {
        use bollard::container::ListContainersOptions;

        let mut filters = HashMap::new();
        filters.insert("label".to_owned(), vec![label_filter.to_owned()]);
        filters.insert("status".to_owned(), vec!["running".to_owned()]);

        let options = ListContainersOptions::<String> {
            all: false,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| ShaperError::DockerApi(format!("list containers failed: {e}")))?;

        Ok(containers
            .into_iter()
            .map(|c| RuntimeContainer {
                id: c.id.unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, ShaperError> {
        validate_container_id(id)?;

        let details = self.docker.inspect_container(id, None).await.map_err(|e| {
            if e.to_string().contains("404") {
                ShaperError::ContainerNotFound(id.to_owned())
            } else {
                ShaperError::DockerApi(format!("inspect container failed: {e}"))
            }
        })?;

        Ok(ContainerDetails {
            id: details.id.unwrap_or_else(|| id.to_owned()),
            name: details
                .name
                .map(|n| n.trim_start_matches('/').to_owned())
                .unwrap_or_default(),
            sandbox_key: details
                .network_settings
                .and_then(|n| n.sandbox_key)
                .unwrap_or_default(),
            labels: details.config.and_then(|c| c.labels).unwrap_or_default(),
        })
    }

    async fn subscribe(&self, label_filter: &str) -> Result<EventStream, ShaperError> {
        use bollard::system::EventsOptions;

        let mut filters = HashMap::new();
        filters.insert("type".to_owned(), vec!["container".to_owned()]);
        filters.insert("event".to_owned(), vec!["start".to_owned(), "die".to_owned()]);
        filters.insert("label".to_owned(), vec![label_filter.to_owned()]);

        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        let stream = self.docker.events(Some(options)).map(|item| {
            item.map(|message| {
                let actor = message.actor.unwrap_or_default();
                LifecycleMessage {
                    action: LifecycleAction::parse(message.action.as_deref().unwrap_or_default()),
                    container_id: actor.id.unwrap_or_default(),
                    attributes: actor.attributes.unwrap_or_default(),
                }
            })
            .map_err(|e| ShaperError::SubscriptionFailed(e.to_string()))
        });

        Ok(Box::pin(stream))
    }
}

/// 테스트용 Mock 컨테이너 런타임
///
/// `subscribe`는 미리 등록한 결과를 순서대로 반환하고, 등록된 결과가 없으면
/// 끝나지 않는 빈 스트림을 반환합니다.
#[cfg(test)]
#[derive(Default)]
pub struct MockRuntime {
    /// list/inspect 대상 컨테이너
    pub containers: Vec<ContainerDetails>,
    /// list_running 실패 시뮬레이션
    pub fail_list: bool,
    subscriptions: std::sync::Mutex<std::collections::VecDeque<Result<EventStream, ShaperError>>>,
}

#[cfg(test)]
impl MockRuntime {
    /// 빈 mock 런타임을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 컨테이너를 추가합니다.
    pub fn with_container(mut self, container: ContainerDetails) -> Self {
        self.containers.push(container);
        self
    }

    /// list_running이 실패하도록 설정합니다.
    pub fn with_failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    /// 다음 subscribe 호출 결과를 등록합니다.
    pub fn push_subscription(&self, result: Result<EventStream, ShaperError>) {
        self.subscriptions.lock().unwrap().push_back(result);
    }
}

#[cfg(test)]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> Result<(), ShaperError> {
        Ok(())
    }

    async fn list_running(&self, _label_filter: &str) -> Result<Vec<RuntimeContainer>, ShaperError> {
        if self.fail_list {
            return Err(ShaperError::DockerApi("mock list failure".to_owned()));
        }
        Ok(self
            .containers
            .iter()
            .map(|c| RuntimeContainer {
                id: c.id.clone(),
                labels: c.labels.clone(),
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, ShaperError> {
        self.containers
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| ShaperError::ContainerNotFound(id.to_owned()))
    }

    async fn subscribe(&self, _label_filter: &str) -> Result<EventStream, ShaperError> {
        let next = self.subscriptions.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(Box::pin(futures::stream::pending::<
                Result<LifecycleMessage, ShaperError>,
            >()))
        })
    }
}
