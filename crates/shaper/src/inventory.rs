//! 컨테이너 인벤토리 어댑터 -- 런타임 레코드 → [`ManagedContainer`]
//!
//! 런타임에서 얻은 컨테이너 정보와 정책 라벨을 바탕으로 veth 링크를 찾고,
//! 링크마다 reflector를 준비하여 링크 하나당 [`ManagedContainer`] 하나를 만듭니다.
//!
//! - 스냅샷: 목록 조회 실패는 호출자에게 전파, 컨테이너 단위 실패는 로그 후 건너뜀
//! - reflector 준비 실패: 로그 후 `reflector_link: None`으로 계속 (ingress 단계에서 실패)

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::command::CommandRunner;
use crate::docker::{ContainerRuntime, LifecycleMessage};
use crate::error::ShaperError;
use crate::policy::{ContainerIdentity, ManagedContainer, TrafficPolicy, enabled_filter, short_id};
use crate::reflector::ReflectorManager;
use crate::store::KeyValueStore;
use crate::veth::Resolver;

/// 이벤트 속성에서 컨테이너 이름을 담은 키
const NAME_ATTRIBUTE: &str = "name";

/// 컨테이너 인벤토리 어댑터
pub struct Inventory<R: ContainerRuntime, C: CommandRunner, S: KeyValueStore> {
    runtime: Arc<R>,
    resolver: Resolver<C>,
    reflectors: ReflectorManager<C, S>,
    label_filter: String,
}

impl<R, C, S> Inventory<R, C, S>
where
    R: ContainerRuntime,
    C: CommandRunner,
    S: KeyValueStore,
{
    /// 새 인벤토리 어댑터를 생성합니다.
    pub fn new(runtime: Arc<R>, resolver: Resolver<C>, reflectors: ReflectorManager<C, S>) -> Self {
        Self {
            runtime,
            resolver,
            reflectors,
            label_filter: enabled_filter(),
        }
    }

    /// 컨테이너 런타임
    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// 인터페이스 리졸버
    pub fn resolver(&self) -> &Resolver<C> {
        &self.resolver
    }

    /// reflector 관리자
    pub fn reflectors(&self) -> &ReflectorManager<C, S> {
        &self.reflectors
    }

    /// opt-in 라벨 필터 (`key=value`)
    pub fn label_filter(&self) -> &str {
        &self.label_filter
    }

    /// 실행 중인 opt-in 컨테이너 전체를 해석합니다.
    ///
    /// # Errors
    ///
    /// 목록 조회 자체가 실패한 경우에만 에러를 반환합니다.
    pub async fn snapshot(&self) -> Result<Vec<ManagedContainer>, ShaperError> {
        let running = self.runtime.list_running(&self.label_filter).await?;
        debug!(count = running.len(), "listed opted-in containers");

        let mut managed = Vec::new();
        for container in running {
            match self.resolve_container(&container.id, &container.labels).await {
                Ok(records) => managed.extend(records),
                Err(e) => {
                    error!(
                        container_id = %short_id(&container.id),
                        error = %e,
                        "skipping container"
                    );
                }
            }
        }
        Ok(managed)
    }

    /// start 이벤트 하나를 해석합니다.
    ///
    /// 정책은 이벤트 속성(컨테이너 라벨 포함)에서 읽습니다.
    pub async fn from_start_event(
        &self,
        message: &LifecycleMessage,
    ) -> Result<Vec<ManagedContainer>, ShaperError> {
        self.resolve_container(&message.container_id, &message.attributes)
            .await
    }

    /// die 이벤트에서 정리에 필요한 식별 정보만 얻습니다.
    ///
    /// 이름은 이벤트 속성의 `name`을 우선 사용하고, 없으면 inspect로 조회합니다.
    pub async fn from_stop_event(
        &self,
        message: &LifecycleMessage,
    ) -> Result<ContainerIdentity, ShaperError> {
        let name = match message.attributes.get(NAME_ATTRIBUTE) {
            Some(name) if !name.is_empty() => name.trim_start_matches('/').to_owned(),
            _ => {
                debug!(
                    container_id = %short_id(&message.container_id),
                    "name missing from event, inspecting"
                );
                self.runtime.inspect(&message.container_id).await?.name
            }
        };

        Ok(ContainerIdentity {
            id: short_id(&message.container_id),
            name,
        })
    }

    async fn resolve_container(
        &self,
        id: &str,
        labels: &HashMap<String, String>,
    ) -> Result<Vec<ManagedContainer>, ShaperError> {
        let details = self.runtime.inspect(id).await?;
        let host_links = self
            .resolver
            .resolve(&details.name, &details.sandbox_key)
            .await?;
        let policy = TrafficPolicy::from_labels(labels);

        let mut records = Vec::with_capacity(host_links.len());
        for host_link in host_links {
            let reflector_link = match self.reflectors.provision(&details.name, &host_link).await {
                Ok(device) => Some(device),
                Err(e) => {
                    warn!(
                        container = details.name.as_str(),
                        host_link = host_link.as_str(),
                        error = %e,
                        "ingress traffic will not be shaped"
                    );
                    None
                }
            };

            records.push(ManagedContainer {
                id: short_id(id),
                name: details.name.clone(),
                host_link,
                reflector_link,
                policy: policy.clone(),
            });
        }
        Ok(records)
    }
}
