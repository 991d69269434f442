//! reflector(ifb) 장치 관리
//!
//! qdisc는 egress 트래픽만 셰이핑할 수 있으므로 컨테이너로 들어가는 트래픽은
//! host veth의 ingress에서 ifb 장치로 redirect한 뒤 그 장치의 egress에서
//! 셰이핑합니다. [`ReflectorManager`]는 ifb 장치를 만들고 지우며,
//! 컨테이너 이름 → 장치 이름 매핑을 [`KeyValueStore`]에 기록합니다.
//!
//! 장치 생성과 매핑 기록 사이에 프로세스가 죽으면 장치가 고아로 남습니다.
//! 장치 이름은 host veth 이름에서 결정적으로 유도되므로
//! [`reflector_name`]으로 다시 계산할 수 있습니다.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::command::{CommandRunner, ShellCommand};
use crate::error::ShaperError;
use crate::store::KeyValueStore;

/// `ip link add`가 이미 존재하는 장치에 대해 내는 응답
const LINK_EXISTS: &str = "File exists";

/// host veth 이름에서 reflector 장치 이름을 유도합니다.
///
/// ```
/// use tcdock_shaper::reflector::reflector_name;
///
/// assert_eq!(reflector_name("veth1a2b3c4"), "ifb1a2b3c4");
/// ```
pub fn reflector_name(host_link: &str) -> String {
    let suffix = host_link.strip_prefix("veth").unwrap_or(host_link);
    format!("ifb{suffix}")
}

/// reflector 장치 관리자
pub struct ReflectorManager<C: CommandRunner, S: KeyValueStore> {
    runner: Arc<C>,
    store: Arc<S>,
    ip_binary: String,
}

impl<C: CommandRunner, S: KeyValueStore> Clone for ReflectorManager<C, S> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            store: Arc::clone(&self.store),
            ip_binary: self.ip_binary.clone(),
        }
    }
}

impl<C: CommandRunner, S: KeyValueStore> ReflectorManager<C, S> {
    /// 새 관리자를 생성합니다.
    pub fn new(runner: Arc<C>, store: Arc<S>, ip_binary: impl Into<String>) -> Self {
        Self {
            runner,
            store,
            ip_binary: ip_binary.into(),
        }
    }

    /// 매핑 저장소를 반환합니다.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// reflector 장치를 만들고 활성화한 뒤 매핑을 기록합니다.
    ///
    /// 같은 이름의 장치가 이미 있으면 (재시작 후 재적용) 그대로 사용합니다.
    ///
    /// # Errors
    ///
    /// 어느 단계든 실패하면 `ShaperError::ProvisionFailed`.
    pub async fn provision(&self, container: &str, host_link: &str) -> Result<String, ShaperError> {
        let device = reflector_name(host_link);
        let failed = |reason: String| ShaperError::ProvisionFailed {
            container: container.to_owned(),
            reason,
        };

        let add = self.ip(["link", "add", "name", device.as_str(), "type", "ifb"]);
        debug!(command = %add, "creating reflector");
        let out = self.runner.run(&add).await.map_err(|e| failed(e.to_string()))?;
        if !out.success {
            if out.output.contains(LINK_EXISTS) {
                debug!(reflector = device.as_str(), "reflector already exists");
            } else {
                return Err(failed(format!("cmd: {add}, out: {}", out.output)));
            }
        }

        let up = self.ip(["link", "set", "dev", device.as_str(), "up"]);
        debug!(command = %up, "bringing reflector up");
        let out = self.runner.run(&up).await.map_err(|e| failed(e.to_string()))?;
        if !out.success {
            return Err(failed(format!("cmd: {up}, out: {}", out.output)));
        }

        self.store
            .put(container, &device)
            .await
            .map_err(|e| failed(e.to_string()))?;

        info!(container, host_link, reflector = device.as_str(), "reflector provisioned");
        Ok(device)
    }

    /// 매핑된 reflector 장치를 내리고 삭제한 뒤 매핑을 지웁니다.
    ///
    /// 매핑 레코드는 장치 명령의 성공 여부와 관계없이 삭제를 시도합니다.
    ///
    /// # Errors
    ///
    /// - `ShaperError::MappingNotFound`: 기록된 매핑이 없음
    /// - `ShaperError::CommandFailed`: 장치 명령 실패 (첫 번째 실패)
    /// - `ShaperError::Store`: 매핑 조회/삭제 실패
    pub async fn deprovision(&self, container: &str) -> Result<String, ShaperError> {
        let Some(device) = self.store.get(container).await? else {
            if let Err(e) = self.store.delete(container).await {
                warn!(container, error = %e, "failed to remove reflector record");
            }
            return Err(ShaperError::MappingNotFound(container.to_owned()));
        };

        let mut first_error = None;
        for args in [
            ["link", "set", "dev", device.as_str(), "down"].as_slice(),
            ["link", "del", "name", device.as_str()].as_slice(),
        ] {
            let cmd = self.ip(args.iter().copied());
            debug!(command = %cmd, "removing reflector");
            let result = match self.runner.run(&cmd).await {
                Ok(out) if out.success => Ok(()),
                Ok(out) => Err(ShaperError::CommandFailed {
                    command: cmd.to_string(),
                    output: out.output,
                }),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(container, reflector = device.as_str(), error = %e, "reflector command failed");
                first_error.get_or_insert(e);
            }
        }

        let deleted = self.store.delete(container).await;

        if let Some(e) = first_error {
            return Err(e);
        }
        deleted?;
        info!(container, reflector = device.as_str(), "reflector removed");
        Ok(device)
    }

    fn ip<'a>(&self, args: impl IntoIterator<Item = &'a str>) -> ShellCommand {
        ShellCommand::new(self.ip_binary.as_str(), args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, MockRunner};
    use crate::store::MemoryStore;

    fn manager(runner: MockRunner) -> (ReflectorManager<MockRunner, MemoryStore>, Arc<MockRunner>) {
        let runner = Arc::new(runner);
        let store = Arc::new(MemoryStore::new());
        (ReflectorManager::new(Arc::clone(&runner), store, "ip"), runner)
    }

    #[test]
    fn name_derives_from_veth_suffix() {
        assert_eq!(reflector_name("veth9f8e7d6"), "ifb9f8e7d6");
        assert_eq!(reflector_name("eth0"), "ifbeth0");
    }

    #[tokio::test]
    async fn provision_creates_device_and_records_mapping() {
        let (manager, runner) = manager(MockRunner::new());

        let device = manager.provision("web", "veth1a2b").await.unwrap();
        assert_eq!(device, "ifb1a2b");
        assert_eq!(
            runner.executed(),
            vec!["ip link add name ifb1a2b type ifb", "ip link set dev ifb1a2b up"]
        );
        assert_eq!(manager.store().get("web").await.unwrap().as_deref(), Some("ifb1a2b"));
    }

    #[tokio::test]
    async fn provision_reuses_existing_device() {
        let (manager, _) = manager(MockRunner::new().respond(
            "ip link add name ifb1a2b type ifb",
            CommandOutput::failed("RTNETLINK answers: File exists"),
        ));
        assert_eq!(manager.provision("web", "veth1a2b").await.unwrap(), "ifb1a2b");
    }

    #[tokio::test]
    async fn provision_failure_leaves_no_mapping() {
        let (manager, _) = manager(MockRunner::new().respond(
            "ip link add name ifb1a2b type ifb",
            CommandOutput::failed("Error: Unknown device type."),
        ));
        let err = manager.provision("web", "veth1a2b").await.unwrap_err();
        assert!(matches!(err, ShaperError::ProvisionFailed { ref container, .. } if container == "web"));
        assert!(manager.store().is_empty().await);
    }

    #[tokio::test]
    async fn reprovision_after_deprovision_yields_same_name() {
        let (manager, _) = manager(MockRunner::new());
        let first = manager.provision("web", "veth77").await.unwrap();
        manager.deprovision("web").await.unwrap();
        let second = manager.provision("web", "veth77").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn deprovision_removes_device_and_mapping() {
        let (manager, runner) = manager(MockRunner::new());
        manager.store().put("web", "ifb1a2b").await.unwrap();

        assert_eq!(manager.deprovision("web").await.unwrap(), "ifb1a2b");
        assert_eq!(
            runner.executed(),
            vec!["ip link set dev ifb1a2b down", "ip link del name ifb1a2b"]
        );
        assert!(manager.store().is_empty().await);
    }

    #[tokio::test]
    async fn deprovision_without_mapping_is_error() {
        let (manager, runner) = manager(MockRunner::new());
        let err = manager.deprovision("ghost").await.unwrap_err();
        assert!(matches!(err, ShaperError::MappingNotFound(ref name) if name == "ghost"));
        assert!(runner.executed().is_empty());
    }

    #[tokio::test]
    async fn deprovision_drops_record_even_when_delete_fails() {
        let (manager, runner) = manager(MockRunner::new().respond(
            "ip link set dev ifb1a2b down",
            CommandOutput::failed("Cannot find device \"ifb1a2b\""),
        ));
        manager.store().put("web", "ifb1a2b").await.unwrap();

        let err = manager.deprovision("web").await.unwrap_err();
        assert!(matches!(err, ShaperError::CommandFailed { ref command, .. } if command == "ip link set dev ifb1a2b down"));
        // 두 번째 명령도 시도됨
        assert_eq!(runner.executed().len(), 2);
        assert!(manager.store().is_empty().await);
    }
}
