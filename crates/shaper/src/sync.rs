//! 라이프사이클 동기화 -- 부트스트랩 + 이벤트 감시 + 재구독
//!
//! [`Synchronizer`]는 시작 시 실행 중인 opt-in 컨테이너 전체에 정책을 적용한 뒤,
//! start/die 이벤트를 순차적으로 처리합니다.
//!
//! # 상태 전이
//!
//! ```text
//! Bootstrapping ──snapshot applied──▶ Watching ◀──resubscribed── Reconnecting
//!                                        │                          ▲
//!                                        └──── stream error/end ────┘
//! ```
//!
//! # 태스크 구성
//!
//! ```text
//! ContainerRuntime::subscribe ──▶ EventPump (spawned)
//!                                   ├── start channel ──┐
//!                                   └── die channel ────┴──▶ Synchronizer::run (sequential)
//! ```
//!
//! 이벤트 구독은 부트스트랩보다 먼저 열어 두므로 부트스트랩 중 도착한 이벤트도
//! 큐에 쌓였다가 처리됩니다. 두 채널의 알림은 도착 순서(시퀀스 번호)대로 처리합니다.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tcdock_core::metrics as m;

use crate::command::CommandRunner;
use crate::config::ShaperConfig;
use crate::docker::{ContainerRuntime, LifecycleAction, LifecycleMessage};
use crate::error::ShaperError;
use crate::inventory::Inventory;
use crate::netns::NamespaceHandles;
use crate::policy::{ContainerIdentity, ManagedContainer, short_id};
use crate::reflector::ReflectorManager;
use crate::store::KeyValueStore;
use crate::tc::PolicyApplier;
use crate::veth::Resolver;

/// 동기화기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// 초기 스냅샷 적용 중
    Bootstrapping,
    /// 이벤트 감시 중
    Watching,
    /// 이벤트 스트림 재구독 대기 중
    Reconnecting,
}

impl SyncState {
    /// 상태 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bootstrapping => "bootstrapping",
            Self::Watching => "watching",
            Self::Reconnecting => "reconnecting",
        }
    }
}

/// 상태를 결정하는 두 가지 사실
#[derive(Debug, Clone, Copy, Default)]
struct SyncStatus {
    bootstrapped: bool,
    stream_up: bool,
}

impl SyncStatus {
    fn state(&self) -> SyncState {
        match (self.bootstrapped, self.stream_up) {
            (false, _) => SyncState::Bootstrapping,
            (true, true) => SyncState::Watching,
            (true, false) => SyncState::Reconnecting,
        }
    }
}

/// 동기화기 상태 관찰 핸들
#[derive(Debug, Clone)]
pub struct SyncHandle {
    rx: watch::Receiver<SyncStatus>,
}

impl SyncHandle {
    /// 현재 상태
    pub fn state(&self) -> SyncState {
        self.rx.borrow().state()
    }

    /// 지정한 상태가 될 때까지 기다립니다.
    ///
    /// 동기화기가 사라지면 `false`를 반환합니다.
    pub async fn wait_for(&self, target: SyncState) -> bool {
        let mut rx = self.rx.clone();
        rx.wait_for(|status| status.state() == target).await.is_ok()
    }
}

/// 순서 번호가 붙은 알림
#[derive(Debug)]
struct Sequenced {
    seq: u64,
    message: LifecycleMessage,
}

/// 처리 대상 알림
#[derive(Debug)]
enum Notification {
    Start(LifecycleMessage),
    Die(LifecycleMessage),
}

/// start/die 두 채널을 도착 순서대로 합치는 수신 측
struct NotificationQueue {
    start_rx: mpsc::UnboundedReceiver<Sequenced>,
    die_rx: mpsc::UnboundedReceiver<Sequenced>,
    start: Option<Sequenced>,
    die: Option<Sequenced>,
    closed: bool,
}

impl NotificationQueue {
    fn new(
        start_rx: mpsc::UnboundedReceiver<Sequenced>,
        die_rx: mpsc::UnboundedReceiver<Sequenced>,
    ) -> Self {
        Self {
            start_rx,
            die_rx,
            start: None,
            die: None,
            closed: false,
        }
    }

    async fn next(&mut self) -> Option<Notification> {
        loop {
            if self.start.is_none() {
                self.start = self.start_rx.try_recv().ok();
            }
            if self.die.is_none() {
                self.die = self.die_rx.try_recv().ok();
            }

            let start_seq = self.start.as_ref().map(|s| s.seq);
            let die_seq = self.die.as_ref().map(|s| s.seq);
            let start_first = match (start_seq, die_seq) {
                (Some(start), Some(die)) => start < die,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => {
                    if self.closed {
                        return None;
                    }
                    let (is_start, received) = tokio::select! {
                        m = self.start_rx.recv() => (true, m),
                        m = self.die_rx.recv() => (false, m),
                    };
                    match (is_start, received) {
                        (true, Some(m)) => self.start = Some(m),
                        (false, Some(m)) => self.die = Some(m),
                        (_, None) => self.closed = true,
                    }
                    continue;
                }
            };

            let next = if start_first {
                self.start.take().map(|s| Notification::Start(s.message))
            } else {
                self.die.take().map(|s| Notification::Die(s.message))
            };
            return next;
        }
    }
}

/// 이벤트 구독을 유지하며 알림을 채널로 전달하는 태스크
struct EventPump<R: ContainerRuntime> {
    runtime: Arc<R>,
    label_filter: String,
    reconnect_delay: Duration,
    status: Arc<watch::Sender<SyncStatus>>,
    start_tx: mpsc::UnboundedSender<Sequenced>,
    die_tx: mpsc::UnboundedSender<Sequenced>,
    seq: u64,
}

impl<R: ContainerRuntime> EventPump<R> {
    /// 수신 측이 사라질 때까지 구독을 유지합니다.
    ///
    /// 첫 구독 시도가 끝나면 (성공/실패 무관) `first_attempt`로 알립니다.
    async fn run(mut self, first_attempt: oneshot::Sender<()>) {
        let mut first_attempt = Some(first_attempt);

        loop {
            match self.runtime.subscribe(&self.label_filter).await {
                Ok(mut stream) => {
                    self.status.send_modify(|s| s.stream_up = true);
                    info!("subscribed to container events");
                    if let Some(tx) = first_attempt.take() {
                        let _ = tx.send(());
                    }

                    loop {
                        match stream.next().await {
                            Some(Ok(message)) => {
                                if !self.forward(message) {
                                    debug!("event receivers dropped, stopping event pump");
                                    return;
                                }
                            }
                            Some(Err(e)) => {
                                error!(error = %e, "event stream failed");
                                break;
                            }
                            None => {
                                warn!("event stream ended");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "event subscription failed");
                    if let Some(tx) = first_attempt.take() {
                        let _ = tx.send(());
                    }
                }
            }

            self.status.send_modify(|s| s.stream_up = false);
            metrics::counter!(m::EVENT_STREAM_RECONNECTS_TOTAL).increment(1);
            warn!(
                delay_secs = self.reconnect_delay.as_secs_f64(),
                "resubscribing to container events after delay"
            );

            tokio::select! {
                () = tokio::time::sleep(self.reconnect_delay) => {}
                () = self.start_tx.closed() => {
                    debug!("event receivers dropped, stopping event pump");
                    return;
                }
            }
        }
    }

    /// 알림을 해당 채널로 보냅니다. 수신 측이 없으면 `false`.
    fn forward(&mut self, message: LifecycleMessage) -> bool {
        metrics::counter!(
            m::EVENTS_RECEIVED_TOTAL,
            m::LABEL_ACTION => message.action.as_str().to_owned()
        )
        .increment(1);

        self.seq += 1;
        let tx = match message.action {
            LifecycleAction::Start => &self.start_tx,
            LifecycleAction::Die => &self.die_tx,
            LifecycleAction::Other(ref action) => {
                debug!(action = action.as_str(), "ignoring container event");
                return true;
            }
        };
        tx.send(Sequenced {
            seq: self.seq,
            message,
        })
        .is_ok()
    }
}

/// die 이벤트 정리 결과
#[derive(Debug)]
pub struct TeardownReport {
    /// 대상 컨테이너
    pub container: ContainerIdentity,
    /// reflector 제거 결과 (제거된 장치 이름)
    pub reflector: Result<String, ShaperError>,
    /// 네임스페이스 핸들 제거 결과
    pub namespace: Result<(), ShaperError>,
}

impl TeardownReport {
    /// 두 단계가 모두 성공했는지 확인합니다.
    pub fn is_complete(&self) -> bool {
        self.reflector.is_ok() && self.namespace.is_ok()
    }

    /// 실패한 단계를 하나의 에러로 묶습니다.
    pub fn failure(&self) -> Option<ShaperError> {
        let mut reasons = Vec::new();
        if let Err(e) = &self.reflector {
            reasons.push(format!("reflector: {e}"));
        }
        if let Err(e) = &self.namespace {
            reasons.push(format!("namespace: {e}"));
        }
        if reasons.is_empty() {
            return None;
        }
        Some(ShaperError::TeardownPartialFailure {
            container: self.container.name.clone(),
            reason: reasons.join("; "),
        })
    }
}

/// 라이프사이클 동기화기
pub struct Synchronizer<R: ContainerRuntime, C: CommandRunner, S: KeyValueStore> {
    inventory: Inventory<R, C, S>,
    applier: PolicyApplier<C>,
    reconnect_delay: Duration,
    status: Arc<watch::Sender<SyncStatus>>,
}

impl<R, C, S> Synchronizer<R, C, S>
where
    R: ContainerRuntime,
    C: CommandRunner,
    S: KeyValueStore,
{
    /// 현재 상태
    pub fn state(&self) -> SyncState {
        self.status.borrow().state()
    }

    /// 인벤토리 어댑터
    pub fn inventory(&self) -> &Inventory<R, C, S> {
        &self.inventory
    }

    /// shutdown 신호를 받을 때까지 동기화를 수행합니다.
    ///
    /// # Errors
    ///
    /// 부트스트랩 시 컨테이너 목록 조회가 실패하면 에러를 반환합니다.
    /// 그 밖의 컨테이너 단위 실패는 로그로만 남습니다.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ShaperError> {
        let (mut queue, pump) = self.spawn_pump().await;

        if let Err(e) = self.bootstrap().await {
            pump.abort();
            return Err(e);
        }
        self.status.send_modify(|s| s.bootstrapped = true);
        info!(state = self.state().as_str(), "bootstrap complete");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("synchronizer shutting down");
                    break;
                }
                notification = queue.next() => match notification {
                    Some(Notification::Start(message)) => self.handle_start(&message).await,
                    Some(Notification::Die(message)) => {
                        self.handle_die(&message).await;
                    }
                    None => {
                        warn!("event pump stopped");
                        break;
                    }
                },
            }
        }

        pump.abort();
        Ok(())
    }

    /// 이벤트 펌프를 띄우고 첫 구독 시도가 끝날 때까지 기다립니다.
    async fn spawn_pump(&self) -> (NotificationQueue, JoinHandle<()>) {
        let (start_tx, start_rx) = mpsc::unbounded_channel();
        let (die_tx, die_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let pump = EventPump {
            runtime: Arc::clone(self.inventory.runtime()),
            label_filter: self.inventory.label_filter().to_owned(),
            reconnect_delay: self.reconnect_delay,
            status: Arc::clone(&self.status),
            start_tx,
            die_tx,
            seq: 0,
        };
        let handle = tokio::spawn(pump.run(ready_tx));
        let _ = ready_rx.await;

        (NotificationQueue::new(start_rx, die_rx), handle)
    }

    /// 실행 중인 컨테이너 전체에 정책을 적용합니다.
    ///
    /// 성공적으로 적용된 레코드 수를 반환합니다.
    pub async fn bootstrap(&self) -> Result<usize, ShaperError> {
        let containers = self.inventory.snapshot().await?;
        let mut applied = 0;
        for container in &containers {
            if self.apply(container).await {
                applied += 1;
            }
        }
        info!(total = containers.len(), applied, "initial policies applied");
        Ok(applied)
    }

    /// start 이벤트를 처리합니다.
    pub async fn handle_start(&self, message: &LifecycleMessage) {
        match self.inventory.from_start_event(message).await {
            Ok(containers) => {
                for container in &containers {
                    self.apply(container).await;
                }
            }
            Err(e) => {
                metrics::counter!(m::POLICY_FAILURES_TOTAL).increment(1);
                error!(
                    container_id = %short_id(&message.container_id),
                    error = %e,
                    "cannot resolve started container"
                );
            }
        }
    }

    /// die 이벤트를 처리합니다.
    pub async fn handle_die(&self, message: &LifecycleMessage) -> Option<TeardownReport> {
        match self.inventory.from_stop_event(message).await {
            Ok(identity) => {
                info!(
                    container = identity.name.as_str(),
                    container_id = identity.id.as_str(),
                    "container stopped"
                );
                Some(self.teardown(identity).await)
            }
            Err(e) => {
                metrics::counter!(m::TEARDOWN_FAILURES_TOTAL).increment(1);
                error!(
                    container_id = %short_id(&message.container_id),
                    error = %e,
                    "cannot identify stopped container"
                );
                None
            }
        }
    }

    /// reflector와 네임스페이스 핸들을 각각 제거합니다.
    ///
    /// 한 단계가 실패해도 다른 단계는 시도합니다.
    pub async fn teardown(&self, container: ContainerIdentity) -> TeardownReport {
        let reflector = self.inventory.reflectors().deprovision(&container.name).await;
        let namespace = self
            .inventory
            .resolver()
            .namespaces()
            .remove(&container.name)
            .await;

        let report = TeardownReport {
            container,
            reflector,
            namespace,
        };

        match report.failure() {
            Some(e) => {
                metrics::counter!(m::TEARDOWN_FAILURES_TOTAL).increment(1);
                error!(container = report.container.name.as_str(), error = %e, "teardown incomplete");
            }
            None => {
                metrics::counter!(m::TEARDOWNS_TOTAL).increment(1);
                info!(container = report.container.name.as_str(), "teardown complete");
            }
        }
        report
    }

    async fn apply(&self, container: &ManagedContainer) -> bool {
        match self.applier.apply(container).await {
            Ok(()) => {
                metrics::counter!(m::POLICIES_APPLIED_TOTAL).increment(1);
                info!(summary = %container, "policy applied");
                true
            }
            Err(e) => {
                metrics::counter!(m::POLICY_FAILURES_TOTAL).increment(1);
                error!(
                    container = container.name.as_str(),
                    container_id = container.id.as_str(),
                    host_link = container.host_link.as_str(),
                    error = %e,
                    "policy application failed"
                );
                false
            }
        }
    }
}

/// 동기화기 빌더
pub struct SynchronizerBuilder<R: ContainerRuntime, C: CommandRunner, S: KeyValueStore> {
    config: ShaperConfig,
    runtime: Option<Arc<R>>,
    runner: Option<Arc<C>>,
    store: Option<Arc<S>>,
}

impl<R, C, S> SynchronizerBuilder<R, C, S>
where
    R: ContainerRuntime,
    C: CommandRunner,
    S: KeyValueStore,
{
    /// 기본 설정으로 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: ShaperConfig::default(),
            runtime: None,
            runner: None,
            store: None,
        }
    }

    /// 셰이퍼 설정
    pub fn config(mut self, config: ShaperConfig) -> Self {
        self.config = config;
        self
    }

    /// 컨테이너 런타임
    pub fn runtime(mut self, runtime: Arc<R>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// 명령 실행기
    pub fn runner(mut self, runner: Arc<C>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// reflector 매핑 저장소
    pub fn store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    /// 동기화기와 상태 핸들을 생성합니다.
    ///
    /// # Errors
    ///
    /// 설정이 유효하지 않거나 필수 구성 요소가 빠진 경우 `ShaperError::Config`.
    pub fn build(self) -> Result<(Synchronizer<R, C, S>, SyncHandle), ShaperError> {
        self.config.validate()?;

        let missing = |field: &str| ShaperError::Config {
            field: field.to_owned(),
            reason: "must be provided".to_owned(),
        };
        let runtime = self.runtime.ok_or_else(|| missing("runtime"))?;
        let runner = self.runner.ok_or_else(|| missing("runner"))?;
        let store = self.store.ok_or_else(|| missing("store"))?;

        let resolver = Resolver::new(
            Arc::clone(&runner),
            self.config.ip_binary.as_str(),
            NamespaceHandles::new(self.config.netns_dir.as_str()),
        );
        let reflectors = ReflectorManager::new(
            Arc::clone(&runner),
            store,
            self.config.ip_binary.as_str(),
        );
        let applier = PolicyApplier::new(runner, self.config.tc_binary.as_str());

        let (status_tx, status_rx) = watch::channel(SyncStatus::default());

        let synchronizer = Synchronizer {
            inventory: Inventory::new(runtime, resolver, reflectors),
            applier,
            reconnect_delay: self.config.reconnect_delay,
            status: Arc::new(status_tx),
        };
        Ok((synchronizer, SyncHandle { rx: status_rx }))
    }
}

impl<R, C, S> Default for SynchronizerBuilder<R, C, S>
where
    R: ContainerRuntime,
    C: CommandRunner,
    S: KeyValueStore,
{
    fn default() -> Self {
        Self::new()
    }
}
