//! tcdock-shaper: Docker 호스트의 컨테이너별 트래픽 셰이핑
//!
//! 컨테이너는 `org.label-schema.tc.enabled=1` 라벨로 opt-in 하고
//! `org.label-schema.tc.*` 라벨로 대역폭과 네트워크 장애 정책을 선언합니다.
//! 셰이퍼는 컨테이너의 호스트 쪽 veth를 찾고, ingress 셰이핑용 ifb reflector를
//! 준비하고, `tc` 규칙을 설치한 뒤 start/die 이벤트에 맞춰 상태를 유지합니다.
//!
//! # 모듈 구성
//!
//! - [`error`]: 도메인 에러 (`ShaperError`)
//! - [`config`]: 셰이퍼 설정 (`ShaperConfig`, 빌더)
//! - [`command`]: 호스트 명령 실행 (`CommandRunner` trait, `ProcessRunner`)
//! - [`store`]: 영속 키-값 저장소 (`KeyValueStore` trait, `FileStore`)
//! - [`netns`]: 네트워크 네임스페이스 핸들 (`NamespaceHandles`)
//! - [`policy`]: 라벨 해석과 정책 모델 (`TrafficPolicy`, `ManagedContainer`)
//! - [`veth`]: veth 페어 탐색 (`VirtualLink`, `Resolver`)
//! - [`reflector`]: ifb 장치 생명주기 (`ReflectorManager`)
//! - [`tc`]: tc 규칙 컴파일러와 적용기 (`TcOp`, `PolicyApplier`)
//! - [`docker`]: 컨테이너 런타임 추상화 (`ContainerRuntime` trait, `BollardRuntime`)
//! - [`inventory`]: 런타임 레코드 → 관리 대상 컨테이너 (`Inventory`)
//! - [`sync`]: 라이프사이클 동기화기 (`Synchronizer`, `SynchronizerBuilder`)
//!
//! # 구조
//!
//! ```text
//! Synchronizer ──▶ Inventory ──▶ { Resolver, ReflectorManager }
//!      │
//!      └──▶ PolicyApplier ──▶ tc::compile ──▶ CommandRunner
//! ```

pub mod command;
pub mod config;
pub mod docker;
pub mod error;
pub mod inventory;
pub mod netns;
pub mod policy;
pub mod reflector;
pub mod store;
pub mod sync;
pub mod tc;
pub mod veth;

// --- 공개 API re-export ---

// 동기화기
pub use sync::{SyncHandle, SyncState, Synchronizer, SynchronizerBuilder, TeardownReport};

// 설정
pub use config::{ShaperConfig, ShaperConfigBuilder};

// 에러
pub use error::ShaperError;

// 외부 협력 요소
pub use command::{CommandOutput, CommandRunner, ProcessRunner, ShellCommand};
pub use docker::{
    BollardRuntime, ContainerDetails, ContainerRuntime, EventStream, LifecycleAction,
    LifecycleMessage, RuntimeContainer,
};
pub use netns::NamespaceHandles;
pub use store::{FileStore, KeyValueStore, MemoryStore};

// 정책과 컴파일
pub use inventory::Inventory;
pub use policy::{Bandwidth, ContainerIdentity, ManagedContainer, TrafficPolicy};
pub use reflector::{ReflectorManager, reflector_name};
pub use tc::{PolicyApplier, ShapingPlan, TcOp, compile};
pub use veth::{Resolver, VirtualLink};
