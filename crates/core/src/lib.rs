//! tcdock 공통 크레이트
//!
//! 셰이퍼와 데몬이 함께 사용하는 에러, 설정, 메트릭 이름을 정의합니다.

pub mod config;
pub mod error;
pub mod metrics;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, RuntimeError, ShapingError, TcdockError};

// 설정
pub use config::{DockerConfig, GeneralConfig, MetricsConfig, ShaperSection, TcdockConfig};
