//! 트래픽 정책 모델 -- 컨테이너 라벨 → [`TrafficPolicy`]
//!
//! 컨테이너는 `org.label-schema.tc.*` 라벨로 셰이핑 정책을 선언합니다.
//! 모든 값은 `tc`가 해석하는 문자열(`5mbps`, `100ms`, `0.5%` 등)이며
//! 여기서는 숫자로 해석하지 않고 기본값 치환만 수행합니다.
//!
//! # 기본값 규칙
//!
//! - 대역폭: rate와 ceil이 모두 없으면 둘 다 [`UNLIMITED_BANDWIDTH`],
//!   하나만 있으면 나머지가 같은 값을 따릅니다. upload/download 동일.
//! - 지연: 선언이 없으면 [`ZERO_DELAY`].
//! - 나머지 손상 항목은 선언이 없으면 `None`이며, 컴파일 시 생략됩니다.
//!   `None`과 `"0%"`는 의미가 다릅니다.

use std::collections::HashMap;
use std::fmt;

/// 정책 라벨 네임스페이스
pub const LABEL_NAMESPACE: &str = "org.label-schema.tc";

/// opt-in 라벨 키
pub const LABEL_ENABLED: &str = "org.label-schema.tc.enabled";

/// opt-in 라벨의 활성 값
pub const ENABLED_VALUE: &str = "1";

/// 대역폭 미선언 시 사용하는 값
pub const UNLIMITED_BANDWIDTH: &str = "10000mbps";

/// 지연 미선언 시 사용하는 값
pub const ZERO_DELAY: &str = "0ms";

/// 정책 라벨 키 목록
pub mod labels {
    /// 업로드 rate
    pub const UPLOAD_RATE: &str = "org.label-schema.tc.upload.rate";
    /// 업로드 ceil
    pub const UPLOAD_CEIL: &str = "org.label-schema.tc.upload.ceil";
    /// 다운로드 rate
    pub const DOWNLOAD_RATE: &str = "org.label-schema.tc.download.rate";
    /// 다운로드 ceil
    pub const DOWNLOAD_CEIL: &str = "org.label-schema.tc.download.ceil";
    /// 지연
    pub const LATENCY_DELAY: &str = "org.label-schema.tc.latency.delay";
    /// 지연 변동폭
    pub const LATENCY_VARIATION: &str = "org.label-schema.tc.latency.variation";
    /// 지연 상관계수
    pub const LATENCY_CORRELATION: &str = "org.label-schema.tc.latency.correlation";
    /// 손실 확률
    pub const LOSS_PROBABILITY: &str = "org.label-schema.tc.loss.probability";
    /// 손실 상관계수
    pub const LOSS_CORRELATION: &str = "org.label-schema.tc.loss.correlation";
    /// 패킷 중복
    pub const PACKET_DUPLICATION: &str = "org.label-schema.tc.packet.duplication";
    /// 패킷 손상
    pub const PACKET_CORRUPTION: &str = "org.label-schema.tc.packet.corruption";
    /// 패킷 재정렬
    pub const PACKET_REORDERING: &str = "org.label-schema.tc.packet.reordering";
}

/// Docker 필터에 넣을 opt-in 라벨 표현식 (`key=value`)
pub fn enabled_filter() -> String {
    format!("{LABEL_ENABLED}={ENABLED_VALUE}")
}

/// 라벨 집합이 셰이핑 대상(opt-in)인지 확인합니다.
pub fn opted_in(labels: &HashMap<String, String>) -> bool {
    labels.get(LABEL_ENABLED).map(String::as_str) == Some(ENABLED_VALUE)
}

/// 라벨 값을 읽습니다. 공백뿐인 값은 미선언으로 취급합니다.
fn label(labels: &HashMap<String, String>, key: &str) -> Option<String> {
    labels
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

/// rate/ceil 쌍
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bandwidth {
    /// 보장 대역폭
    pub rate: String,
    /// 최대 대역폭
    pub ceil: String,
}

impl Bandwidth {
    /// 선언된 rate/ceil에 기본값 규칙을 적용합니다.
    ///
    /// ```
    /// use tcdock_shaper::policy::Bandwidth;
    ///
    /// let bw = Bandwidth::resolve(None, Some("2mbps".to_owned()));
    /// assert_eq!(bw.rate, "2mbps");
    /// assert_eq!(bw.ceil, "2mbps");
    /// ```
    pub fn resolve(rate: Option<String>, ceil: Option<String>) -> Self {
        match (rate, ceil) {
            (Some(rate), Some(ceil)) => Self { rate, ceil },
            (Some(rate), None) => Self {
                ceil: rate.clone(),
                rate,
            },
            (None, Some(ceil)) => Self {
                rate: ceil.clone(),
                ceil,
            },
            (None, None) => Self::unlimited(),
        }
    }

    /// 제한 없음 (sentinel 값)
    pub fn unlimited() -> Self {
        Self {
            rate: UNLIMITED_BANDWIDTH.to_owned(),
            ceil: UNLIMITED_BANDWIDTH.to_owned(),
        }
    }
}

/// 컨테이너 하나의 셰이핑 정책
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficPolicy {
    /// 업로드(egress) 대역폭
    pub upload: Bandwidth,
    /// 다운로드(ingress) 대역폭
    pub download: Bandwidth,
    /// 지연 (기본 `0ms`)
    pub latency_delay: String,
    /// 지연 변동폭
    pub latency_variation: Option<String>,
    /// 지연 상관계수
    pub latency_correlation: Option<String>,
    /// 손실 확률
    pub loss_probability: Option<String>,
    /// 손실 상관계수
    pub loss_correlation: Option<String>,
    /// 패킷 중복
    pub packet_duplication: Option<String>,
    /// 패킷 손상
    pub packet_corruption: Option<String>,
    /// 패킷 재정렬
    pub packet_reordering: Option<String>,
}

impl Default for TrafficPolicy {
    fn default() -> Self {
        Self {
            upload: Bandwidth::unlimited(),
            download: Bandwidth::unlimited(),
            latency_delay: ZERO_DELAY.to_owned(),
            latency_variation: None,
            latency_correlation: None,
            loss_probability: None,
            loss_correlation: None,
            packet_duplication: None,
            packet_corruption: None,
            packet_reordering: None,
        }
    }
}

impl TrafficPolicy {
    /// 컨테이너 라벨에서 정책을 만듭니다.
    pub fn from_labels(labels: &HashMap<String, String>) -> Self {
        Self {
            upload: Bandwidth::resolve(
                label(labels, labels::UPLOAD_RATE),
                label(labels, labels::UPLOAD_CEIL),
            ),
            download: Bandwidth::resolve(
                label(labels, labels::DOWNLOAD_RATE),
                label(labels, labels::DOWNLOAD_CEIL),
            ),
            latency_delay: label(labels, labels::LATENCY_DELAY)
                .unwrap_or_else(|| ZERO_DELAY.to_owned()),
            latency_variation: label(labels, labels::LATENCY_VARIATION),
            latency_correlation: label(labels, labels::LATENCY_CORRELATION),
            loss_probability: label(labels, labels::LOSS_PROBABILITY),
            loss_correlation: label(labels, labels::LOSS_CORRELATION),
            packet_duplication: label(labels, labels::PACKET_DUPLICATION),
            packet_corruption: label(labels, labels::PACKET_CORRUPTION),
            packet_reordering: label(labels, labels::PACKET_REORDERING),
        }
    }

    /// 지연이 0이 아닌지 확인합니다.
    pub fn has_delay(&self) -> bool {
        self.latency_delay != ZERO_DELAY
    }
}

/// 정지 이벤트에서 얻는 컨테이너 식별 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerIdentity {
    /// 짧은 ID (12자)
    pub id: String,
    /// 컨테이너 이름
    pub name: String,
}

/// Docker 컨테이너 ID를 12자 짧은 형식으로 자릅니다.
pub fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

/// 정책을 적용할 컨테이너 레코드 (veth 링크 하나당 하나)
///
/// 탐색 또는 이벤트마다 새로 만들어지며 적용 후 폐기됩니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    /// 짧은 ID
    pub id: String,
    /// 컨테이너 이름 (선행 `/` 제거됨)
    pub name: String,
    /// 호스트 쪽 veth 이름
    pub host_link: String,
    /// reflector(ifb) 장치 이름. 생성 실패 시 `None`
    pub reflector_link: Option<String>,
    /// 셰이핑 정책
    pub policy: TrafficPolicy,
}

impl fmt::Display for ManagedContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.policy;
        write!(
            f,
            "container: {}, id: {}, veth: {}, ifb: {}, download rate: {}, download ceil: {}, upload rate: {}, upload ceil: {}",
            self.name,
            self.id,
            self.host_link,
            self.reflector_link.as_deref().unwrap_or("-"),
            p.download.rate,
            p.download.ceil,
            p.upload.rate,
            p.upload.ceil,
        )?;

        if p.has_delay() {
            write!(f, ", latency delay: {}", p.latency_delay)?;
            if let Some(v) = &p.latency_variation {
                write!(f, ", latency variation: {v}")?;
            }
            if let Some(v) = &p.latency_correlation {
                write!(f, ", latency correlation: {v}")?;
            }
        }
        if let Some(v) = &p.loss_probability {
            write!(f, ", loss probability: {v}")?;
            if let Some(c) = &p.loss_correlation {
                write!(f, ", loss correlation: {c}")?;
            }
        }
        if let Some(v) = &p.packet_duplication {
            write!(f, ", packet duplication: {v}")?;
        }
        if let Some(v) = &p.packet_corruption {
            write!(f, ", packet corruption: {v}")?;
        }
        if let Some(v) = &p.packet_reordering {
            write!(f, ", packet reordering: {v}")?;
        }
        Ok(())
    }
}
