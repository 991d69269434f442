//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 셰이퍼와 데몬은 이 상수를 사용하여 `metrics::counter!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `tcdock_`
//! - 접미어: `_total` (counter)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(tcdock_core::metrics::POLICIES_APPLIED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 이벤트 종류 레이블 키 (start, die)
pub const LABEL_ACTION: &str = "action";

// ─── 셰이퍼 메트릭 ─────────────────────────────────────────────────

/// 트래픽 정책 적용 성공 수 (counter)
pub const POLICIES_APPLIED_TOTAL: &str = "tcdock_policies_applied_total";

/// 트래픽 정책 적용 실패 수 (counter)
pub const POLICY_FAILURES_TOTAL: &str = "tcdock_policy_failures_total";

/// 수신한 컨테이너 생명주기 이벤트 수 (counter, label: action)
pub const EVENTS_RECEIVED_TOTAL: &str = "tcdock_events_received_total";

/// 정지된 컨테이너 정리 횟수 (counter)
pub const TEARDOWNS_TOTAL: &str = "tcdock_teardowns_total";

/// 정리 단계 실패 수 (counter)
pub const TEARDOWN_FAILURES_TOTAL: &str = "tcdock_teardown_failures_total";

/// 이벤트 스트림 재구독 횟수 (counter)
pub const EVENT_STREAM_RECONNECTS_TOTAL: &str = "tcdock_event_stream_reconnects_total";

/// 모든 메트릭 설명을 등록합니다.
///
/// 레코더 설치 직후 한 번 호출합니다. 레코더가 없으면 아무 일도 하지 않습니다.
pub fn describe_all() {
    use metrics::describe_counter;

    describe_counter!(
        POLICIES_APPLIED_TOTAL,
        "Container links that received a full egress and ingress policy"
    );
    describe_counter!(
        POLICY_FAILURES_TOTAL,
        "Container links whose policy application failed"
    );
    describe_counter!(
        EVENTS_RECEIVED_TOTAL,
        "Container lifecycle notifications received, by action"
    );
    describe_counter!(TEARDOWNS_TOTAL, "Stopped containers processed for teardown");
    describe_counter!(
        TEARDOWN_FAILURES_TOTAL,
        "Teardown steps (device removal, namespace handle removal) that failed"
    );
    describe_counter!(
        EVENT_STREAM_RECONNECTS_TOTAL,
        "Times the lifecycle event subscription was re-established after a failure"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_all_does_not_panic() {
        describe_all();
    }

    #[test]
    fn metric_names_share_prefix() {
        let names = [
            POLICIES_APPLIED_TOTAL,
            POLICY_FAILURES_TOTAL,
            EVENTS_RECEIVED_TOTAL,
            TEARDOWNS_TOTAL,
            TEARDOWN_FAILURES_TOTAL,
            EVENT_STREAM_RECONNECTS_TOTAL,
        ];
        for name in names {
            assert!(name.starts_with("tcdock_"), "{name}");
            assert!(name.ends_with("_total"), "{name}");
        }
    }
}
