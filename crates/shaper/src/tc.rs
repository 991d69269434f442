//! tc 규칙 컴파일러 및 적용기
//!
//! [`ManagedContainer`]를 정해진 토폴로지의 [`TcOp`] 목록으로 컴파일하고
//! [`PolicyApplier`]가 순서대로 실행합니다.
//!
//! # 토폴로지
//!
//! ```text
//! egress (host veth):
//!   root htb 1: (default 2) ── class 1:2 (upload rate/ceil, prio 2)
//!                                └── netem 10:0 (delay/loss/duplicate/corrupt/reorder)
//!   filter parent 1:0 matchall → 1:2
//!
//! ingress:
//!   host veth ingress qdisc ── matchall mirred egress redirect → ifb
//!   ifb root htb 1: ── class 1:1 (download rate/ceil)
//!   filter parent 1: matchall → 1:1
//! ```
//!
//! "이미 없음" 응답(`RTNETLINK answers: No such file or directory`)은
//! 삭제 단계와 ingress 연결 단계에서만 허용되며, 그 밖의 실패는 해당 컨테이너의
//! 정책 적용을 중단시킵니다.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::command::{CommandRunner, ShellCommand};
use crate::error::ShaperError;
use crate::policy::{Bandwidth, ManagedContainer, TrafficPolicy};

/// 허용되는 not-found 응답
pub const TC_NOT_FOUND: &str = "RTNETLINK answers: No such file or directory";

/// egress htb 클래스 minor 번호
const EGRESS_CLASS: u32 = 2;
/// reflector htb 클래스 minor 번호
const INGRESS_CLASS: u32 = 1;
/// egress htb 클래스 우선순위
const EGRESS_PRIO: u32 = 2;

/// qdisc 부착 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QdiscAnchor {
    /// root qdisc
    Root,
    /// ingress qdisc
    Ingress,
}

impl fmt::Display for QdiscAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::Ingress => write!(f, "ingress"),
        }
    }
}

/// tc 작업 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcOp {
    /// 기존 qdisc 제거 (없으면 무시)
    DeleteQdisc {
        /// 대상 장치
        dev: String,
        /// 부착 위치
        anchor: QdiscAnchor,
    },
    /// root htb qdisc (`handle 1:`) 추가
    AddHtbQdisc {
        /// 대상 장치
        dev: String,
        /// 분류되지 않은 트래픽이 갈 클래스
        default_class: Option<u32>,
    },
    /// htb 클래스 추가
    AddHtbClass {
        /// 대상 장치
        dev: String,
        /// `classid 1:<minor>`
        class_minor: u32,
        /// rate/ceil
        bandwidth: Bandwidth,
        /// 우선순위
        prio: Option<u32>,
    },
    /// netem qdisc를 클래스 아래에 추가
    AddNetem {
        /// 대상 장치
        dev: String,
        /// 부모 클래스 minor 번호
        parent_class: u32,
        /// 손상 절 (순서 유지)
        clauses: Vec<String>,
    },
    /// 모든 트래픽을 클래스로 보내는 matchall 필터
    AddMatchallFilter {
        /// 대상 장치
        dev: String,
        /// 부모 핸들 (`1:0`, `1:`)
        parent: String,
        /// `flowid 1:<minor>`
        flow_class: u32,
    },
    /// ingress qdisc 추가
    AddIngressQdisc {
        /// 대상 장치
        dev: String,
    },
    /// ingress 트래픽을 reflector로 redirect
    AddMirredRedirect {
        /// 수신 장치 (host veth)
        dev: String,
        /// reflector 장치
        target: String,
    },
}

impl TcOp {
    /// `tc` 명령으로 변환합니다.
    pub fn to_command(&self, tc_binary: &str) -> ShellCommand {
        let mut args: Vec<String> = Vec::new();
        let mut push = |items: &[&str]| args.extend(items.iter().map(|s| (*s).to_owned()));

        match self {
            Self::DeleteQdisc { dev, anchor } => {
                push(&["qdisc", "del", "dev", dev, &anchor.to_string()]);
            }
            Self::AddHtbQdisc { dev, default_class } => {
                push(&["qdisc", "add", "dev", dev, "root", "handle", "1:", "htb", "r2q", "1"]);
                if let Some(class) = default_class {
                    push(&["default", &class.to_string()]);
                }
            }
            Self::AddHtbClass {
                dev,
                class_minor,
                bandwidth,
                prio,
            } => {
                let classid = format!("1:{class_minor}");
                push(&[
                    "class", "add", "dev", dev, "parent", "1:", "classid", &classid, "htb",
                    "rate", &bandwidth.rate, "ceil", &bandwidth.ceil,
                ]);
                if let Some(prio) = prio {
                    push(&["prio", &prio.to_string()]);
                }
            }
            Self::AddNetem {
                dev,
                parent_class,
                clauses,
            } => {
                let parent = format!("1:{parent_class}");
                push(&["qdisc", "add", "dev", dev, "parent", &parent, "handle", "10:0", "netem"]);
                for clause in clauses {
                    let tokens: Vec<&str> = clause.split_whitespace().collect();
                    push(&tokens);
                }
            }
            Self::AddMatchallFilter {
                dev,
                parent,
                flow_class,
            } => {
                let flowid = format!("1:{flow_class}");
                push(&["filter", "add", "dev", dev, "parent", parent, "matchall", "flowid", &flowid]);
            }
            Self::AddIngressQdisc { dev } => {
                push(&["qdisc", "add", "dev", dev, "ingress"]);
            }
            Self::AddMirredRedirect { dev, target } => {
                push(&[
                    "filter", "add", "dev", dev, "ingress", "matchall", "action", "mirred",
                    "egress", "redirect", "dev", target,
                ]);
            }
        }

        ShellCommand::new(tc_binary, args)
    }

    /// not-found 응답을 성공으로 볼 수 있는 작업인지 확인합니다.
    pub fn tolerates_missing(&self) -> bool {
        matches!(
            self,
            Self::DeleteQdisc { .. } | Self::AddIngressQdisc { .. } | Self::AddMirredRedirect { .. }
        )
    }
}

/// netem 절을 정해진 순서로 조립합니다.
///
/// 순서: `delay [variation [correlation]]`, `loss [correlation]`,
/// `duplicate`, `corrupt`, `reorder`. 선언되지 않은 항목은 생략합니다.
/// variation/correlation은 지연이 0이 아닐 때만 붙습니다.
pub fn netem_clauses(policy: &TrafficPolicy) -> Vec<String> {
    let mut delay = format!("delay {}", policy.latency_delay);
    if policy.has_delay() {
        if let Some(variation) = &policy.latency_variation {
            delay.push(' ');
            delay.push_str(variation);
            if let Some(correlation) = &policy.latency_correlation {
                delay.push(' ');
                delay.push_str(correlation);
            }
        }
    }

    let mut clauses = vec![delay];

    if let Some(probability) = &policy.loss_probability {
        let mut loss = format!("loss {probability}");
        if let Some(correlation) = &policy.loss_correlation {
            loss.push(' ');
            loss.push_str(correlation);
        }
        clauses.push(loss);
    }
    if let Some(v) = &policy.packet_duplication {
        clauses.push(format!("duplicate {v}"));
    }
    if let Some(v) = &policy.packet_corruption {
        clauses.push(format!("corrupt {v}"));
    }
    if let Some(v) = &policy.packet_reordering {
        clauses.push(format!("reorder {v}"));
    }
    clauses
}

/// host veth에 설치할 egress 작업 목록
pub fn compile_egress(container: &ManagedContainer) -> Vec<TcOp> {
    let dev = container.host_link.clone();
    vec![
        TcOp::DeleteQdisc {
            dev: dev.clone(),
            anchor: QdiscAnchor::Root,
        },
        TcOp::AddHtbQdisc {
            dev: dev.clone(),
            default_class: Some(EGRESS_CLASS),
        },
        TcOp::AddHtbClass {
            dev: dev.clone(),
            class_minor: EGRESS_CLASS,
            bandwidth: container.policy.upload.clone(),
            prio: Some(EGRESS_PRIO),
        },
        TcOp::AddNetem {
            dev: dev.clone(),
            parent_class: EGRESS_CLASS,
            clauses: netem_clauses(&container.policy),
        },
        TcOp::AddMatchallFilter {
            dev,
            parent: "1:0".to_owned(),
            flow_class: EGRESS_CLASS,
        },
    ]
}

/// reflector와 host veth ingress에 설치할 작업 목록
///
/// # Errors
///
/// reflector가 없으면 `ShaperError::IngressUnavailable`.
pub fn compile_ingress(container: &ManagedContainer) -> Result<Vec<TcOp>, ShaperError> {
    let reflector = container
        .reflector_link
        .clone()
        .ok_or_else(|| ShaperError::IngressUnavailable(container.name.clone()))?;
    let host = container.host_link.clone();

    Ok(vec![
        TcOp::DeleteQdisc {
            dev: reflector.clone(),
            anchor: QdiscAnchor::Root,
        },
        TcOp::AddHtbQdisc {
            dev: reflector.clone(),
            default_class: None,
        },
        TcOp::AddHtbClass {
            dev: reflector.clone(),
            class_minor: INGRESS_CLASS,
            bandwidth: container.policy.download.clone(),
            prio: None,
        },
        TcOp::AddMatchallFilter {
            dev: reflector.clone(),
            parent: "1:".to_owned(),
            flow_class: INGRESS_CLASS,
        },
        TcOp::DeleteQdisc {
            dev: host.clone(),
            anchor: QdiscAnchor::Ingress,
        },
        TcOp::AddIngressQdisc { dev: host.clone() },
        TcOp::AddMirredRedirect {
            dev: host,
            target: reflector,
        },
    ])
}

/// 컴파일된 전체 작업
///
/// egress는 항상 만들어지고, ingress는 reflector가 없으면 에러로 남습니다.
#[derive(Debug)]
pub struct ShapingPlan {
    /// egress 작업
    pub egress: Vec<TcOp>,
    /// ingress 작업 (reflector가 없으면 `IngressUnavailable`)
    pub ingress: Result<Vec<TcOp>, ShaperError>,
}

/// 컨테이너 정책을 전체 작업 목록으로 컴파일합니다.
pub fn compile(container: &ManagedContainer) -> ShapingPlan {
    ShapingPlan {
        egress: compile_egress(container),
        ingress: compile_ingress(container),
    }
}

/// 컴파일된 작업을 실행하는 적용기
pub struct PolicyApplier<C: CommandRunner> {
    runner: Arc<C>,
    tc_binary: String,
}

impl<C: CommandRunner> Clone for PolicyApplier<C> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            tc_binary: self.tc_binary.clone(),
        }
    }
}

impl<C: CommandRunner> PolicyApplier<C> {
    /// 새 적용기를 생성합니다.
    pub fn new(runner: Arc<C>, tc_binary: impl Into<String>) -> Self {
        Self {
            runner,
            tc_binary: tc_binary.into(),
        }
    }

    /// egress를 먼저 설치한 뒤 ingress를 설치합니다.
    ///
    /// reflector가 없으면 egress는 설치된 상태로 `IngressUnavailable`을 반환합니다.
    pub async fn apply(&self, container: &ManagedContainer) -> Result<(), ShaperError> {
        let plan = compile(container);
        for op in &plan.egress {
            self.run_op(op).await?;
        }
        let ingress = plan.ingress?;
        for op in &ingress {
            self.run_op(op).await?;
        }
        Ok(())
    }

    /// 작업 하나를 실행합니다.
    pub async fn run_op(&self, op: &TcOp) -> Result<(), ShaperError> {
        let cmd = op.to_command(&self.tc_binary);
        debug!(command = %cmd, "applying tc rule");

        let out = self.runner.run(&cmd).await?;
        if out.success {
            return Ok(());
        }
        if op.tolerates_missing() && out.output.trim() == TC_NOT_FOUND {
            debug!(command = %cmd, "nothing to remove");
            return Ok(());
        }
        Err(ShaperError::ShapingCommandFailed {
            command: cmd.to_string(),
            output: out.output,
        })
    }
}
