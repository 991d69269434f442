//! veth 인터페이스 탐색 -- 호스트 쪽 링크와 컨테이너 쪽 링크 짝짓기
//!
//! 컨테이너의 네트워크 네임스페이스와 호스트 네임스페이스에서 각각
//! `ip addr show` 출력을 읽어 [`VirtualLink`] 목록을 만들고, 인덱스를
//! 양방향으로 대조하여 컨테이너에 연결된 호스트 쪽 veth 이름을 찾습니다.
//!
//! # 짝짓기 규칙
//!
//! 인터페이스 인덱스는 네임스페이스 안에서만 유일하므로 한쪽만 비교하면
//! 컨테이너가 많을 때 오탐이 생깁니다. 따라서 두 조건을 모두 확인합니다.
//!
//! ```text
//! host.self_index == container.peer_index
//!     && container.self_index == host.peer_index
//! ```

use std::sync::Arc;

use tracing::{debug, error};

use crate::command::{CommandRunner, ShellCommand};
use crate::error::ShaperError;
use crate::netns::NamespaceHandles;

/// `ip addr show` 출력에서 veth 쌍을 나타내는 표시
const PEER_MARKER: &str = "@if";

/// veth 쌍의 한쪽 끝
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualLink {
    /// 장치 이름 (예: `veth1a2b3c4`, `eth0`)
    pub device: String,
    /// 이 네임스페이스에서의 인터페이스 인덱스
    pub self_index: u32,
    /// 반대쪽 끝의 인터페이스 인덱스
    pub peer_index: u32,
}

/// 링크 줄 파싱 실패 사유
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkParseError {
    /// `index: name` 형식이 아님
    #[error("not an interface header line")]
    MissingFields,
    /// `@if<peer>` 표시가 없음
    #[error("no peer index marker")]
    MissingPeer,
    /// 인덱스가 숫자가 아님
    #[error("invalid interface index '{0}'")]
    InvalidIndex(String),
}

impl VirtualLink {
    /// `ip addr show`의 인터페이스 헤더 줄을 파싱합니다.
    ///
    /// ```
    /// use tcdock_shaper::veth::VirtualLink;
    ///
    /// let link = VirtualLink::parse(
    ///     "7: veth9c1d2e3@if6: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500",
    /// ).unwrap();
    /// assert_eq!(link.device, "veth9c1d2e3");
    /// assert_eq!((link.self_index, link.peer_index), (7, 6));
    /// ```
    pub fn parse(line: &str) -> Result<Self, LinkParseError> {
        let mut fields = line.split(':');
        let index = fields.next().map(str::trim).unwrap_or_default();
        let name = fields
            .next()
            .map(str::trim)
            .ok_or(LinkParseError::MissingFields)?;

        let (device, peer) = name
            .split_once(PEER_MARKER)
            .ok_or(LinkParseError::MissingPeer)?;

        let self_index = index
            .parse::<u32>()
            .map_err(|_| LinkParseError::InvalidIndex(index.to_owned()))?;
        let peer_index = peer
            .parse::<u32>()
            .map_err(|_| LinkParseError::InvalidIndex(peer.to_owned()))?;

        Ok(Self {
            device: device.to_owned(),
            self_index,
            peer_index,
        })
    }

    /// 두 링크가 같은 veth 쌍의 양 끝인지 확인합니다.
    pub fn pairs_with(&self, other: &VirtualLink) -> bool {
        self.self_index == other.peer_index && other.self_index == self.peer_index
    }
}

/// 헤더 줄의 `<...>` 플래그 목록을 반환합니다.
fn link_flags(line: &str) -> Option<Vec<&str>> {
    let start = line.find('<')?;
    let end = line[start..].find('>')? + start;
    Some(line[start + 1..end].split(',').collect())
}

/// 호스트 `ip addr show type veth` 출력에서 veth 링크를 추출합니다.
///
/// 형식이 잘못된 후보 줄은 로그를 남기고 건너뜁니다.
pub fn parse_host_links(output: &str) -> Vec<VirtualLink> {
    output
        .lines()
        .filter(|line| line.contains(PEER_MARKER))
        .filter_map(|line| match VirtualLink::parse(line) {
            Ok(link) => Some(link),
            Err(e) => {
                error!(error = %e, line, "skipping malformed host link line");
                None
            }
        })
        .collect()
}

fn is_container_candidate(line: &str) -> bool {
    line.contains(PEER_MARKER)
        && link_flags(line)
            .is_some_and(|flags| flags.contains(&"UP") && !flags.contains(&"LOOPBACK"))
}

/// 컨테이너 네임스페이스의 `ip addr show` 출력에서 링크를 추출합니다.
///
/// 페어 표시(`@if`)가 있고, 관리 상태가 UP이며 loopback이 아닌 인터페이스만
/// 후보가 됩니다.
pub fn parse_container_links(output: &str) -> Vec<VirtualLink> {
    output
        .lines()
        .filter(|line| is_container_candidate(line))
        .filter_map(|line| match VirtualLink::parse(line) {
            Ok(link) => Some(link),
            Err(e) => {
                error!(error = %e, line, "skipping malformed container link line");
                None
            }
        })
        .collect()
}

/// 컨테이너 링크와 짝이 맞는 호스트 링크 이름을 호스트 나열 순서대로 반환합니다.
pub fn match_host_links(host: &[VirtualLink], container: &[VirtualLink]) -> Vec<String> {
    let mut matched = Vec::new();
    for host_link in host {
        for container_link in container {
            if host_link.pairs_with(container_link) {
                matched.push(host_link.device.clone());
            }
        }
    }
    matched
}

/// 인터페이스 리졸버
///
/// 컨테이너 이름과 네임스페이스 경로(sandbox key)로 호스트 쪽 veth 이름을 찾습니다.
pub struct Resolver<C: CommandRunner> {
    runner: Arc<C>,
    ip_binary: String,
    namespaces: NamespaceHandles,
}

impl<C: CommandRunner> Clone for Resolver<C> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            ip_binary: self.ip_binary.clone(),
            namespaces: self.namespaces.clone(),
        }
    }
}

impl<C: CommandRunner> Resolver<C> {
    /// 새 리졸버를 생성합니다.
    pub fn new(runner: Arc<C>, ip_binary: impl Into<String>, namespaces: NamespaceHandles) -> Self {
        Self {
            runner,
            ip_binary: ip_binary.into(),
            namespaces,
        }
    }

    /// 네임스페이스 핸들 관리자를 반환합니다.
    pub fn namespaces(&self) -> &NamespaceHandles {
        &self.namespaces
    }

    /// 컨테이너의 호스트 쪽 veth 이름 목록을 찾습니다.
    ///
    /// 부수 효과로 `<netns_dir>/<name>` 핸들을 새로 만들며, 이 핸들은
    /// 컨테이너 정지 시 정리될 때까지 남겨 둡니다.
    ///
    /// # Errors
    ///
    /// - `ShaperError::InterfaceNotFound`: 짝이 맞는 링크가 없음 (`network_mode: host` 등)
    /// - `ShaperError::Namespace`: 핸들 생성 실패
    /// - `ShaperError::CommandFailed`: `ip` 명령 실패
    pub async fn resolve(&self, name: &str, sandbox_key: &str) -> Result<Vec<String>, ShaperError> {
        self.namespaces.link(name, sandbox_key).await?;

        let container_links = self.container_links(name).await?;
        let host_links = self.host_links().await?;

        let matched = match_host_links(&host_links, &container_links);
        for device in &matched {
            debug!(container = name, host_link = device.as_str(), "veth pair found");
        }

        if matched.is_empty() {
            return Err(ShaperError::InterfaceNotFound(name.to_owned()));
        }
        Ok(matched)
    }

    async fn container_links(&self, name: &str) -> Result<Vec<VirtualLink>, ShaperError> {
        let cmd = ShellCommand::new(
            self.ip_binary.as_str(),
            ["netns", "exec", name, self.ip_binary.as_str(), "addr", "show"],
        );
        let output = self.run_checked(&cmd).await?;
        Ok(parse_container_links(&output))
    }

    async fn host_links(&self) -> Result<Vec<VirtualLink>, ShaperError> {
        let cmd = ShellCommand::new(self.ip_binary.as_str(), ["addr", "show", "type", "veth"]);
        let output = self.run_checked(&cmd).await?;
        Ok(parse_host_links(&output))
    }

    async fn run_checked(&self, cmd: &ShellCommand) -> Result<String, ShaperError> {
        debug!(command = %cmd, "listing interfaces");
        let out = self.runner.run(cmd).await?;
        if !out.success {
            return Err(ShaperError::CommandFailed {
                command: cmd.to_string(),
                output: out.output,
            });
        }
        Ok(out.output)
    }
}
