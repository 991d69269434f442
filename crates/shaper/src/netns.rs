//! 네트워크 네임스페이스 핸들
//!
//! Docker는 컨테이너 네임스페이스를 자체 sandbox 경로에 두므로 `ip netns`가 볼 수
//! 없습니다. [`NamespaceHandles`]는 `<netns_dir>/<컨테이너 이름>`에 심볼릭 링크를
//! 만들어 `ip netns exec <name> ...`이 동작하게 합니다. 핸들은 컨테이너 종료가
//! 확인될 때까지 남아 있습니다.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ShaperError;

/// 한 디렉토리 안의 컨테이너별 네임스페이스 심볼릭 링크 관리자
#[derive(Debug, Clone)]
pub struct NamespaceHandles {
    dir: PathBuf,
}

impl NamespaceHandles {
    /// `dir`(보통 `/var/run/docker/netns`)을 기준으로 관리자를 생성합니다.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 핸들 디렉토리
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `name`의 핸들 경로
    pub fn handle_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// `name`의 기존 핸들을 지우고 `target`을 가리키는 새 링크를 만듭니다.
    ///
    /// # Errors
    ///
    /// 이름을 쓸 수 없거나 링크를 만들 수 없으면 `ShaperError::Namespace`.
    pub async fn link(&self, name: &str, target: &str) -> Result<PathBuf, ShaperError> {
        if name.is_empty() || name.contains('/') {
            return Err(ShaperError::Namespace {
                name: name.to_owned(),
                reason: "invalid handle name".to_owned(),
            });
        }

        let path = self.handle_path(name);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ShaperError::Namespace {
                name: name.to_owned(),
                reason: format!("create {}: {e}", self.dir.display()),
            })?;

        // 같은 이름의 이전 컨테이너가 남긴 핸들
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(name, "removed stale namespace handle"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ShaperError::Namespace {
                    name: name.to_owned(),
                    reason: format!("remove stale {}: {e}", path.display()),
                });
            }
        }

        tokio::fs::symlink(target, &path)
            .await
            .map_err(|e| ShaperError::Namespace {
                name: name.to_owned(),
                reason: format!("symlink {} -> {target}: {e}", path.display()),
            })?;

        debug!(name, target, "linked namespace handle");
        Ok(path)
    }

    /// `name`의 핸들을 제거합니다.
    ///
    /// # Errors
    ///
    /// 핸들이 없거나 제거할 수 없으면 `ShaperError::Namespace`.
    pub async fn remove(&self, name: &str) -> Result<(), ShaperError> {
        let path = self.handle_path(name);
        debug!(name, path = %path.display(), "removing namespace handle");
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| ShaperError::Namespace {
                name: name.to_owned(),
                reason: format!("remove {}: {e}", path.display()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_creates_symlink_to_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let handles = NamespaceHandles::new(dir.path().join("netns"));

        let path = handles.link("web", "/var/run/docker/netns/abc").await.unwrap();
        let target = tokio::fs::read_link(&path).await.unwrap();
        assert_eq!(target, PathBuf::from("/var/run/docker/netns/abc"));
    }

    #[tokio::test]
    async fn link_replaces_stale_handle() {
        let dir = tempfile::tempdir().unwrap();
        let handles = NamespaceHandles::new(dir.path());

        handles.link("web", "/proc/1/ns/net").await.unwrap();
        let path = handles.link("web", "/proc/2/ns/net").await.unwrap();
        let target = tokio::fs::read_link(&path).await.unwrap();
        assert_eq!(target, PathBuf::from("/proc/2/ns/net"));
    }

    #[tokio::test]
    async fn remove_deletes_handle() {
        let dir = tempfile::tempdir().unwrap();
        let handles = NamespaceHandles::new(dir.path());
        let path = handles.link("web", "/proc/1/ns/net").await.unwrap();

        handles.remove("web").await.unwrap();
        assert!(tokio::fs::symlink_metadata(&path).await.is_err());
    }

    #[tokio::test]
    async fn remove_missing_handle_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let handles = NamespaceHandles::new(dir.path());
        let err = handles.remove("ghost").await.unwrap_err();
        assert!(matches!(err, ShaperError::Namespace { .. }));
    }

    #[tokio::test]
    async fn link_rejects_names_with_separators() {
        let dir = tempfile::tempdir().unwrap();
        let handles = NamespaceHandles::new(dir.path());
        assert!(handles.link("../escape", "/proc/1/ns/net").await.is_err());
        assert!(handles.link("", "/proc/1/ns/net").await.is_err());
    }
}
