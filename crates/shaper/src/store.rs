//! 영속 키-값 저장소 -- 컨테이너 이름 → reflector 장치 매핑
//!
//! 정지 이벤트는 프로세스 재시작 이후에 도착할 수도 있으므로 매핑은
//! 프로세스 메모리 밖에 저장해야 합니다. [`KeyValueStore`] trait으로
//! 저장 방식을 추상화하고, 운영용 [`FileStore`]와 테스트용 [`MemoryStore`]를 제공합니다.
//!
//! 컨테이너 이름당 레코드 하나만 유지하며, 다시 기록하면 덮어씁니다.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ShaperError;

/// 키-값 저장소 trait
pub trait KeyValueStore: Send + Sync + 'static {
    /// 값을 기록합니다. 기존 값은 덮어씁니다.
    fn put(&self, key: &str, value: &str)
    -> impl Future<Output = Result<(), ShaperError>> + Send;

    /// 값을 조회합니다. 없으면 `Ok(None)`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, ShaperError>> + Send;

    /// 값을 삭제합니다. 없는 키 삭제는 성공으로 취급합니다.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), ShaperError>> + Send;
}

/// 키가 파일 이름으로 안전한지 검증합니다.
///
/// Docker 컨테이너 이름은 `[a-zA-Z0-9][a-zA-Z0-9_.-]*` 형식이므로
/// 경로 구분자나 `.`/`..`가 들어올 이유가 없습니다.
fn validate_key(key: &str) -> Result<(), ShaperError> {
    if key.is_empty() || key == "." || key == ".." {
        return Err(ShaperError::Store {
            key: key.to_owned(),
            reason: "invalid key".to_owned(),
        });
    }
    if key.contains('/') || key.contains('\0') {
        return Err(ShaperError::Store {
            key: key.to_owned(),
            reason: "key must not contain path separators".to_owned(),
        });
    }
    Ok(())
}

/// 디렉토리 기반 저장소 -- 키마다 파일 하나
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// `dir` 아래에 레코드를 저장하는 저장소를 생성합니다.
    ///
    /// 디렉토리는 첫 기록 시 생성됩니다.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 저장 디렉토리를 반환합니다.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ShaperError> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }
}

impl KeyValueStore for FileStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), ShaperError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ShaperError::Store {
                key: key.to_owned(),
                reason: format!("create {}: {e}", self.dir.display()),
            })?;
        tokio::fs::write(&path, value)
            .await
            .map_err(|e| ShaperError::Store {
                key: key.to_owned(),
                reason: format!("write {}: {e}", path.display()),
            })?;
        debug!(key, path = %path.display(), "stored mapping");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ShaperError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value.trim().to_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ShaperError::Store {
                key: key.to_owned(),
                reason: format!("read {}: {e}", path.display()),
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), ShaperError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ShaperError::Store {
                key: key.to_owned(),
                reason: format!("remove {}: {e}", path.display()),
            }),
        }
    }
}

/// 메모리 저장소
///
/// 프로세스 재시작을 견디지 못하므로 테스트와 단발성 실행에만 사용합니다.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 레코드 수를 반환합니다.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// 비어 있는지 확인합니다.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), ShaperError> {
        validate_key(key)?;
        self.entries
            .lock()
            .await
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ShaperError> {
        validate_key(key)?;
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), ShaperError> {
        validate_key(key)?;
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
