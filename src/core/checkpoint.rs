//! 检查点存储抽象层
//!
//! 统一的 save / load / discard 接口，支持内存、JSON 文件、SQLite（async-sqlite feature）三种实现；
//! 同一 session id 需保证写后读一致。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::CheckpointSection;
use crate::core::{AgentError, SessionCheckpoint};

/// 检查点存储接口
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 保存（覆盖）会话检查点
    async fn save(&self, checkpoint: &SessionCheckpoint) -> Result<(), AgentError>;

    /// 读取会话检查点，不存在时返回 None
    async fn load(&self, session_id: &str) -> Result<Option<SessionCheckpoint>, AgentError>;

    /// 丢弃会话（放弃挂起的审批）
    async fn discard(&self, session_id: &str) -> Result<(), AgentError>;
}

/// 内存检查点存储（进程内有效）
#[derive(Default)]
pub struct MemoryCheckpointStore {
    inner: RwLock<HashMap<String, SessionCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &SessionCheckpoint) -> Result<(), AgentError> {
        self.inner
            .write()
            .await
            .insert(checkpoint.session_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionCheckpoint>, AgentError> {
        Ok(self.inner.read().await.get(session_id).cloned())
    }

    async fn discard(&self, session_id: &str) -> Result<(), AgentError> {
        self.inner.write().await.remove(session_id);
        Ok(())
    }
}

/// 文件检查点存储：每个会话一个 JSON 文件，先写临时文件再 rename
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, AgentError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(AgentError::Checkpoint(format!(
                "invalid session id: {session_id:?}"
            )));
        }
        Ok(self.dir.join(format!("{session_id}.json")))
    }
}

fn io_err(e: std::io::Error) -> AgentError {
    AgentError::Checkpoint(e.to_string())
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &SessionCheckpoint) -> Result<(), AgentError> {
        let path = self.path_for(&checkpoint.session_id)?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let data = serde_json::to_string_pretty(checkpoint)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionCheckpoint>, AgentError> {
        let path = self.path_for(session_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn discard(&self, session_id: &str) -> Result<(), AgentError> {
        let path = self.path_for(session_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(e)),
        }
    }
}

/// SQLite 检查点存储：一行一个会话，检查点整体以 JSON 存储
#[cfg(feature = "async-sqlite")]
pub struct SqliteCheckpointStore {
    pool: sqlx::sqlite::SqlitePool,
}

#[cfg(feature = "async-sqlite")]
impl SqliteCheckpointStore {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS session_checkpoints (
                session_id TEXT PRIMARY KEY,
                phase TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(feature = "async-sqlite")]
fn db_err(e: sqlx::Error) -> AgentError {
    AgentError::Checkpoint(e.to_string())
}

#[cfg(feature = "async-sqlite")]
#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: &SessionCheckpoint) -> Result<(), AgentError> {
        let payload = serde_json::to_string(checkpoint)?;
        let phase = serde_json::to_value(checkpoint.phase)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        sqlx::query(
            "INSERT OR REPLACE INTO session_checkpoints (session_id, phase, payload, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&checkpoint.session_id)
        .bind(&phase)
        .bind(&payload)
        .bind(checkpoint.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionCheckpoint>, AgentError> {
        use sqlx::Row;

        let row = sqlx::query("SELECT payload FROM session_checkpoints WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => {
                let payload: String = row.get("payload");
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn discard(&self, session_id: &str) -> Result<(), AgentError> {
        sqlx::query("DELETE FROM session_checkpoints WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

/// 创建检查点存储
///
/// backend = "sqlite" 且启用 async-sqlite feature 时用 SQLite；"file" 用 JSON 目录；其余或失败时回退到内存
pub async fn create_checkpoint_store(cfg: &CheckpointSection) -> Arc<dyn CheckpointStore> {
    match cfg.backend.to_lowercase().as_str() {
        "file" => {
            tracing::info!("Using file checkpoint store: {:?}", cfg.dir);
            return Arc::new(FileCheckpointStore::new(&cfg.dir));
        }
        "sqlite" => {
            #[cfg(feature = "async-sqlite")]
            match SqliteCheckpointStore::new(&cfg.db_path).await {
                Ok(store) => {
                    tracing::info!("Using sqlite checkpoint store: {:?}", cfg.db_path);
                    return Arc::new(store);
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to open sqlite checkpoint store, falling back to memory: {}",
                        e
                    );
                }
            }

            #[cfg(not(feature = "async-sqlite"))]
            tracing::warn!(
                "Sqlite checkpoint store requested but async-sqlite feature not enabled, using memory store"
            );
        }
        "memory" => {}
        other => {
            tracing::warn!("Unknown checkpoint backend '{}', using memory store", other);
        }
    }

    tracing::info!("Using in-memory checkpoint store");
    Arc::new(MemoryCheckpointStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TurnPhase;
    use tempfile::TempDir;

    fn sample(session_id: &str) -> SessionCheckpoint {
        let mut cp = SessionCheckpoint::new(session_id);
        cp.transcript.push_user("hello");
        cp.iteration = 2;
        cp.phase = TurnPhase::Finished;
        cp
    }

    #[tokio::test]
    async fn test_memory_store_last_write_wins() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load("s1").await.unwrap().is_none());
        store.save(&sample("s1")).await.unwrap();
        let mut second = sample("s1");
        second.iteration = 5;
        store.save(&second).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.load("s1").await.unwrap().unwrap().iteration, 5);
        store.discard("s1").await.unwrap();
        assert!(store.load("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("sessions");

        FileCheckpointStore::new(&dir).save(&sample("abc-1")).await.unwrap();

        let reopened = FileCheckpointStore::new(&dir);
        let cp = reopened.load("abc-1").await.unwrap().unwrap();
        assert_eq!(cp.session_id, "abc-1");
        assert_eq!(cp.transcript, sample("abc-1").transcript);
        assert_eq!(cp.phase, TurnPhase::Finished);

        reopened.discard("abc-1").await.unwrap();
        reopened.discard("abc-1").await.unwrap();
        assert!(reopened.load("abc-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(temp_dir.path());
        assert!(matches!(
            store.load("../etc/passwd").await,
            Err(AgentError::Checkpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_create_store_falls_back_to_memory() {
        let cfg = CheckpointSection {
            backend: "nonsense".to_string(),
            ..CheckpointSection::default()
        };
        let store = create_checkpoint_store(&cfg).await;
        store.save(&sample("s")).await.unwrap();
        assert!(store.load("s").await.unwrap().is_some());
    }

    #[cfg(feature = "async-sqlite")]
    #[tokio::test]
    async fn test_sqlite_store_persists() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("checkpoints.db");

        let store = SqliteCheckpointStore::new(&db_path).await.unwrap();
        store.save(&sample("s1")).await.unwrap();
        store.close().await;

        let reopened = SqliteCheckpointStore::new(&db_path).await.unwrap();
        let cp = reopened.load("s1").await.unwrap().unwrap();
        assert_eq!(cp.iteration, 2);
        reopened.discard("s1").await.unwrap();
        assert!(reopened.load("s1").await.unwrap().is_none());
    }
}
