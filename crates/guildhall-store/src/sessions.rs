// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use guildhall_config::{session_slug, SessionStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::lock_table::LockTable;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0:?} not found")]
    NotFound(String),
    #[error("reading {0:?}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("writing {0:?}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("parsing {0:?}: {1}")]
    Parse(PathBuf, serde_json::Error),
}

/// Durable per-session metadata (spec §3 "Session").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub id: String,
    pub name: String,
    pub status: SessionStatus,
    pub members: Vec<String>,
    #[serde(default)]
    pub upstream_agent_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub message_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    ToolUse,
    ToolResult,
}

/// One line of `messages.jsonl` (spec §3 "Stored Message").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Fields a caller may update via [`SessionStore::update_metadata`]. `id`
/// and `created_at` are immutable and therefore absent here (spec §4.G).
#[derive(Debug, Default)]
pub struct MetadataPatch {
    pub name: Option<String>,
    pub status: Option<SessionStatus>,
    pub members: Option<Vec<String>>,
    pub upstream_agent_session_id: Option<Option<String>>,
}

/// Filesystem-backed session persistence: `<dir>/<id>/{meta.json,
/// messages.jsonl}` (spec §4.G, §6).
pub struct SessionStore {
    dir: PathBuf,
    locks: LockTable,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            locks: LockTable::new(),
        }
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("meta.json")
    }

    fn messages_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("messages.jsonl")
    }

    pub async fn create(
        &self,
        name: &str,
        members: Vec<String>,
    ) -> Result<SessionMetadata, StoreError> {
        let id = session_slug(name, Utc::now());
        let _guard = self.locks.lock(&id).await;

        let now = Utc::now();
        let metadata = SessionMetadata {
            id: id.clone(),
            name: name.to_string(),
            status: SessionStatus::Idle,
            members,
            upstream_agent_session_id: None,
            created_at: now,
            last_activity_at: now,
            message_count: 0,
        };

        let dir = self.session_dir(&id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Write(dir.clone(), e))?;
        self.write_meta(&id, &metadata).await?;
        tokio::fs::File::create(self.messages_path(&id))
            .await
            .map_err(|e| StoreError::Write(self.messages_path(&id), e))?;

        Ok(metadata)
    }

    pub async fn list(&self) -> Result<Vec<SessionMetadata>, StoreError> {
        let mut out = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return Ok(out);
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.path().is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if let Ok(Some(meta)) = self.read_meta(&id).await {
                out.push(meta);
            }
        }
        out.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(out)
    }

    pub async fn get(
        &self,
        id: &str,
    ) -> Result<Option<(SessionMetadata, Vec<StoredMessage>)>, StoreError> {
        let Some(meta) = self.read_meta(id).await? else {
            return Ok(None);
        };
        let messages = self.read_messages(id).await?;
        Ok(Some((meta, messages)))
    }

    pub async fn update_metadata(
        &self,
        id: &str,
        patch: MetadataPatch,
    ) -> Result<SessionMetadata, StoreError> {
        let _guard = self.locks.lock(id).await;
        let mut meta = self
            .read_meta(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if let Some(name) = patch.name {
            meta.name = name;
        }
        if let Some(status) = patch.status {
            meta.status = status;
        }
        if let Some(members) = patch.members {
            meta.members = members;
        }
        if let Some(upstream) = patch.upstream_agent_session_id {
            meta.upstream_agent_session_id = upstream;
        }

        self.write_meta(id, &meta).await?;
        Ok(meta)
    }

    /// Atomically append one message line and bump `messageCount` /
    /// `lastActivityAt`.
    pub async fn append_message(
        &self,
        id: &str,
        message: StoredMessage,
    ) -> Result<SessionMetadata, StoreError> {
        let _guard = self.locks.lock(id).await;
        let mut meta = self
            .read_meta(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let path = self.messages_path(id);
        let line = serde_json::to_string(&message).map_err(|e| StoreError::Parse(path.clone(), e))?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StoreError::Write(path.clone(), e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StoreError::Write(path.clone(), e))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| StoreError::Write(path.clone(), e))?;

        meta.message_count += 1;
        meta.last_activity_at = message.timestamp;
        self.write_meta(id, &meta).await?;
        Ok(meta)
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.locks.lock(id).await;
        let dir = self.session_dir(id);
        if !dir.is_dir() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Write(dir, e))
    }

    async fn read_meta(&self, id: &str) -> Result<Option<SessionMetadata>, StoreError> {
        let path = self.meta_path(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let meta = serde_json::from_slice(&bytes).map_err(|e| StoreError::Parse(path, e))?;
                Ok(Some(meta))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Read(path, e)),
        }
    }

    async fn write_meta(&self, id: &str, meta: &SessionMetadata) -> Result<(), StoreError> {
        let path = self.meta_path(id);
        let body = serde_json::to_vec_pretty(meta).map_err(|e| StoreError::Parse(path.clone(), e))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| StoreError::Write(tmp.clone(), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Write(path, e))
    }

    async fn read_messages(&self, id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let path = self.messages_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Read(path, e)),
        };
        let text = String::from_utf8_lossy(&bytes);
        text.lines()
            .filter(|line| !line.is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| StoreError::Parse(path.clone(), e))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());
        (tmp, store)
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (_tmp, store) = store();
        let meta = store.create("My Session", vec!["alice".into()]).await.unwrap();
        assert_eq!(meta.status, SessionStatus::Idle);
        assert_eq!(meta.message_count, 0);

        let (got, messages) = store.get(&meta.id).await.unwrap().unwrap();
        assert_eq!(got.id, meta.id);
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn append_message_increments_count_and_activity() {
        let (_tmp, store) = store();
        let meta = store.create("S", vec![]).await.unwrap();
        let updated = store
            .append_message(
                &meta.id,
                StoredMessage {
                    role: MessageRole::User,
                    content: "hi".into(),
                    timestamp: Utc::now(),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.message_count, 1);
        assert!(updated.last_activity_at >= meta.created_at);

        let (_, messages) = store.get(&meta.id).await.unwrap().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hi");
    }

    #[tokio::test]
    async fn update_metadata_leaves_id_and_created_at_untouched() {
        let (_tmp, store) = store();
        let meta = store.create("S", vec![]).await.unwrap();
        let updated = store
            .update_metadata(
                &meta.id,
                MetadataPatch {
                    status: Some(SessionStatus::Running),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.id, meta.id);
        assert_eq!(updated.created_at, meta.created_at);
        assert_eq!(updated.status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn list_sorts_by_last_activity_descending() {
        let (_tmp, store) = store();
        let a = store.create("A", vec![]).await.unwrap();
        let b = store.create("B", vec![]).await.unwrap();
        store
            .append_message(
                &b.id,
                StoredMessage {
                    role: MessageRole::User,
                    content: "hi".into(),
                    timestamp: Utc::now(),
                },
            )
            .await
            .unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all[0].id, b.id);
        assert_eq!(all[1].id, a.id);
    }

    #[tokio::test]
    async fn delete_removes_the_session() {
        let (_tmp, store) = store();
        let meta = store.create("S", vec![]).await.unwrap();
        store.delete(&meta.id).await.unwrap();
        assert!(store.get(&meta.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_unknown_session_fails() {
        let (_tmp, store) = store();
        let err = store.delete("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
