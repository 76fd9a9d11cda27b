// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::lock_table::LockTable;
use crate::sessions::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Durable per-job metadata (spec §3 "Worker Job").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    pub id: String,
    pub description: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Filesystem-backed worker job persistence: one directory per job under
/// `<dir>/<jobId>/` (spec §3, §4.H, §6).
pub struct JobStore {
    dir: PathBuf,
    locks: LockTable,
}

impl JobStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            locks: LockTable::new(),
        }
    }

    fn job_dir(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    pub async fn create_job(
        &self,
        description: &str,
        task: &str,
        config: Option<Value>,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let dir = self.job_dir(&id);
        tokio::fs::create_dir_all(dir.join("artifacts"))
            .await
            .map_err(|e| StoreError::Write(dir.clone(), e))?;

        write_file(&dir.join("task.md"), task).await?;
        write_json(
            &dir.join("config.json"),
            &config.unwrap_or_else(|| serde_json::json!({})),
        )
        .await?;
        write_file(&dir.join("status.md"), "").await?;

        let meta = JobMetadata {
            id: id.clone(),
            description: description.to_string(),
            status: JobStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        };
        write_json(&dir.join("meta.json"), &meta).await?;

        Ok(id)
    }

    pub async fn get_meta(&self, id: &str) -> Result<Option<JobMetadata>, StoreError> {
        read_json_opt(&self.job_dir(id).join("meta.json")).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobMetadata>, StoreError> {
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
            if let Some(meta) = self.get_meta(&id).await? {
                out.push(meta);
            }
        }
        Ok(out)
    }

    /// Transition a job's status. Any terminal status stamps `completedAt`
    /// with `completed_at` if given, else `Utc::now()`, unless already set.
    pub async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        completed_at: Option<DateTime<Utc>>,
        error: Option<String>,
    ) -> Result<JobMetadata, StoreError> {
        let _guard = self.locks.lock(id).await;
        let mut meta = self
            .get_meta(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        meta.status = status;
        if error.is_some() {
            meta.error = error;
        }
        if status.is_terminal() && meta.completed_at.is_none() {
            meta.completed_at = Some(completed_at.unwrap_or_else(Utc::now));
        }

        write_json(&self.job_dir(id).join("meta.json"), &meta).await?;
        Ok(meta)
    }

    /// `status.md`. The initial write is empty, which reads back as
    /// `None` — the only way to tell "never written" from "written".
    pub async fn read_summary(&self, id: &str) -> Result<Option<String>, StoreError> {
        let text = read_to_string_opt(&self.job_dir(id).join("status.md")).await?;
        Ok(text.filter(|t| !t.is_empty()))
    }

    pub async fn write_summary(&self, id: &str, content: &str) -> Result<(), StoreError> {
        write_file(&self.job_dir(id).join("status.md"), content).await
    }

    pub async fn read_result(&self, id: &str) -> Result<Option<String>, StoreError> {
        read_to_string_opt(&self.job_dir(id).join("result.md")).await
    }

    pub async fn write_result(&self, id: &str, content: &str) -> Result<(), StoreError> {
        write_file(&self.job_dir(id).join("result.md"), content).await
    }

    pub async fn append_question(&self, id: &str, question: &str) -> Result<(), StoreError> {
        let _guard = self.locks.lock(id).await;
        let path = self.job_dir(id).join("questions.md");
        append_line(&path, question).await
    }

    pub async fn read_questions(&self, id: &str) -> Result<Vec<String>, StoreError> {
        let text = read_to_string_opt(&self.job_dir(id).join("questions.md")).await?;
        Ok(text
            .unwrap_or_default()
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }

    pub async fn append_decision(&self, id: &str, decision: Value) -> Result<(), StoreError> {
        let _guard = self.locks.lock(id).await;
        let path = self.job_dir(id).join("decisions.json");
        let mut decisions: Vec<Value> = read_json_opt(&path).await?.unwrap_or_default();
        decisions.push(decision);
        write_json(&path, &decisions).await
    }

    pub async fn read_decisions(&self, id: &str) -> Result<Vec<Value>, StoreError> {
        Ok(read_json_opt(&self.job_dir(id).join("decisions.json"))
            .await?
            .unwrap_or_default())
    }

    /// Removes the job directory unconditionally; the caller (the Worker
    /// Dispatch Bridge) is responsible for the running/failed guard (spec
    /// §3 invariants, §4.K).
    pub async fn delete_job(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.locks.lock(id).await;
        let dir = self.job_dir(id);
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Write(dir, e))
    }
}

async fn write_file(path: &std::path::Path, content: &str) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| StoreError::Write(tmp.clone(), e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::Write(path.to_path_buf(), e))
}

async fn append_line(path: &std::path::Path, line: &str) -> Result<(), StoreError> {
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| StoreError::Write(path.to_path_buf(), e))?;
    file.write_all(line.as_bytes())
        .await
        .map_err(|e| StoreError::Write(path.to_path_buf(), e))?;
    file.write_all(b"\n")
        .await
        .map_err(|e| StoreError::Write(path.to_path_buf(), e))
}

async fn write_json<T: Serialize>(path: &std::path::Path, value: &T) -> Result<(), StoreError> {
    let body =
        serde_json::to_vec_pretty(value).map_err(|e| StoreError::Parse(path.to_path_buf(), e))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body)
        .await
        .map_err(|e| StoreError::Write(tmp.clone(), e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::Write(path.to_path_buf(), e))
}

async fn read_json_opt<T: for<'de> Deserialize<'de>>(
    path: &std::path::Path,
) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let value =
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Parse(path.to_path_buf(), e))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Read(path.to_path_buf(), e)),
    }
}

async fn read_to_string_opt(path: &std::path::Path) -> Result<Option<String>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Read(path.to_path_buf(), e)),
    }
}
