// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use guildhall_mcp::{Dispatcher, McpError, StandardMcpHandler};
use guildhall_store::{JobMetadata, JobStatus, JobStore};

/// Fires when a running job is cancelled, so the owning session's agent
/// query can be aborted in turn (spec §4.K, §9 "cyclic dependency").
type OnCancel = Box<dyn Fn() + Send + Sync>;

/// Glob-style filter (`*` wildcard only) applied to a job's description
/// (spec §4.K `list{filter?}`).
#[derive(Debug, Clone)]
pub struct JobFilter(String);

impl JobFilter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    fn matches(&self, description: &str) -> bool {
        let escaped = regex::escape(&self.0).replace("\\*", ".*");
        Regex::new(&format!("^{escaped}$"))
            .map(|re| re.is_match(description))
            .unwrap_or(false)
    }
}

/// Exposes the six worker dispatch tools (`dispatch`, `list`, `status`,
/// `result`, `cancel`, `delete`) backed directly by a [`JobStore`], mounted
/// in-process as `<member>-dispatch` (spec §4.K).
pub struct WorkerDispatchBridge {
    member: String,
    jobs: Arc<JobStore>,
    on_cancel: Mutex<HashMap<String, OnCancel>>,
    session_abort: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl WorkerDispatchBridge {
    pub fn new(member: impl Into<String>, jobs: Arc<JobStore>) -> Self {
        Self {
            member: member.into(),
            jobs,
            on_cancel: Mutex::new(HashMap::new()),
            session_abort: None,
        }
    }

    /// A bridge scoped to one running query: every job dispatched through it
    /// auto-registers `abort` as its on-cancel callback (spec §9, "cyclic
    /// dependency between Session Manager and Worker Dispatch Bridge").
    pub fn for_session(
        member: impl Into<String>,
        jobs: Arc<JobStore>,
        abort: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self {
            member: member.into(),
            jobs,
            on_cancel: Mutex::new(HashMap::new()),
            session_abort: Some(abort),
        }
    }

    /// Registered by the Agent Session Manager at dispatch time: when this
    /// job is cancelled, `callback` fires the owning query's abort handle.
    pub fn register_on_cancel(&self, job_id: impl Into<String>, callback: OnCancel) {
        self.on_cancel.lock().unwrap().insert(job_id.into(), callback);
    }

    pub async fn dispatch_job(&self, params: Value) -> Result<Value, McpError> {
        #[derive(Deserialize)]
        struct Params {
            description: String,
            task: String,
            #[serde(default)]
            config: Option<Value>,
        }
        let p: Params = parse(params)?;
        let id = self
            .jobs
            .create_job(&p.description, &p.task, p.config)
            .await
            .map_err(store_error)?;
        if let Some(abort) = self.session_abort.clone() {
            self.register_on_cancel(id.clone(), Box::new(move || abort()));
        }
        info!(member = %self.member, job = %id, "worker job dispatched");
        Ok(serde_json::json!({"jobId": id}))
    }

    pub async fn list(&self, params: Value) -> Result<Value, McpError> {
        #[derive(Deserialize, Default)]
        struct Params {
            #[serde(default)]
            detail: bool,
            #[serde(default)]
            filter: Option<String>,
        }
        let p: Params = parse_or_default::<Params>(params)?;
        let filter = p.filter.map(JobFilter::new);

        let mut jobs = self.jobs.list_jobs().await.map_err(store_error)?;
        if let Some(filter) = &filter {
            jobs.retain(|j| filter.matches(&j.description));
        }

        let mut out = Vec::with_capacity(jobs.len());
        for job in jobs {
            let mut entry = job_to_json(&job);
            if p.detail {
                if let Some(summary) = self.jobs.read_summary(&job.id).await.map_err(store_error)? {
                    entry["summary"] = Value::String(summary);
                }
            }
            out.push(entry);
        }
        Ok(serde_json::json!({"jobs": out}))
    }

    pub async fn status(&self, params: Value) -> Result<Value, McpError> {
        let job_id = require_job_id(&params)?;
        let meta = self.require_job(&job_id).await?;
        let summary = self.jobs.read_summary(&job_id).await.map_err(store_error)?;
        let questions = self.jobs.read_questions(&job_id).await.map_err(store_error)?;
        let decisions = self.jobs.read_decisions(&job_id).await.map_err(store_error)?;

        let mut value = job_to_json(&meta);
        value["summary"] = summary.map(Value::String).unwrap_or(Value::Null);
        value["questions"] = serde_json::json!(questions);
        value["decisions"] = serde_json::json!(decisions);
        Ok(value)
    }

    pub async fn result(&self, params: Value) -> Result<Value, McpError> {
        let job_id = require_job_id(&params)?;
        let meta = self.require_job(&job_id).await?;
        if meta.status != JobStatus::Completed {
            return Err(McpError::invalid_params(format!(
                "job {job_id:?} is not completed (status: {:?})",
                meta.status
            )));
        }
        let result = self
            .jobs
            .read_result(&job_id)
            .await
            .map_err(store_error)?
            .unwrap_or_default();
        Ok(serde_json::json!({"result": result}))
    }

    /// Idempotent on terminal statuses; transitions `running`/`failed` to
    /// `cancelled` and fires the registered on-cancel callback, if any.
    pub async fn cancel(&self, params: Value) -> Result<Value, McpError> {
        let job_id = require_job_id(&params)?;
        let meta = self.require_job(&job_id).await?;

        if meta.status.is_terminal() {
            return Ok(serde_json::json!({"status": meta.status}));
        }

        let updated = self
            .jobs
            .update_status(&job_id, JobStatus::Cancelled, None, None)
            .await
            .map_err(store_error)?;

        if let Some(callback) = self.on_cancel.lock().unwrap().remove(&job_id) {
            callback();
        }
        info!(member = %self.member, job = %job_id, "worker job cancelled");
        Ok(serde_json::json!({"status": updated.status}))
    }

    /// Rejected for `running`/`failed`; otherwise removes the job directory.
    pub async fn delete(&self, params: Value) -> Result<Value, McpError> {
        let job_id = require_job_id(&params)?;
        let meta = self.require_job(&job_id).await?;
        if matches!(meta.status, JobStatus::Running | JobStatus::Failed) {
            return Err(McpError::invalid_params(format!(
                "cannot delete job {job_id:?} in status {:?}",
                meta.status
            )));
        }
        self.jobs.delete_job(&job_id).await.map_err(store_error)?;
        self.on_cancel.lock().unwrap().remove(&job_id);
        Ok(serde_json::json!({"deleted": true}))
    }

    async fn require_job(&self, job_id: &str) -> Result<JobMetadata, McpError> {
        self.jobs
            .get_meta(job_id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| McpError::invalid_params(format!("unknown job {job_id:?}")))
    }

    fn tool_catalog() -> Value {
        serde_json::json!({"tools": [
            {"name": "dispatch", "description": "Dispatch a background research job"},
            {"name": "list", "description": "List worker jobs"},
            {"name": "status", "description": "Get a worker job's status"},
            {"name": "result", "description": "Get a completed worker job's result"},
            {"name": "cancel", "description": "Cancel a worker job"},
            {"name": "delete", "description": "Delete a worker job"},
        ]})
    }

    async fn call(&self, tool: &str, arguments: Value) -> Result<Value, McpError> {
        match tool {
            "dispatch" => self.dispatch_job(arguments).await,
            "list" => self.list(arguments).await,
            "status" => self.status(arguments).await,
            "result" => self.result(arguments).await,
            "cancel" => self.cancel(arguments).await,
            "delete" => self.delete(arguments).await,
            other => Err(McpError::method_not_found(other)),
        }
    }
}

fn job_to_json(meta: &JobMetadata) -> Value {
    serde_json::json!({
        "jobId": meta.id,
        "description": meta.description,
        "status": meta.status,
        "createdAt": meta.created_at,
        "completedAt": meta.completed_at,
        "error": meta.error,
    })
}

fn require_job_id(params: &Value) -> Result<String, McpError> {
    params
        .get("jobId")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| McpError::invalid_params("missing required field `jobId`"))
}

fn parse<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, McpError> {
    serde_json::from_value(params).map_err(|e| McpError::invalid_params(e.to_string()))
}

fn parse_or_default<T: for<'de> Deserialize<'de> + Default>(params: Value) -> Result<T, McpError> {
    if params.is_null() {
        return Ok(T::default());
    }
    parse(params)
}

fn store_error(err: guildhall_store::StoreError) -> McpError {
    warn!(error = %err, "worker job store error");
    McpError::invalid_params(err.to_string())
}

/// The surface the [`guildhall_mcp::McpTransport`] dispatches `tools/*` and
/// `initialize` to when this bridge is mounted under `<member>-dispatch`.
#[async_trait::async_trait]
impl StandardMcpHandler for WorkerDispatchBridge {
    async fn initialize(&self, _params: Value) -> Result<Value, McpError> {
        Ok(serde_json::json!({"name": format!("{}-dispatch", self.member)}))
    }

    async fn list_tools(&self) -> Result<Value, McpError> {
        Ok(Self::tool_catalog())
    }

    async fn call_tool(&self, params: Value) -> Result<Value, McpError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("missing required field `name`"))?
            .to_string();
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        match self.call(&name, arguments).await {
            Ok(value) => Ok(serde_json::json!({
                "content": [{"type": "text", "text": value.to_string()}],
                "isError": false,
            })),
            Err(err) => Ok(serde_json::json!({
                "content": [{"type": "text", "text": err.message}],
                "isError": true,
            })),
        }
    }
}

/// The `worker/*` route a member subprocess can also speak directly (spec
/// §4.D): identical semantics to the tool-call surface above, reached by
/// method name instead of tool name.
#[async_trait::async_trait]
impl Dispatcher for WorkerDispatchBridge {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let tool = method
            .strip_prefix("worker/")
            .ok_or_else(|| McpError::method_not_found(method))?;
        self.call(tool, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn bridge() -> (tempfile::TempDir, WorkerDispatchBridge) {
        let tmp = tempfile::tempdir().unwrap();
        let jobs = Arc::new(JobStore::new(tmp.path().to_path_buf()));
        (tmp, WorkerDispatchBridge::new("researcher", jobs))
    }

    #[tokio::test]
    async fn dispatch_then_list_then_status_round_trip() {
        let (_tmp, bridge) = bridge();
        let dispatched = bridge
            .dispatch_job(serde_json::json!({"description": "r", "task": "t"}))
            .await
            .unwrap();
        let job_id = dispatched["jobId"].as_str().unwrap().to_string();

        let list = bridge.list(Value::Null).await.unwrap();
        assert_eq!(list["jobs"].as_array().unwrap().len(), 1);

        let status = bridge
            .status(serde_json::json!({"jobId": job_id}))
            .await
            .unwrap();
        assert_eq!(status["status"], "running");
    }

    #[tokio::test]
    async fn result_rejected_until_completed() {
        let (_tmp, bridge) = bridge();
        let dispatched = bridge
            .dispatch_job(serde_json::json!({"description": "r", "task": "t"}))
            .await
            .unwrap();
        let job_id = dispatched["jobId"].as_str().unwrap().to_string();

        assert!(bridge
            .result(serde_json::json!({"jobId": job_id}))
            .await
            .is_err());

        bridge
            .jobs
            .update_status(&job_id, JobStatus::Completed, None, None)
            .await
            .unwrap();
        bridge.jobs.write_result(&job_id, "done").await.unwrap();

        let result = bridge.result(serde_json::json!({"jobId": job_id})).await.unwrap();
        assert_eq!(result["result"], "done");
    }

    #[tokio::test]
    async fn delete_rejects_running_and_failed() {
        let (_tmp, bridge) = bridge();
        let dispatched = bridge
            .dispatch_job(serde_json::json!({"description": "r", "task": "t"}))
            .await
            .unwrap();
        let job_id = dispatched["jobId"].as_str().unwrap().to_string();

        assert!(bridge.delete(serde_json::json!({"jobId": &job_id})).await.is_err());

        bridge
            .jobs
            .update_status(&job_id, JobStatus::Failed, None, Some("boom".into()))
            .await
            .unwrap();
        assert!(bridge.delete(serde_json::json!({"jobId": &job_id})).await.is_err());

        bridge
            .jobs
            .update_status(&job_id, JobStatus::Cancelled, None, None)
            .await
            .unwrap();
        assert!(bridge.delete(serde_json::json!({"jobId": &job_id})).await.is_ok());
    }

    #[tokio::test]
    async fn cancel_is_idempotent_on_terminal_status() {
        let (_tmp, bridge) = bridge();
        let dispatched = bridge
            .dispatch_job(serde_json::json!({"description": "r", "task": "t"}))
            .await
            .unwrap();
        let job_id = dispatched["jobId"].as_str().unwrap().to_string();

        bridge
            .jobs
            .update_status(&job_id, JobStatus::Completed, None, None)
            .await
            .unwrap();

        let result = bridge.cancel(serde_json::json!({"jobId": &job_id})).await.unwrap();
        assert_eq!(result["status"], "completed");
    }

    #[tokio::test]
    async fn cancel_fires_the_registered_callback() {
        let (_tmp, bridge) = bridge();
        let dispatched = bridge
            .dispatch_job(serde_json::json!({"description": "r", "task": "t"}))
            .await
            .unwrap();
        let job_id = dispatched["jobId"].as_str().unwrap().to_string();

        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        bridge.register_on_cancel(job_id.clone(), Box::new(move || {
            fired2.store(true, Ordering::SeqCst);
        }));

        bridge.cancel(serde_json::json!({"jobId": job_id})).await.unwrap();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn glob_filter_matches_wildcards() {
        let filter = JobFilter::new("research-*");
        assert!(filter.matches("research-alpha"));
        assert!(!filter.matches("other"));
    }

    #[tokio::test]
    async fn call_tool_wraps_success_and_error_as_text_content() {
        let (_tmp, bridge) = bridge();
        let ok = bridge
            .call_tool(serde_json::json!({"name": "list", "arguments": {}}))
            .await
            .unwrap();
        assert_eq!(ok["isError"], false);

        let err = bridge
            .call_tool(serde_json::json!({"name": "status", "arguments": {"jobId": "missing"}}))
            .await
            .unwrap();
        assert_eq!(err["isError"], true);
    }
}
