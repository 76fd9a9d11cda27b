// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::warn;

use guildhall_agent_sdk::{
    AgentMessage, AgentSdk, AgentStreamError, PriorMessage, QueryRequest, StreamEvent,
    ToolServerSpec,
};
use guildhall_core::{translate, Event, EventBus, SessionStatus};
use guildhall_mcp::{LifecycleManager, McpTransport};
use guildhall_store::{JobStore, MessageRole, MetadataPatch, SessionStore, StoredMessage};
use guildhall_worker::WorkerDispatchBridge;

use crate::error::SessionManagerError;
use crate::expiry::effective_status;

/// A shared, idempotent abort signal (spec §5 "Cancellation handle"). Both
/// the HTTP stop handler and a worker job's on-cancel callback can fire the
/// same handle; `oneshot::Sender` alone can't be shared since it is
/// consumed on send.
#[derive(Clone)]
pub struct CancelHandle(Arc<Mutex<Option<oneshot::Sender<()>>>>);

impl CancelHandle {
    fn new(tx: oneshot::Sender<()>) -> Self {
        Self(Arc::new(Mutex::new(Some(tx))))
    }

    pub fn fire(&self) {
        if let Some(tx) = self.0.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

type RunningMap = Arc<Mutex<HashMap<String, CancelHandle>>>;

/// The orchestration core (spec §4.I): drives at most one agent query per
/// session, translating its stream into bus events and session-store
/// writes, with cancellation wired from both HTTP and worker-job callers.
pub struct SessionManager {
    sessions: Arc<SessionStore>,
    jobs: Arc<JobStore>,
    lifecycle: Arc<LifecycleManager>,
    bus: Arc<EventBus>,
    transport: Arc<McpTransport>,
    sdk: Arc<dyn AgentSdk>,
    /// Base URL this server's own MCP transport is reachable at, used to
    /// compose the per-session Worker Dispatch Bridge's `ToolServerSpec`.
    local_mcp_base: String,
    /// How long an idle/completed session may sit before `runQuery` treats
    /// it as expired rather than resumable (SPEC_FULL.md §E, Open Question 2).
    session_ttl_hours: u64,
    running: RunningMap,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<SessionStore>,
        jobs: Arc<JobStore>,
        lifecycle: Arc<LifecycleManager>,
        bus: Arc<EventBus>,
        transport: Arc<McpTransport>,
        sdk: Arc<dyn AgentSdk>,
        local_mcp_base: String,
    ) -> Self {
        Self::with_session_ttl(sessions, jobs, lifecycle, bus, transport, sdk, local_mcp_base, 24)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_session_ttl(
        sessions: Arc<SessionStore>,
        jobs: Arc<JobStore>,
        lifecycle: Arc<LifecycleManager>,
        bus: Arc<EventBus>,
        transport: Arc<McpTransport>,
        sdk: Arc<dyn AgentSdk>,
        local_mcp_base: String,
        session_ttl_hours: u64,
    ) -> Self {
        Self {
            sessions,
            jobs,
            lifecycle,
            bus,
            transport,
            sdk,
            local_mcp_base,
            session_ttl_hours,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_query_running(&self, session_id: &str) -> bool {
        self.running.lock().unwrap().contains_key(session_id)
    }

    /// Preconditions: session exists, session not already running. The user
    /// message append, `running` transition, and initial `status_change`
    /// emission (spec §4.I steps 1) happen before this returns; the rest of
    /// the query (steps 2-5) runs in a spawned task.
    pub async fn run_query(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<(), SessionManagerError> {
        let (meta, _) = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| SessionManagerError::NotFound(session_id.to_string()))?;

        if effective_status(&meta, self.session_ttl_hours) == SessionStatus::Expired {
            return Err(SessionManagerError::Expired(session_id.to_string()));
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let cancel = CancelHandle::new(cancel_tx);
        {
            let mut running = self.running.lock().unwrap();
            if running.contains_key(session_id) {
                return Err(SessionManagerError::AlreadyRunning(session_id.to_string()));
            }
            running.insert(session_id.to_string(), cancel);
        }

        self.sessions
            .append_message(
                session_id,
                StoredMessage {
                    role: MessageRole::User,
                    content: content.to_string(),
                    timestamp: Utc::now(),
                },
            )
            .await?;
        self.sessions
            .update_metadata(
                session_id,
                MetadataPatch {
                    status: Some(SessionStatus::Running),
                    ..Default::default()
                },
            )
            .await?;
        self.bus.emit(session_id, &Event::StatusChange { status: SessionStatus::Running });

        let prior_messages = self.prior_messages(session_id).await;
        let driver = Driver {
            sessions: self.sessions.clone(),
            jobs: self.jobs.clone(),
            lifecycle: self.lifecycle.clone(),
            bus: self.bus.clone(),
            transport: self.transport.clone(),
            sdk: self.sdk.clone(),
            local_mcp_base: self.local_mcp_base.clone(),
        };
        let sid = session_id.to_string();
        let members = meta.members.clone();
        let running = self.running.clone();
        let prompt = content.to_string();

        let job_cancel = cancel.clone();

        tokio::spawn(async move {
            driver
                .drive(sid.clone(), members, prompt, prior_messages, cancel_rx, job_cancel)
                .await;
            running.lock().unwrap().remove(&sid);
        });

        Ok(())
    }

    /// Idempotent; firing an already-consumed handle is a no-op. A stop for
    /// a session with nothing running surfaces as `NotRunning` so the HTTP
    /// layer can answer 409 (404 is reserved for an unknown session).
    pub async fn stop_query(&self, session_id: &str) -> Result<(), SessionManagerError> {
        if self.sessions.get(session_id).await?.is_none() {
            return Err(SessionManagerError::NotFound(session_id.to_string()));
        }
        let cancel = self.running.lock().unwrap().get(session_id).cloned();
        match cancel {
            Some(cancel) => {
                cancel.fire();
                Ok(())
            }
            None => Err(SessionManagerError::NotRunning(session_id.to_string())),
        }
    }

    async fn prior_messages(&self, session_id: &str) -> Vec<PriorMessage> {
        match self.sessions.get(session_id).await {
            Ok(Some((_, messages))) => messages
                .into_iter()
                .map(|m| PriorMessage {
                    role: role_str(m.role).to_string(),
                    content: m.content,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::ToolUse => "tool_use",
        MessageRole::ToolResult => "tool_result",
    }
}

struct Driver {
    sessions: Arc<SessionStore>,
    jobs: Arc<JobStore>,
    lifecycle: Arc<LifecycleManager>,
    bus: Arc<EventBus>,
    transport: Arc<McpTransport>,
    sdk: Arc<dyn AgentSdk>,
    local_mcp_base: String,
}

impl Driver {
    async fn drive(
        &self,
        session_id: String,
        members: Vec<String>,
        prompt: String,
        prior_messages: Vec<PriorMessage>,
        cancel_rx: oneshot::Receiver<()>,
        cancel: CancelHandle,
    ) {
        let dispatch_name = format!("{session_id}-dispatch");

        let mut tool_servers = Vec::with_capacity(members.len() + 1);
        for member in &members {
            if let Err(err) = self.lifecycle.start(member).await {
                warn!(session = %session_id, member, %err, "failed to start guild member for session");
                self.bus.emit(&session_id, &Event::Error { reason: err.to_string() });
                self.finish(&session_id, SessionStatus::Error).await;
                return;
            }
            match self.lifecycle.bound_url(member).await {
                Some(base_url) => tool_servers.push(ToolServerSpec {
                    name: member.clone(),
                    base_url,
                }),
                None => warn!(session = %session_id, member, "member has no bound url after start"),
            }
        }

        // A worker job's cancel callback fires the same handle the HTTP stop
        // handler uses; the `Err(Aborted)` branch below emits `error` then
        // `done` once the SDK stream actually unwinds.
        let abort = {
            let cancel = cancel.clone();
            Arc::new(move || {
                cancel.fire();
            })
        };
        let bridge = Arc::new(WorkerDispatchBridge::for_session(
            session_id.clone(),
            self.jobs.clone(),
            abort,
        ));
        self.transport.mount_standard(dispatch_name.clone(), bridge.clone());
        self.transport.mount_worker(dispatch_name.clone(), bridge);
        tool_servers.push(ToolServerSpec {
            name: dispatch_name.clone(),
            base_url: format!("{}/mcp/{}", self.local_mcp_base, dispatch_name),
        });

        let request = QueryRequest {
            session_id: session_id.clone(),
            prompt,
            prior_messages,
            tool_servers,
        };

        let mut stream = self.sdk.query(request, cancel_rx).await;

        let mut assistant_buffer = String::new();
        let mut final_status = SessionStatus::Completed;

        use futures::StreamExt;
        while let Some(item) = stream.next().await {
            match item {
                Ok(message) => {
                    if let AgentMessage::StreamEvent(StreamEvent::TextDelta(text)) = &message {
                        assistant_buffer.push_str(text);
                    }
                    for event in translate(&message) {
                        if matches!(event, Event::Error { .. }) {
                            final_status = SessionStatus::Error;
                        }
                        self.persist_side_effect(&session_id, &event).await;
                        self.bus.emit(&session_id, &event);
                    }
                }
                Err(AgentStreamError::Aborted) => {
                    self.bus.emit(&session_id, &Event::Error { reason: "aborted".to_string() });
                    final_status = SessionStatus::Idle;
                    break;
                }
                Err(AgentStreamError::Sdk(reason)) => {
                    self.bus.emit(&session_id, &Event::Error { reason });
                    final_status = SessionStatus::Error;
                    break;
                }
            }
        }

        if !assistant_buffer.is_empty() {
            let _ = self
                .sessions
                .append_message(
                    &session_id,
                    StoredMessage {
                        role: MessageRole::Assistant,
                        content: assistant_buffer,
                        timestamp: Utc::now(),
                    },
                )
                .await;
        }

        self.bus.emit(&session_id, &Event::Done);
        self.transport.unmount(&dispatch_name);
        self.finish(&session_id, final_status).await;
    }

    async fn persist_side_effect(&self, session_id: &str, event: &Event) {
        let stored = match event {
            Event::ToolUse { name, input } => Some(StoredMessage {
                role: MessageRole::ToolUse,
                content: serde_json::json!({"name": name, "input": input}).to_string(),
                timestamp: Utc::now(),
            }),
            Event::ToolResult { name, output } => Some(StoredMessage {
                role: MessageRole::ToolResult,
                content: serde_json::json!({"name": name, "output": output}).to_string(),
                timestamp: Utc::now(),
            }),
            _ => None,
        };
        if let Some(message) = stored {
            if let Err(err) = self.sessions.append_message(session_id, message).await {
                warn!(session = session_id, %err, "failed to persist session message");
            }
        }
    }

    async fn finish(&self, session_id: &str, status: SessionStatus) {
        let _ = self
            .sessions
            .update_metadata(
                session_id,
                MetadataPatch {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await;
    }
}
