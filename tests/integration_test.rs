// SPDX-License-Identifier: MIT

//! Black-box scenarios driving the public crate APIs the way a real
//! `guild-hall serve` process would, without going through HTTP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use guildhall_agent_sdk::{
    AgentMessage, AgentSdk, HangingAgentSdk, ResultMessage, ScriptedAgentSdk, StreamEvent,
};
use guildhall_core::{EventBus, SessionStatus};
use guildhall_mcp::{LifecycleManager, McpTransport, PortRegistry};
use guildhall_server::{SessionManager, SessionManagerError};
use guildhall_store::{JobStore, SessionStore};

struct Harness {
    _tmp: tempfile::TempDir,
    sessions: Arc<SessionStore>,
    bus: Arc<EventBus>,
    manager: SessionManager,
}

async fn harness(sdk: Arc<dyn AgentSdk>, session_ttl_hours: u64) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let sessions = Arc::new(SessionStore::new(tmp.path().join("sessions")));
    let jobs = Arc::new(JobStore::new(tmp.path().join("jobs")));
    let lifecycle = Arc::new(LifecycleManager::new(tmp.path(), Arc::new(PortRegistry::new())));
    let bus = Arc::new(EventBus::new());
    let transport = Arc::new(McpTransport::new());

    let manager = SessionManager::with_session_ttl(
        sessions.clone(),
        jobs,
        lifecycle,
        bus.clone(),
        transport,
        sdk,
        "http://127.0.0.1:9".to_string(),
        session_ttl_hours,
    );

    Harness {
        _tmp: tmp,
        sessions,
        bus,
        manager,
    }
}

async fn wait_until_idle(manager: &SessionManager, session_id: &str) {
    for _ in 0..100 {
        if !manager.is_query_running(session_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("query on {session_id} did not finish in time");
}

/// Golden scenario 1 (create → send → stream → complete): a scripted SDK
/// replays a text delta then a success result; the session ends up
/// `Completed` with the assistant reply persisted and the bus seeing the
/// full event sequence ending in `done`.
#[tokio::test]
async fn create_send_stream_complete() {
    let sdk: Arc<dyn AgentSdk> = Arc::new(ScriptedAgentSdk::new(vec![
        AgentMessage::StreamEvent(StreamEvent::TextDelta("hello there".into())),
        AgentMessage::Result(ResultMessage::Success { cost: Some(0.02) }),
    ]));
    let h = harness(sdk, 24).await;
    let meta = h.sessions.create("demo", vec![]).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let _unsub = h.bus.subscribe(meta.id.clone(), move |event| {
        seen_clone.lock().unwrap().push(event.sse_name().to_string());
    });

    h.manager.run_query(&meta.id, "hi there").await.unwrap();
    wait_until_idle(&h.manager, &meta.id).await;

    let (stored, messages) = h.sessions.get(&meta.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert!(messages.iter().any(|m| m.content == "hello there"));

    let events = seen.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("status_change"));
    assert_eq!(events.last().map(String::as_str), Some("done"));
}

/// Golden scenario: a second `runQuery` against an already-running session
/// is rejected outright rather than queued.
#[tokio::test]
async fn run_query_rejects_while_already_running() {
    let sdk: Arc<dyn AgentSdk> = Arc::new(HangingAgentSdk);
    let h = harness(sdk, 24).await;
    let meta = h.sessions.create("demo", vec![]).await.unwrap();

    h.manager.run_query(&meta.id, "first").await.unwrap();
    assert!(h.manager.is_query_running(&meta.id));

    let err = h.manager.run_query(&meta.id, "second").await.unwrap_err();
    assert!(matches!(err, SessionManagerError::AlreadyRunning(ref id) if id == &meta.id));

    h.manager.stop_query(&meta.id).await.unwrap();
    wait_until_idle(&h.manager, &meta.id).await;
}

/// Golden scenario 2 (stop a hanging query): a query whose SDK never
/// produces a message is aborted by `stop_query`, which settles the
/// session back to `Idle` rather than leaving it `Running` forever.
#[tokio::test]
async fn stop_hanging_query() {
    let sdk: Arc<dyn AgentSdk> = Arc::new(HangingAgentSdk);
    let h = harness(sdk, 24).await;
    let meta = h.sessions.create("demo", vec![]).await.unwrap();

    h.manager.run_query(&meta.id, "hi").await.unwrap();
    assert!(h.manager.is_query_running(&meta.id));

    h.manager.stop_query(&meta.id).await.unwrap();
    wait_until_idle(&h.manager, &meta.id).await;

    let (stored, _) = h.sessions.get(&meta.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Idle);
}

/// A stop against a session with nothing running is distinguishable from
/// a stop against an unknown session (409 vs 404 at the HTTP layer).
#[tokio::test]
async fn stop_with_nothing_running_is_not_running_error() {
    let sdk: Arc<dyn AgentSdk> = Arc::new(ScriptedAgentSdk::new(vec![]));
    let h = harness(sdk, 24).await;
    let meta = h.sessions.create("demo", vec![]).await.unwrap();

    let err = h.manager.stop_query(&meta.id).await.unwrap_err();
    assert!(matches!(err, SessionManagerError::NotRunning(ref id) if id == &meta.id));
}

#[tokio::test]
async fn stop_unknown_session_is_not_found() {
    let sdk: Arc<dyn AgentSdk> = Arc::new(ScriptedAgentSdk::new(vec![]));
    let h = harness(sdk, 24).await;

    let err = h.manager.stop_query("does-not-exist").await.unwrap_err();
    assert!(matches!(err, SessionManagerError::NotFound(ref id) if id == "does-not-exist"));
}

/// Open Question 2 (SPEC_FULL.md §E): an idle session whose
/// `last_activity_at` is older than the configured TTL reports as expired
/// on the read path, and `runQuery` refuses to resume it.
#[tokio::test]
async fn run_query_on_expired_session_is_rejected() {
    let sdk: Arc<dyn AgentSdk> = Arc::new(ScriptedAgentSdk::new(vec![]));
    let h = harness(sdk, 0).await;
    let meta = h.sessions.create("demo", vec![]).await.unwrap();

    // ttl_hours = 0 means the session is expired the instant it is created.
    let err = h.manager.run_query(&meta.id, "hi").await.unwrap_err();
    assert!(matches!(err, SessionManagerError::Expired(ref id) if id == &meta.id));
}

/// Worker dispatch round trip, exercised the way a plugin would see it
/// through the MCP transport's `worker/*` method namespace: dispatch a
/// job, list it back, read its status, and fetch its result once
/// completed.
#[tokio::test]
async fn worker_dispatch_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = Arc::new(JobStore::new(tmp.path().join("jobs")));
    let bridge = guildhall_worker::WorkerDispatchBridge::new("planner", jobs.clone());

    let dispatched = bridge
        .dispatch_job(serde_json::json!({
            "description": "draft the release notes",
            "task": "summarize the changelog",
        }))
        .await
        .unwrap();
    let job_id = dispatched["jobId"].as_str().unwrap().to_string();

    let listed = bridge.list(serde_json::json!({})).await.unwrap();
    assert!(listed["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .any(|j| j["jobId"] == job_id));

    let status = bridge
        .status(serde_json::json!({"jobId": job_id}))
        .await
        .unwrap();
    assert_eq!(status["status"], "running");

    jobs.update_status(&job_id, guildhall_store::JobStatus::Completed, None, None)
        .await
        .unwrap();
    jobs.write_result(&job_id, "release notes drafted").await.unwrap();

    let result = bridge
        .result(serde_json::json!({"jobId": job_id}))
        .await
        .unwrap();
    assert_eq!(result["result"], "release notes drafted");
}
