// SPDX-License-Identifier: MIT

use std::pin::Pin;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::warn;

use guildhall_core::{Event, SessionStatus, Unsubscribe};
use guildhall_store::StoreError;

use crate::context::ServerContext;
use crate::error::SessionManagerError;
use crate::expiry::effective_status;

pub fn router(ctx: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/messages", post(post_message))
        .route("/api/sessions/:id/stop", post(stop_session))
        .route("/api/sessions/:id/events", get(session_events))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.0, Json(serde_json::json!({"error": self.1}))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match err {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(status, err.to_string())
    }
}

impl From<SessionManagerError> for ApiError {
    fn from(err: SessionManagerError) -> Self {
        Self(err.status_code(), err.to_string())
    }
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    name: String,
    #[serde(default, rename = "guildMembers")]
    guild_members: Vec<String>,
}

async fn list_sessions(State(ctx): State<Arc<ServerContext>>) -> Result<impl IntoResponse, ApiError> {
    let ttl = ctx.session_ttl_hours();
    let mut sessions = ctx.session_store().await.list().await?;
    for session in &mut sessions {
        session.status = effective_status(session, ttl);
    }
    Ok(Json(sessions))
}

async fn create_session(
    State(ctx): State<Arc<ServerContext>>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError(StatusCode::BAD_REQUEST, "name must not be empty".to_string()));
    }
    let meta = ctx.session_store().await.create(&body.name, body.guild_members).await?;
    Ok((StatusCode::CREATED, Json(meta)))
}

#[derive(Serialize)]
struct SessionDetail {
    #[serde(flatten)]
    meta: guildhall_store::SessionMetadata,
    messages: Vec<guildhall_store::StoredMessage>,
}

async fn get_session(
    State(ctx): State<Arc<ServerContext>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ttl = ctx.session_ttl_hours();
    let (mut meta, messages) = ctx
        .session_store()
        .await
        .get(&id)
        .await?
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, format!("session {id:?} not found")))?;
    meta.status = effective_status(&meta, ttl);
    Ok(Json(SessionDetail { meta, messages }))
}

async fn delete_session(
    State(ctx): State<Arc<ServerContext>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.session_store().await.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct PostMessageRequest {
    content: String,
}

async fn post_message(
    State(ctx): State<Arc<ServerContext>>,
    Path(id): Path<String>,
    Json(body): Json<PostMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.content.trim().is_empty() {
        return Err(ApiError(StatusCode::BAD_REQUEST, "content must not be empty".to_string()));
    }
    let manager = ctx.session_manager().await;
    manager.run_query(&id, &body.content).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn stop_session(
    State(ctx): State<Arc<ServerContext>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let manager = ctx.session_manager().await;
    manager.stop_query(&id).await?;
    Ok(StatusCode::OK)
}

/// Drives the unsubscribe handle on both paths spec §9 requires: the
/// stream's own `done` observation and, via `Drop`, a client disconnect
/// (the stream future is dropped when the connection closes).
struct UnsubGuard(Unsubscribe);

impl Drop for UnsubGuard {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}

fn to_sse(event: &Event) -> SseEvent {
    SseEvent::default()
        .event(event.sse_name())
        .json_data(event)
        .unwrap_or_else(|err| {
            warn!(%err, "failed to encode event as SSE data");
            SseEvent::default().event(event.sse_name())
        })
}

type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, std::convert::Infallible>> + Send>>;

async fn session_events(
    State(ctx): State<Arc<ServerContext>>,
    Path(id): Path<String>,
) -> Result<Sse<EventStream>, ApiError> {
    let (meta, _) = ctx
        .session_store()
        .await
        .get(&id)
        .await?
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, format!("session {id:?} not found")))?;

    let manager = ctx.session_manager().await;

    if !manager.is_query_running(&id) {
        let event = Event::StatusChange {
            status: effective_status(&meta, ctx.session_ttl_hours()),
        };
        let stream = futures::stream::once(async move { Ok(to_sse(&event)) });
        return Ok(Sse::new(Box::pin(stream) as _).keep_alive(KeepAlive::default()));
    }

    let bus = ctx.event_bus().await;
    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    // Queue the catch-up event before subscribing, so it is strictly
    // ordered ahead of anything the bus delivers from this point on.
    let _ = tx.send(Event::StatusChange { status: SessionStatus::Running });
    let unsub = bus.subscribe(id.clone(), move |event| {
        let _ = tx.send(event.clone());
    });

    let state = (UnboundedReceiverStream::new(rx), Some(UnsubGuard(unsub)), false);
    let stream = futures::stream::unfold(state, |(mut rx, mut guard, done)| async move {
        use futures::StreamExt;
        if done {
            return None;
        }
        let event = rx.next().await?;
        let done = matches!(event, Event::Done);
        if done {
            guard.take();
        }
        Some((Ok(to_sse(&event)), (rx, guard, done)))
    });

    Ok(Sse::new(Box::pin(stream) as _).keep_alive(KeepAlive::default()))
}
