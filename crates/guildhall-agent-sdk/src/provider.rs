// SPDX-License-Identifier: MIT

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::oneshot;

use crate::message::AgentMessage;

/// A prior turn handed to the SDK as conversation history (spec §4.I.3:
/// "the session's stored messages as priors").
#[derive(Debug, Clone)]
pub struct PriorMessage {
    pub role: String,
    pub content: String,
}

/// One composed tool server the SDK call can dispatch tool calls to — either
/// a spawned plugin subprocess (§4.E) or the in-process Worker Dispatch
/// Bridge (§4.K). The core only needs enough to describe the server to the
/// wrapped SDK; the SDK owns the actual MCP handshake.
#[derive(Debug, Clone)]
pub struct ToolServerSpec {
    pub name: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub session_id: String,
    pub prompt: String,
    pub prior_messages: Vec<PriorMessage>,
    pub tool_servers: Vec<ToolServerSpec>,
}

/// Distinguishes a cancelled stream from an SDK-originated failure (spec §5,
/// §7: cancellation must be recognizable so the consumer can emit
/// `error{reason:"aborted"}` rather than a generic error).
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStreamError {
    Aborted,
    Sdk(String),
}

pub type AgentStreamItem = Result<AgentMessage, AgentStreamError>;
pub type AgentStream = Pin<Box<dyn Stream<Item = AgentStreamItem> + Send>>;

/// The interface the core adapts to. Out of scope per spec §1: the core
/// does not re-implement model interaction, only drives this trait.
#[async_trait]
pub trait AgentSdk: Send + Sync {
    /// Start a query. `cancel` resolves (or is dropped) to request early
    /// termination; the returned stream must then yield
    /// `Err(AgentStreamError::Aborted)` as its terminal item.
    async fn query(&self, request: QueryRequest, cancel: oneshot::Receiver<()>) -> AgentStream;
}
