// SPDX-License-Identifier: MIT

use serde_json::Value;

/// The streamed message union the wrapped agent SDK yields.
///
/// This is intentionally a closed, minimal shape: the real SDK's wire
/// format carries far more than this, but the core (per spec §9 "Dynamic
/// typing at message boundaries") only needs to recognize the subset the
/// [`crate::translate`]-equivalent translator in `guildhall-core` switches on.
/// Anything the SDK emits that doesn't fit one of these shapes is not
/// representable here and is dropped at the adaptation boundary, not inside
/// the translator.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    System(SystemMessage),
    StreamEvent(StreamEvent),
    /// The final, fully-assembled assistant message for the turn.
    AssistantFinal { content: Vec<ContentBlock> },
    /// A user-role message carrying tool results (sent back by the host
    /// after executing tool calls the assistant requested).
    UserToolResults { results: Vec<ToolResultBlock> },
    Result(ResultMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SystemMessage {
    Init { session_id: String, worker: String },
    Other { subtype: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// `content_block_delta` carrying a `text_delta`.
    TextDelta(String),
    /// `content_block_start` carrying a `tool_use` block.
    ToolUseStart { name: String },
    /// Any other stream_event subtype (ignored by the translator).
    Other { subtype: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    ToolUse { name: String, input: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultBlock {
    pub name: Option<String>,
    pub content: Vec<ResultContentPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultContentPart {
    Text(String),
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultMessage {
    Success { cost: Option<f64> },
    /// `result/error*` — `errors` is the joined error list when available;
    /// `subtype` is the SDK's error subtype string, used as a fallback
    /// reason when `errors` is empty (spec §4.J, §7).
    Error { errors: Vec<String>, subtype: String },
}
