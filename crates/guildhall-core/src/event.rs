// SPDX-License-Identifier: MIT

use serde::Serialize;
use serde_json::Value;

pub use guildhall_config::SessionStatus;

/// A tagged variant delivered on the Event Bus (spec §3 "Event", §4.J).
/// `type` is the discriminant serde writes out, and is reused verbatim as
/// the SSE `event:` name (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Emitted once per run, from `system/init` (spec §4.J).
    Session {
        #[serde(rename = "sessionId")]
        session_id: String,
        worker: String,
    },
    StatusChange {
        status: SessionStatus,
    },
    TextDelta {
        text: String,
    },
    ToolUse {
        name: String,
        input: Value,
    },
    ToolResult {
        name: String,
        output: String,
    },
    TurnEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        cost: Option<f64>,
    },
    Error {
        reason: String,
    },
    Done,
}

impl Event {
    /// The value used as the SSE `event:` field name (spec §6).
    pub fn sse_name(&self) -> &'static str {
        match self {
            Event::Session { .. } => "session",
            Event::StatusChange { .. } => "status_change",
            Event::TextDelta { .. } => "text_delta",
            Event::ToolUse { .. } => "tool_use",
            Event::ToolResult { .. } => "tool_result",
            Event::TurnEnd { .. } => "turn_end",
            Event::Error { .. } => "error",
            Event::Done => "done",
        }
    }
}
