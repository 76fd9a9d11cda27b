// SPDX-License-Identifier: MIT

mod message;
mod mock;
mod provider;

pub use message::{
    AgentMessage, ContentBlock, ResultContentPart, ResultMessage, StreamEvent, SystemMessage,
    ToolResultBlock,
};
pub use mock::{HangingAgentSdk, ScriptedAgentSdk};
pub use provider::{
    AgentSdk, AgentStream, AgentStreamError, AgentStreamItem, PriorMessage, QueryRequest,
    ToolServerSpec,
};
