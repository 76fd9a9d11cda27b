// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use guildhall_agent_sdk::{
    AgentMessage, AgentSdk, AgentStream, AgentStreamError, ContentBlock, QueryRequest,
    ResultMessage, StreamEvent, SystemMessage,
};

/// The real wrapped agent SDK is out of scope (spec §1: "it is assumed to
/// expose a streaming query interface ... the core adapts to this interface
/// but does not re-implement model interaction"). This is the backend
/// `guild-hall serve` runs with until one is wired in: it streams the
/// prompt back as the assistant's answer, exercising the full translator
/// and event-bus path without a model behind it.
pub struct EchoAgentSdk;

#[async_trait]
impl AgentSdk for EchoAgentSdk {
    async fn query(&self, request: QueryRequest, mut cancel: oneshot::Receiver<()>) -> AgentStream {
        let (tx, rx) = mpsc::channel(8);

        tokio::spawn(async move {
            if cancel.try_recv().is_ok() {
                let _ = tx.send(Err(AgentStreamError::Aborted)).await;
                return;
            }

            let reply = format!("echo: {}", request.prompt);
            let messages = [
                AgentMessage::System(SystemMessage::Init {
                    session_id: request.session_id.clone(),
                    worker: "echo".to_string(),
                }),
                AgentMessage::StreamEvent(StreamEvent::TextDelta(reply.clone())),
                AgentMessage::AssistantFinal {
                    content: vec![ContentBlock::Text(reply)],
                },
                AgentMessage::Result(ResultMessage::Success { cost: Some(0.0) }),
            ];

            for msg in messages {
                if cancel.try_recv().is_ok() {
                    let _ = tx.send(Err(AgentStreamError::Aborted)).await;
                    return;
                }
                if tx.send(Ok(msg)).await.is_err() {
                    return;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}
