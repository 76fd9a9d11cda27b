// SPDX-License-Identifier: MIT

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::message::AgentMessage;
use crate::provider::{AgentSdk, AgentStream, AgentStreamError, QueryRequest};

/// Replays a fixed script of messages, optionally pausing between each.
///
/// Used by `guildhall-core`/`guildhall-server` tests to exercise the
/// translator and session manager without a real model backend.
pub struct ScriptedAgentSdk {
    script: Vec<AgentMessage>,
    delay: Duration,
}

impl ScriptedAgentSdk {
    pub fn new(script: Vec<AgentMessage>) -> Self {
        Self {
            script,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(script: Vec<AgentMessage>, delay: Duration) -> Self {
        Self { script, delay }
    }
}

#[async_trait]
impl AgentSdk for ScriptedAgentSdk {
    async fn query(&self, _request: QueryRequest, mut cancel: oneshot::Receiver<()>) -> AgentStream {
        let script = self.script.clone();
        let delay = self.delay;
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            for msg in script {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = &mut cancel => {
                            let _ = tx.send(Err(AgentStreamError::Aborted)).await;
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                } else if cancel.try_recv().is_ok() {
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

/// Never produces a message until cancelled — simulates a query that hangs
/// on its first `await` (spec §8 golden test 2: "Stop a hanging query").
pub struct HangingAgentSdk;

#[async_trait]
impl AgentSdk for HangingAgentSdk {
    async fn query(&self, _request: QueryRequest, cancel: oneshot::Receiver<()>) -> AgentStream {
        let (tx, rx) = mpsc::channel::<Result<AgentMessage, AgentStreamError>>(1);
        tokio::spawn(async move {
            let _ = cancel.await;
            let _ = tx.send(Err(AgentStreamError::Aborted)).await;
        });
        Box::pin(ReceiverStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn scripted_sdk_replays_in_order() {
        let sdk = ScriptedAgentSdk::new(vec![
            AgentMessage::StreamEvent(crate::message::StreamEvent::TextDelta("hi".into())),
            AgentMessage::Result(crate::message::ResultMessage::Success { cost: Some(0.1) }),
        ]);
        let (_tx, cancel) = oneshot::channel();
        let mut stream = sdk
            .query(
                QueryRequest {
                    session_id: "s1".into(),
                    prompt: "hi".into(),
                    prior_messages: vec![],
                    tool_servers: vec![],
                },
                cancel,
            )
            .await;

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(
            first,
            AgentMessage::StreamEvent(crate::message::StreamEvent::TextDelta("hi".into()))
        );
        let second = stream.next().await.unwrap().unwrap();
        assert!(matches!(second, AgentMessage::Result(_)));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn hanging_sdk_only_yields_after_cancel() {
        let sdk = HangingAgentSdk;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let mut stream = sdk
            .query(
                QueryRequest {
                    session_id: "s1".into(),
                    prompt: "hi".into(),
                    prior_messages: vec![],
                    tool_servers: vec![],
                },
                cancel_rx,
            )
            .await;

        let race = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(race.is_err(), "should not yield before cancellation");

        cancel_tx.send(()).unwrap();
        let item = stream.next().await.unwrap();
        assert_eq!(item, Err(AgentStreamError::Aborted));
    }
}
