// SPDX-License-Identifier: MIT

use guildhall_agent_sdk::{
    AgentMessage, ContentBlock, ResultContentPart, ResultMessage, StreamEvent, SystemMessage,
};

use crate::event::Event;

/// Pure mapping from one streamed agent message to zero or more Guild Hall
/// events (spec §4.J). No I/O, no `self`, no hidden state: anything the
/// table doesn't name produces nothing.
pub fn translate(message: &AgentMessage) -> Vec<Event> {
    match message {
        AgentMessage::System(SystemMessage::Init { session_id, worker }) => vec![Event::Session {
            session_id: session_id.clone(),
            worker: worker.clone(),
        }],
        AgentMessage::System(SystemMessage::Other { .. }) => vec![],

        AgentMessage::StreamEvent(StreamEvent::TextDelta(text)) => vec![Event::TextDelta {
            text: text.clone(),
        }],
        AgentMessage::StreamEvent(StreamEvent::ToolUseStart { name }) => vec![Event::ToolUse {
            name: name.clone(),
            input: serde_json::json!({}),
        }],
        AgentMessage::StreamEvent(StreamEvent::Other { .. }) => vec![],

        // Text blocks are deliberately ignored: streamed deltas already
        // carried the text, and re-emitting it here would duplicate it.
        AgentMessage::AssistantFinal { content } => content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { name, input } => Some(Event::ToolUse {
                    name: name.clone(),
                    input: input.clone(),
                }),
                ContentBlock::Text(_) => None,
            })
            .collect(),

        AgentMessage::UserToolResults { results } => results
            .iter()
            .map(|result| Event::ToolResult {
                name: result.name.clone().unwrap_or_else(|| "unknown".to_string()),
                output: collapse_result_content(&result.content),
            })
            .collect(),

        AgentMessage::Result(ResultMessage::Success { cost }) => {
            vec![Event::TurnEnd { cost: *cost }]
        }
        AgentMessage::Result(ResultMessage::Error { errors, subtype }) => {
            let reason = if errors.is_empty() {
                subtype.clone()
            } else {
                errors.join("; ")
            };
            vec![Event::Error { reason }]
        }
    }
}

fn collapse_result_content(parts: &[ResultContentPart]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            ResultContentPart::Text(text) => Some(text.as_str()),
            ResultContentPart::Other => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use guildhall_agent_sdk::ToolResultBlock;

    #[test]
    fn system_init_emits_session_event() {
        let events = translate(&AgentMessage::System(SystemMessage::Init {
            session_id: "s1".into(),
            worker: "default".into(),
        }));
        assert_eq!(
            events,
            vec![Event::Session {
                session_id: "s1".into(),
                worker: "default".into(),
            }]
        );
    }

    #[test]
    fn other_system_subtypes_emit_nothing() {
        let events = translate(&AgentMessage::System(SystemMessage::Other {
            subtype: "ping".into(),
        }));
        assert!(events.is_empty());
    }

    #[test]
    fn assistant_final_ignores_text_but_keeps_tool_use() {
        let events = translate(&AgentMessage::AssistantFinal {
            content: vec![
                ContentBlock::Text("hello".into()),
                ContentBlock::ToolUse {
                    name: "grep".into(),
                    input: serde_json::json!({"q": "x"}),
                },
            ],
        });
        assert_eq!(
            events,
            vec![Event::ToolUse {
                name: "grep".into(),
                input: serde_json::json!({"q": "x"}),
            }]
        );
    }

    #[test]
    fn tool_results_fall_back_to_unknown_name_and_collapse_text() {
        let events = translate(&AgentMessage::UserToolResults {
            results: vec![ToolResultBlock {
                name: None,
                content: vec![
                    ResultContentPart::Text("part-a".into()),
                    ResultContentPart::Text("part-b".into()),
                    ResultContentPart::Other,
                ],
            }],
        });
        assert_eq!(
            events,
            vec![Event::ToolResult {
                name: "unknown".into(),
                output: "part-apart-b".into(),
            }]
        );
    }

    #[test]
    fn result_error_joins_errors_when_present() {
        let events = translate(&AgentMessage::Result(ResultMessage::Error {
            errors: vec!["a".into(), "b".into()],
            subtype: "overloaded".into(),
        }));
        assert_eq!(
            events,
            vec![Event::Error {
                reason: "a; b".into(),
            }]
        );
    }

    #[test]
    fn result_error_falls_back_to_subtype_when_errors_empty() {
        let events = translate(&AgentMessage::Result(ResultMessage::Error {
            errors: vec![],
            subtype: "overloaded".into(),
        }));
        assert_eq!(
            events,
            vec![Event::Error {
                reason: "overloaded".into(),
            }]
        );
    }

    #[test]
    fn result_success_carries_cost() {
        let events = translate(&AgentMessage::Result(ResultMessage::Success {
            cost: Some(0.42),
        }));
        assert_eq!(events, vec![Event::TurnEnd { cost: Some(0.42) }]);
    }
}
