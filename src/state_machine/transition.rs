//! Pure state transition function

use super::{ConvContext, ConvState, Effect, Event, ToolCall};
use crate::db::{ErrorKind, MessageContent, ToolResult, UsageData};
use crate::llm::{ContentBlock, Usage};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("Agent is busy, wait for the current reply to finish")]
    AgentBusy,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs; persistence,
/// LLM calls and tool execution are described by the returned effects.
pub fn transition(
    state: &ConvState,
    context: &ConvContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // User messages
        // ============================================================

        // Idle or Error + UserMessage -> Reasoning (a new turn also clears errors)
        (ConvState::Idle | ConvState::Error { .. }, Event::UserMessage { text }) => {
            Ok(TransitionResult::new(ConvState::Reasoning { round: 0 })
                .with_effect(Effect::persist_user_message(&text))
                .with_effect(Effect::PersistState)
                .with_effect(Effect::RequestLlm))
        }

        (
            ConvState::Reasoning { .. } | ConvState::ExecutingTool { .. },
            Event::UserMessage { .. },
        ) => Err(TransitionError::AgentBusy),

        // ============================================================
        // LLM responses
        // ============================================================

        // No tool calls: the turn is finished
        (
            ConvState::Reasoning { .. },
            Event::LlmResponse {
                content,
                tool_calls,
                usage,
            },
        ) if tool_calls.is_empty() => Ok(TransitionResult::new(ConvState::Idle)
            .with_effect(Effect::persist_agent_message(
                MessageContent::agent(content),
                Some(usage_to_data(&usage)),
            ))
            .with_effect(Effect::PersistState)
            .with_effect(Effect::notify_agent_done())),

        // Tool calls but the round budget is spent: answer every call with an
        // error result so the log stays well-formed, then stop
        (
            ConvState::Reasoning { round },
            Event::LlmResponse {
                content,
                tool_calls,
                usage,
            },
        ) if !context.allows_tool_round(*round) => {
            let message = format!(
                "Stopped after {round} tool rounds without a final answer. \
                 Send another message to continue."
            );
            let results = tool_calls
                .iter()
                .map(|tool| {
                    ToolResult::error(
                        tool.id.clone(),
                        "Tool round limit reached; the tool was not run".to_string(),
                    )
                })
                .collect();

            Ok(TransitionResult::new(ConvState::Error {
                message: message.clone(),
                error_kind: ErrorKind::ToolLoopLimit,
            })
            .with_effect(Effect::persist_agent_message(
                MessageContent::agent(content),
                Some(usage_to_data(&usage)),
            ))
            .with_effect(Effect::PersistToolResults { results })
            .with_effect(Effect::PersistState)
            .with_effect(Effect::notify_error(&message)))
        }

        // Tool calls: execute them one at a time in request order
        (
            ConvState::Reasoning { round },
            Event::LlmResponse {
                content,
                tool_calls,
                usage,
            },
        ) => {
            let mut tools = tool_calls.into_iter();
            let Some(first) = tools.next() else {
                return Err(TransitionError::InvalidTransition(
                    "LLM response without tool calls reached the tool branch".to_string(),
                ));
            };

            Ok(TransitionResult::new(ConvState::ExecutingTool {
                round: *round,
                current_tool: first.clone(),
                remaining_tools: tools.collect(),
            })
            .with_effect(Effect::persist_agent_message(
                MessageContent::agent(content),
                Some(usage_to_data(&usage)),
            ))
            .with_effect(Effect::PersistState)
            .with_effect(Effect::execute_tool(first)))
        }

        (ConvState::Reasoning { .. }, Event::LlmError { message, error_kind }) => {
            Ok(TransitionResult::new(ConvState::Error {
                message: message.clone(),
                error_kind,
            })
            .with_effect(Effect::PersistState)
            .with_effect(Effect::notify_error(&message)))
        }

        // ============================================================
        // Tool execution
        // ============================================================
        (
            ConvState::ExecutingTool {
                round,
                current_tool,
                remaining_tools,
            },
            Event::ToolComplete {
                tool_use_id,
                result,
            },
        ) => {
            if tool_use_id != current_tool.id {
                return Err(TransitionError::InvalidTransition(format!(
                    "Tool result for {tool_use_id} while waiting on {}",
                    current_tool.id
                )));
            }

            let persist = Effect::persist_tool_message(&result);
            match remaining_tools.split_first() {
                Some((next, rest)) => Ok(TransitionResult::new(ConvState::ExecutingTool {
                    round: *round,
                    current_tool: next.clone(),
                    remaining_tools: rest.to_vec(),
                })
                .with_effect(persist)
                .with_effect(Effect::PersistState)
                .with_effect(Effect::execute_tool(next.clone()))),
                // Last tool done: feed the results back to the model
                None => Ok(TransitionResult::new(ConvState::Reasoning { round: round + 1 })
                    .with_effect(persist)
                    .with_effect(Effect::PersistState)
                    .with_effect(Effect::RequestLlm)),
            }
        }

        // ============================================================
        // Invalid transitions
        // ============================================================
        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {state:?} with event {}",
            event_name(&event)
        ))),
    }
}

fn event_name(event: &Event) -> &'static str {
    match event {
        Event::UserMessage { .. } => "UserMessage",
        Event::LlmResponse { .. } => "LlmResponse",
        Event::LlmError { .. } => "LlmError",
        Event::ToolComplete { .. } => "ToolComplete",
    }
}

fn usage_to_data(usage: &Usage) -> UsageData {
    UsageData {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
    }
}

/// Collect the tool calls in a block list, in order
pub fn extract_tool_calls(content: &[ContentBlock]) -> Vec<ToolCall> {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(ToolCall::new(
                id.clone(),
                super::ToolInput::from_name_and_value(name, input.clone()),
            )),
            _ => None,
        })
        .collect()
}
