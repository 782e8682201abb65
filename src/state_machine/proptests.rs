//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::state::*;
use super::transition::*;
use super::*;
use crate::db::{ErrorKind, ToolResult};
use crate::llm::{ContentBlock, Usage};
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context(max_tool_rounds: Option<u32>) -> ConvContext {
    ConvContext::new("test-thread", "test-model").with_max_tool_rounds(max_tool_rounds)
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_calculator_input() -> impl Strategy<Value = CalculatorInput> {
    (
        -1000i32..1000,
        -1000i32..1000,
        prop_oneof![Just("add"), Just("sub"), Just("mul"), Just("div"), Just("pow")],
    )
        .prop_map(|(a, b, op)| CalculatorInput {
            first_num: f64::from(a),
            second_num: f64::from(b),
            operation: op.to_string(),
        })
}

fn arb_tool_input() -> impl Strategy<Value = ToolInput> {
    prop_oneof![
        arb_calculator_input().prop_map(ToolInput::Calculator),
        "[A-Z]{1,5}".prop_map(|symbol| ToolInput::StockPrice(StockPriceInput { symbol })),
        "[a-z ]{1,30}".prop_map(|query| ToolInput::WebSearch(WebSearchInput { query })),
        "[a-z ]{1,30}".prop_map(|query| ToolInput::DocumentSearch(DocumentSearchInput {
            query,
            thread_id: None
        })),
    ]
}

fn arb_tool_calls() -> impl Strategy<Value = Vec<ToolCall>> {
    prop::collection::vec(arb_tool_input(), 1..5).prop_map(|inputs| {
        inputs
            .into_iter()
            .enumerate()
            .map(|(i, input)| ToolCall::new(format!("call_{i}"), input))
            .collect()
    })
}

fn arb_error_kind() -> impl Strategy<Value = ErrorKind> {
    prop_oneof![
        Just(ErrorKind::Network),
        Just(ErrorKind::RateLimit),
        Just(ErrorKind::Auth),
        Just(ErrorKind::InvalidRequest),
        Just(ErrorKind::ServerError),
        Just(ErrorKind::Unknown),
    ]
}

fn arb_busy_state() -> impl Strategy<Value = ConvState> {
    prop_oneof![
        (0u32..30).prop_map(|round| ConvState::Reasoning { round }),
        (0u32..30, arb_tool_calls()).prop_map(|(round, mut calls)| {
            let current_tool = calls.remove(0);
            ConvState::ExecutingTool {
                round,
                current_tool,
                remaining_tools: calls,
            }
        }),
    ]
}

fn response(tool_calls: Vec<ToolCall>) -> Event {
    let mut content = vec![ContentBlock::text("working")];
    for call in &tool_calls {
        content.push(ContentBlock::tool_use(
            call.id.clone(),
            call.name(),
            call.input.to_value(),
        ));
    }
    Event::LlmResponse {
        content,
        tool_calls,
        usage: Usage::default(),
    }
}

/// Drive one reason/execute cycle to completion, returning the final state
/// and the number of `ExecuteTool` effects that were emitted
fn run_turn(
    ctx: &ConvContext,
    rounds: &[Vec<ToolCall>],
) -> Result<(ConvState, usize), TransitionError> {
    let mut state = transition(
        &ConvState::Idle,
        ctx,
        Event::UserMessage {
            text: "go".to_string(),
        },
    )?
    .new_state;
    let mut executed = 0;

    for calls in rounds {
        if !matches!(state, ConvState::Reasoning { .. }) {
            break;
        }
        let mut result = transition(&state, ctx, response(calls.clone()))?;
        loop {
            let next = result.effects.iter().find_map(|e| match e {
                Effect::ExecuteTool { tool } => Some(tool.clone()),
                _ => None,
            });
            let Some(tool) = next else { break };
            executed += 1;
            result = transition(
                &result.new_state,
                ctx,
                Event::ToolComplete {
                    tool_use_id: tool.id.clone(),
                    result: ToolResult::success(tool.id, "ok".to_string()),
                },
            )?;
        }
        state = result.new_state;
    }

    if matches!(state, ConvState::Reasoning { .. }) {
        state = transition(&state, ctx, response(vec![]))?.new_state;
    }
    Ok((state, executed))
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn busy_states_reject_user_messages(state in arb_busy_state(), text in "[a-z]{1,20}") {
        let result = transition(&state, &test_context(None), Event::UserMessage { text });
        prop_assert_eq!(result.unwrap_err(), TransitionError::AgentBusy);
    }

    #[test]
    fn user_message_always_starts_fresh_turn(
        kind in arb_error_kind(),
        text in "[a-z]{1,20}",
        from_error in any::<bool>(),
    ) {
        let state = if from_error {
            ConvState::Error { message: "x".to_string(), error_kind: kind }
        } else {
            ConvState::Idle
        };
        let result = transition(&state, &test_context(None), Event::UserMessage { text }).unwrap();
        prop_assert_eq!(result.new_state, ConvState::Reasoning { round: 0 });
    }

    #[test]
    fn every_turn_terminates_within_round_limit(
        max in 0u32..6,
        rounds in prop::collection::vec(arb_tool_calls(), 0..10),
    ) {
        let ctx = test_context(Some(max));
        let (state, executed) = run_turn(&ctx, &rounds).unwrap();

        prop_assert!(!state.is_working());
        let allowed: usize = rounds.iter().take(max as usize).map(Vec::len).sum();
        prop_assert!(executed <= allowed);
        if rounds.len() > max as usize {
            let is_loop_limit = matches!(
                state,
                ConvState::Error { error_kind: ErrorKind::ToolLoopLimit, .. }
            );
            prop_assert!(is_loop_limit);
        } else {
            prop_assert_eq!(state, ConvState::Idle);
        }
    }

    #[test]
    fn tools_run_in_request_order(calls in arb_tool_calls()) {
        let ctx = test_context(None);
        let mut result =
            transition(&ConvState::Reasoning { round: 0 }, &ctx, response(calls.clone())).unwrap();
        let mut order = Vec::new();
        while let Some(tool) = result.effects.iter().find_map(|e| match e {
            Effect::ExecuteTool { tool } => Some(tool.clone()),
            _ => None,
        }) {
            order.push(tool.id.clone());
            result = transition(
                &result.new_state,
                &ctx,
                Event::ToolComplete {
                    tool_use_id: tool.id.clone(),
                    result: ToolResult::error(tool.id, "failed".to_string()),
                },
            )
            .unwrap();
        }
        let expected: Vec<String> = calls.into_iter().map(|c| c.id).collect();
        prop_assert_eq!(order, expected);
        prop_assert_eq!(result.new_state, ConvState::Reasoning { round: 1 });
    }

    #[test]
    fn llm_errors_surface_as_error_state(kind in arb_error_kind(), round in 0u32..30) {
        let result = transition(
            &ConvState::Reasoning { round },
            &test_context(None),
            Event::LlmError { message: "failed".to_string(), error_kind: kind.clone() },
        ).unwrap();
        prop_assert_eq!(
            result.new_state,
            ConvState::Error { message: "failed".to_string(), error_kind: kind }
        );
    }
}
