//! Core conversation state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions:
//! the reason/execute-tool cycle is an explicit enum plus a transition
//! function, and all I/O happens in the runtime that executes the effects.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{ConvContext, ConvState, ToolCall, ToolInput};
pub use transition::{extract_tool_calls, transition, TransitionError};
