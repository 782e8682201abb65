//! Chat model definitions
//!
//! Every model speaks the `OpenAI` chat-completions protocol; the table
//! only records what differs between them.

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID (e.g., "gpt-4o-mini")
    pub id: &'static str,
    /// Name sent in the API request
    pub api_name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Context window size in tokens
    pub context_window: usize,
    /// Reasoning models take `max_completion_tokens` instead of `max_tokens`
    pub uses_max_completion_tokens: bool,
}

/// Model used when `DEFAULT_MODEL` is unset
pub const DEFAULT_MODEL_ID: &str = "gpt-4o-mini";

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "gpt-4o-mini",
            api_name: "gpt-4o-mini",
            description: "GPT-4o mini (fast, inexpensive)",
            context_window: 128_000,
            uses_max_completion_tokens: false,
        },
        ModelDef {
            id: "gpt-4o",
            api_name: "gpt-4o",
            description: "GPT-4o (balanced performance)",
            context_window: 128_000,
            uses_max_completion_tokens: false,
        },
        ModelDef {
            id: "gpt-4.1",
            api_name: "gpt-4.1",
            description: "GPT-4.1 (long context)",
            context_window: 1_047_576,
            uses_max_completion_tokens: false,
        },
        ModelDef {
            id: "gpt-4.1-mini",
            api_name: "gpt-4.1-mini",
            description: "GPT-4.1 mini (long context, fast)",
            context_window: 1_047_576,
            uses_max_completion_tokens: false,
        },
        ModelDef {
            id: "o4-mini",
            api_name: "o4-mini",
            description: "o4-mini (reasoning)",
            context_window: 200_000,
            uses_max_completion_tokens: true,
        },
    ]
}

/// Look up a model definition by its user-facing ID
pub fn find_model(id: &str) -> Option<&'static ModelDef> {
    all_models().iter().find(|m| m.id == id)
}
