//! Retrieval over the PDF uploaded to the current thread

use super::{Tool, ToolContext, ToolOutput};
use crate::rag::DEFAULT_TOP_K;
use crate::state_machine::state::DocumentSearchInput;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct DocumentSearchTool;

const NO_DOCUMENT: &str = "No document indexed for this chat. Upload a PDF first.";

#[async_trait]
impl Tool for DocumentSearchTool {
    fn name(&self) -> &'static str {
        "rag_tool"
    }

    fn description(&self) -> String {
        "Retrieve relevant information from the uploaded PDF for this chat thread. \
         Always include the thread_id when calling this tool."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look up in the document"
                },
                "thread_id": {
                    "type": "string",
                    "description": "The current chat thread id"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let input: DocumentSearchInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::json(false, &json!({"error": e.to_string()})),
        };

        // Always the executing thread; the argument only echoes it back
        if let Some(requested) = input.thread_id.as_deref() {
            if requested != ctx.thread_id {
                tracing::warn!(
                    thread_id = %ctx.thread_id,
                    requested = %requested,
                    "rag_tool called with another thread's id; using the current thread"
                );
            }
        }

        let found = match ctx
            .documents()
            .search(&ctx.thread_id, &input.query, DEFAULT_TOP_K)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                return ToolOutput::json(
                    false,
                    &json!({"error": format!("Retrieval failed: {e}"), "query": input.query}),
                )
            }
        };

        let Some((document, hits)) = found else {
            return ToolOutput::json(false, &json!({"error": NO_DOCUMENT, "query": input.query}));
        };

        let context: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        let metadata: Vec<Value> = hits
            .iter()
            .map(|h| {
                json!({
                    "source": h.metadata.source,
                    "page": h.metadata.page,
                    "chunk": h.metadata.chunk,
                    "score": h.score,
                })
            })
            .collect();

        ToolOutput::json(
            true,
            &json!({
                "query": input.query,
                "context": context,
                "metadata": metadata,
                "source_file": document.metadata.filename,
            }),
        )
    }
}
