//! Conversation runtime executor

use super::traits::{LlmClient, Storage, ToolExecutor};
use super::SseEvent;

use crate::db::{ErrorKind, Message, MessageContent, ToolContent, ToolResult, UserContent};
use crate::llm::{ContentBlock, LlmMessage, LlmRequest, MessageRole, SystemContent};
use crate::rag::DocumentRegistry;
use crate::state_machine::{extract_tool_calls, transition, ConvContext, ConvState, Effect, Event};
use crate::system_prompt::build_system_prompt;
use crate::tools::ToolContext;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Output budget per model request
const MAX_OUTPUT_TOKENS: u32 = 4096;

/// Generic conversation runtime that can work with any storage, LLM, and tool implementations
pub struct ConversationRuntime<S, L, T>
where
    S: Storage + Clone + 'static,
    L: LlmClient + 'static,
    T: ToolExecutor + 'static,
{
    context: ConvContext,
    state: ConvState,
    storage: S,
    llm_client: Arc<L>,
    tool_executor: Arc<T>,
    documents: Arc<DocumentRegistry>,
    event_rx: mpsc::Receiver<Event>,
    /// Weak so the loop ends once every handle and in-flight task is gone
    event_tx: mpsc::WeakSender<Event>,
    broadcast_tx: broadcast::Sender<SseEvent>,
}

impl<S, L, T> ConversationRuntime<S, L, T>
where
    S: Storage + Clone + 'static,
    L: LlmClient + 'static,
    T: ToolExecutor + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: ConvContext,
        state: ConvState,
        storage: S,
        llm_client: L,
        tool_executor: T,
        documents: Arc<DocumentRegistry>,
        event_rx: mpsc::Receiver<Event>,
        event_tx: &mpsc::Sender<Event>,
        broadcast_tx: broadcast::Sender<SseEvent>,
    ) -> Self {
        Self {
            context,
            state,
            storage,
            llm_client: Arc::new(llm_client),
            tool_executor: Arc::new(tool_executor),
            documents,
            event_rx,
            event_tx: event_tx.downgrade(),
            broadcast_tx,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(thread_id = %self.context.thread_id, "Starting conversation runtime");

        while let Some(event) = self.event_rx.recv().await {
            if let Err(e) = self.process_event(event).await {
                tracing::warn!(
                    thread_id = %self.context.thread_id,
                    error = %e,
                    "Error handling event"
                );
                let _ = self.broadcast_tx.send(SseEvent::Error { message: e });
            }
        }

        tracing::info!(thread_id = %self.context.thread_id, "Conversation runtime stopped");
    }

    async fn process_event(&mut self, event: Event) -> Result<(), String> {
        // Pure state transition
        let result =
            transition(&self.state, &self.context, event).map_err(|e| e.to_string())?;

        tracing::debug!(
            thread_id = %self.context.thread_id,
            from = ?self.state,
            to = ?result.new_state,
            effects = result.effects.len(),
            "Transition"
        );
        self.state = result.new_state;

        for effect in result.effects {
            if let Err(e) = self.execute_effect(effect).await {
                self.fail_turn(&e).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Leave a half-applied turn in the error state so the next user
    /// message can start over. Remaining effects of the turn are dropped.
    async fn fail_turn(&mut self, message: &str) {
        self.state = ConvState::Error {
            message: message.to_string(),
            error_kind: ErrorKind::Unknown,
        };

        if let Err(e) = self
            .storage
            .update_state(&self.context.thread_id, &self.state)
            .await
        {
            tracing::error!(
                thread_id = %self.context.thread_id,
                error = %e,
                "Failed to persist error state"
            );
        }

        let state = serde_json::to_value(&self.state).unwrap_or(Value::Null);
        let _ = self.broadcast_tx.send(SseEvent::StateChange { state });
    }

    fn sender(&self) -> Result<mpsc::Sender<Event>, String> {
        self.event_tx
            .upgrade()
            .ok_or_else(|| "Conversation runtime is shutting down".to_string())
    }

    fn broadcast_message(&self, message: &Message) {
        let message = serde_json::to_value(message).unwrap_or(Value::Null);
        let _ = self.broadcast_tx.send(SseEvent::Message { message });
    }

    /// Execute an effect. Long-running effects are spawned and report back
    /// through the event channel.
    async fn execute_effect(&mut self, effect: Effect) -> Result<(), String> {
        match effect {
            Effect::PersistMessage {
                content,
                usage_data,
            } => {
                let msg = self
                    .storage
                    .add_message(&self.context.thread_id, &content, usage_data.as_ref())
                    .await?;
                self.broadcast_message(&msg);
            }

            Effect::PersistToolResults { results } => {
                let contents: Vec<MessageContent> = results
                    .iter()
                    .map(|r| MessageContent::tool(&r.tool_use_id, &r.output, r.is_error))
                    .collect();
                let messages = self
                    .storage
                    .add_messages(&self.context.thread_id, &contents)
                    .await?;
                for msg in &messages {
                    self.broadcast_message(msg);
                }
            }

            Effect::PersistState => {
                self.storage
                    .update_state(&self.context.thread_id, &self.state)
                    .await?;

                let state = serde_json::to_value(&self.state).unwrap_or(Value::Null);
                let _ = self.broadcast_tx.send(SseEvent::StateChange { state });
            }

            Effect::RequestLlm => self.request_llm()?,

            Effect::ExecuteTool { tool } => {
                let event_tx = self.sender()?;
                let tool_executor = self.tool_executor.clone();
                let ctx = ToolContext::new(self.context.thread_id.clone(), self.documents.clone());
                let tool_use_id = tool.id.clone();
                let tool_name = tool.name().to_string();
                let input = tool.input.to_value();

                tokio::spawn(async move {
                    tracing::info!(tool = %tool_name, id = %tool_use_id, "Executing tool");

                    let result = match tool_executor.execute(&tool_name, input, ctx).await {
                        Some(out) => ToolResult {
                            tool_use_id: tool_use_id.clone(),
                            success: out.success,
                            output: out.output,
                            is_error: !out.success,
                        },
                        None => ToolResult::error(
                            tool_use_id.clone(),
                            format!("Unknown tool: {tool_name}"),
                        ),
                    };
                    let _ = event_tx
                        .send(Event::ToolComplete {
                            tool_use_id,
                            result,
                        })
                        .await;
                });
            }

            Effect::NotifyClient { event_type, data } => match event_type.as_str() {
                "agent_done" => {
                    let _ = self.broadcast_tx.send(SseEvent::AgentDone);
                }
                "error" => {
                    let message = data
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown error")
                        .to_string();
                    let _ = self.broadcast_tx.send(SseEvent::Error { message });
                }
                other => tracing::debug!(event_type = %other, "Unhandled client notification"),
            },
        }
        Ok(())
    }

    /// Spawn the model request; text deltas are broadcast as they arrive
    fn request_llm(&self) -> Result<(), String> {
        let event_tx = self.sender()?;
        let llm_client = self.llm_client.clone();
        let tool_executor = self.tool_executor.clone();
        let storage = self.storage.clone();
        let broadcast_tx = self.broadcast_tx.clone();
        let thread_id = self.context.thread_id.clone();
        let document = self.documents.metadata(&thread_id);

        tokio::spawn(async move {
            let messages = match build_llm_messages(&storage, &thread_id).await {
                Ok(m) => m,
                Err(message) => {
                    let _ = event_tx
                        .send(Event::LlmError {
                            message,
                            error_kind: ErrorKind::Unknown,
                        })
                        .await;
                    return;
                }
            };

            let request = LlmRequest {
                system: vec![SystemContent::new(build_system_prompt(
                    &thread_id,
                    document.as_ref(),
                ))],
                messages,
                tools: tool_executor.definitions(),
                max_tokens: Some(MAX_OUTPUT_TOKENS),
            };

            tracing::info!(
                thread_id = %thread_id,
                model = %llm_client.model_id(),
                messages = request.messages.len(),
                "Making LLM request"
            );

            let (token_tx, mut token_rx) = mpsc::unbounded_channel::<String>();
            let forwarder = tokio::spawn(async move {
                while let Some(text) = token_rx.recv().await {
                    let _ = broadcast_tx.send(SseEvent::Token { text });
                }
            });

            let result = llm_client.complete_streaming(&request, &token_tx).await;
            // Flush every token before the final message is persisted
            drop(token_tx);
            let _ = forwarder.await;

            let event = match result {
                Ok(response) => {
                    tracing::debug!(
                        thread_id = %thread_id,
                        end_turn = response.end_turn,
                        blocks = response.content.len(),
                        "LLM response"
                    );
                    Event::LlmResponse {
                        tool_calls: extract_tool_calls(&response.content),
                        content: response.content,
                        usage: response.usage,
                    }
                }
                Err(e) => Event::LlmError {
                    message: e.message,
                    error_kind: e.kind.into(),
                },
            };
            let _ = event_tx.send(event).await;
        });

        Ok(())
    }
}

/// Rebuild the model's view of the thread from the message log
async fn build_llm_messages<S: Storage>(
    storage: &S,
    thread_id: &str,
) -> Result<Vec<LlmMessage>, String> {
    let db_messages = storage.get_messages(thread_id).await?;

    let messages = db_messages
        .into_iter()
        .map(|msg| match msg.content {
            MessageContent::User(UserContent { text }) => LlmMessage {
                role: MessageRole::User,
                content: vec![ContentBlock::text(text)],
            },
            MessageContent::Agent(blocks) => LlmMessage {
                role: MessageRole::Assistant,
                content: blocks,
            },
            // Tool results go in user message
            MessageContent::Tool(ToolContent {
                tool_use_id,
                content,
                is_error,
            }) => LlmMessage {
                role: MessageRole::User,
                content: vec![ContentBlock::tool_result(tool_use_id, content, is_error)],
            },
        })
        .collect();

    Ok(messages)
}
