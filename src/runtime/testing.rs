//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use crate::db::{Message, MessageContent, UsageData};
use crate::llm::{EmbeddingService, LlmError, LlmRequest, LlmResponse, ToolDefinition};
use crate::rag::{DocumentRegistry, RagConfig};
use crate::state_machine::ConvState;
use crate::tools::{ToolContext, ToolOutput};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock LLM client that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    /// Streams the response text one word at a time
    async fn complete_streaming(
        &self,
        request: &LlmRequest,
        tokens: &mpsc::UnboundedSender<String>,
    ) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")));

        if let Ok(response) = &next {
            for word in response.text().split_inclusive(' ') {
                let _ = tokens.send(word.to_string());
            }
        }
        next
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Mock Tool Executor
// ============================================================================

/// Mock tool executor with predefined outputs
pub struct MockToolExecutor {
    outputs: HashMap<String, ToolOutput>,
    definitions: Vec<ToolDefinition>,
    /// Record of tool executions: name, input, thread
    pub executions: Mutex<Vec<(String, Value, String)>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
            definitions: Vec::new(),
            executions: Mutex::new(Vec::new()),
        }
    }

    /// Add a tool with a predefined output
    pub fn with_tool(mut self, name: impl Into<String>, output: ToolOutput) -> Self {
        let name = name.into();
        self.definitions.push(ToolDefinition {
            name: name.clone(),
            description: format!("Mock {name}"),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
        });
        self.outputs.insert(name, output);
        self
    }

    /// Names of executed tools, in order
    pub fn executed_names(&self) -> Vec<String> {
        self.executions
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _, _)| name.clone())
            .collect()
    }
}

impl Default for MockToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        self.executions
            .lock()
            .unwrap()
            .push((name.to_string(), input, ctx.thread_id));
        self.outputs.get(name).cloned()
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }
}

// ============================================================================
// Mock Embedder
// ============================================================================

const MOCK_EMBEDDING_DIM: u64 = 256;

/// Bag-of-words embedder: texts sharing words point the same way
pub struct MockEmbedder {
    calls: AtomicUsize,
    fail_next: AtomicBool,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Number of `embed` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make the next `embed` call fail
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; 256];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let slot = usize::try_from(hasher.finish() % MOCK_EMBEDDING_DIM).unwrap();
            vector[slot] += 1.0;
        }
        vector
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingService for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(LlmError::rate_limit("mock embedder rate limited"));
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn model_id(&self) -> &str {
        "mock-embedding"
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

/// In-memory storage for testing
pub struct InMemoryStorage {
    messages: Mutex<HashMap<String, Vec<Message>>>,
    /// Every persisted state, oldest first
    checkpoints: Mutex<HashMap<String, Vec<ConvState>>>,
    fail_next_write: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(HashMap::new()),
            checkpoints: Mutex::new(HashMap::new()),
            fail_next_write: AtomicBool::new(false),
        }
    }

    /// Make the next `add_message` call fail
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Get all messages for a thread
    pub fn get_all_messages(&self, thread_id: &str) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Get current state for a thread
    pub fn get_current_state(&self, thread_id: &str) -> Option<ConvState> {
        self.checkpoints
            .lock()
            .unwrap()
            .get(thread_id)
            .and_then(|states| states.last().cloned())
    }

    pub fn checkpoints(&self, thread_id: &str) -> Vec<ConvState> {
        self.checkpoints
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryStorage {
    async fn add_message(
        &self,
        thread_id: &str,
        content: &MessageContent,
        usage_data: Option<&UsageData>,
    ) -> Result<Message, String> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err("disk I/O error".to_string());
        }
        let mut messages = self.messages.lock().unwrap();
        let log = messages.entry(thread_id.to_string()).or_default();
        let msg = Message {
            message_id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            sequence_id: i64::try_from(log.len()).unwrap() + 1,
            message_type: content.message_type(),
            content: content.clone(),
            usage_data: usage_data.cloned(),
            created_at: chrono::Utc::now(),
        };
        log.push(msg.clone());
        Ok(msg)
    }

    async fn add_messages(
        &self,
        thread_id: &str,
        contents: &[MessageContent],
    ) -> Result<Vec<Message>, String> {
        let mut added = Vec::with_capacity(contents.len());
        for content in contents {
            added.push(self.add_message(thread_id, content, None).await?);
        }
        Ok(added)
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, String> {
        Ok(self.get_all_messages(thread_id))
    }
}

#[async_trait]
impl StateStore for InMemoryStorage {
    async fn update_state(&self, thread_id: &str, state: &ConvState) -> Result<(), String> {
        self.checkpoints
            .lock()
            .unwrap()
            .entry(thread_id.to_string())
            .or_default()
            .push(state.clone());
        Ok(())
    }
}

// ============================================================================
// Test Runtime Builder
// ============================================================================

use crate::runtime::{ConversationRuntime, SseEvent};
use crate::state_machine::{ConvContext, Event};
use std::time::Duration;
use tokio::sync::broadcast;

/// Helper for building test runtimes with minimal boilerplate
pub struct TestRuntime<L: LlmClient + 'static, T: ToolExecutor + 'static> {
    pub thread_id: String,
    pub storage: Arc<InMemoryStorage>,
    pub event_tx: mpsc::Sender<Event>,
    pub broadcast_rx: broadcast::Receiver<SseEvent>,
    pub llm: Arc<L>,
    pub tools: Arc<T>,
    _runtime_handle: tokio::task::JoinHandle<()>,
}

pub struct TestRuntimeBuilder<L, T> {
    thread_id: String,
    max_tool_rounds: Option<u32>,
    llm: Option<L>,
    tools: Option<T>,
    documents: Option<Arc<DocumentRegistry>>,
}

impl TestRuntimeBuilder<MockLlmClient, MockToolExecutor> {
    pub fn new() -> Self {
        Self {
            thread_id: "test-thread".to_string(),
            max_tool_rounds: Some(crate::state_machine::state::DEFAULT_MAX_TOOL_ROUNDS),
            llm: None,
            tools: None,
            documents: None,
        }
    }
}

impl<L: LlmClient + 'static, T: ToolExecutor + 'static> TestRuntimeBuilder<L, T> {
    pub fn llm(mut self, llm: L) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn thread_id(mut self, id: impl Into<String>) -> Self {
        self.thread_id = id.into();
        self
    }

    pub fn max_tool_rounds(mut self, max: Option<u32>) -> Self {
        self.max_tool_rounds = max;
        self
    }

    pub fn documents(mut self, documents: Arc<DocumentRegistry>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Swap in a different tool executor
    pub fn tools<U: ToolExecutor + 'static>(self, tools: U) -> TestRuntimeBuilder<L, U> {
        TestRuntimeBuilder {
            thread_id: self.thread_id,
            max_tool_rounds: self.max_tool_rounds,
            llm: self.llm,
            tools: Some(tools),
            documents: self.documents,
        }
    }
}

impl<T: ToolExecutor + Default + 'static> TestRuntimeBuilder<MockLlmClient, T> {
    pub fn build(mut self) -> TestRuntime<MockLlmClient, T> {
        if self.tools.is_none() {
            self.tools = Some(T::default());
        }
        self.build_with_tools()
    }
}

impl<T: ToolExecutor + 'static> TestRuntimeBuilder<MockLlmClient, T> {
    /// Build with the executor given to `tools()`
    pub fn build_with_tools(self) -> TestRuntime<MockLlmClient, T> {
        let storage = Arc::new(InMemoryStorage::new());
        let llm = Arc::new(self.llm.unwrap_or_else(|| MockLlmClient::new("test-model")));
        let tools = Arc::new(self.tools.expect("tools() must be set"));
        let documents = self.documents.unwrap_or_else(|| {
            Arc::new(DocumentRegistry::new(
                Arc::new(MockEmbedder::new()),
                &RagConfig::default(),
            ))
        });

        let context = ConvContext::new(&self.thread_id, "test-model")
            .with_max_tool_rounds(self.max_tool_rounds);
        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, broadcast_rx) = broadcast::channel(256);

        let runtime = ConversationRuntime::new(
            context,
            ConvState::Idle,
            storage.clone(),
            llm.clone(),
            tools.clone(),
            documents,
            event_rx,
            &event_tx,
            broadcast_tx,
        );

        let handle = tokio::spawn(async move {
            runtime.run().await;
        });

        TestRuntime {
            thread_id: self.thread_id,
            storage,
            event_tx,
            broadcast_rx,
            llm,
            tools,
            _runtime_handle: handle,
        }
    }
}

impl<L: LlmClient + 'static, T: ToolExecutor + 'static> TestRuntime<L, T> {
    /// Send user message to the runtime
    pub async fn send_message(&self, text: &str) {
        self.event_tx
            .send(Event::UserMessage {
                text: text.to_string(),
            })
            .await
            .expect("Failed to send message");
    }

    /// Collect broadcast events until `stop` matches one, or the timeout
    /// passes. The matching event is included.
    pub async fn collect_until(
        &mut self,
        stop: impl Fn(&SseEvent) -> bool,
        timeout: Duration,
    ) -> Option<Vec<SseEvent>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut seen = Vec::new();
        while tokio::time::Instant::now() < deadline {
            if let Ok(Ok(event)) =
                tokio::time::timeout(Duration::from_millis(50), self.broadcast_rx.recv()).await
            {
                let done = stop(&event);
                seen.push(event);
                if done {
                    return Some(seen);
                }
            }
        }
        None
    }

    /// Wait for `AgentDone` with timeout
    pub async fn wait_for_done(&mut self, timeout: Duration) -> bool {
        self.collect_until(|e| matches!(e, SseEvent::AgentDone), timeout)
            .await
            .is_some()
    }

    /// Wait for a specific state type with timeout
    pub async fn wait_for_state(&mut self, expected_type: &str, timeout: Duration) -> bool {
        self.collect_until(
            |e| {
                matches!(e, SseEvent::StateChange { state }
                    if state.get("type").and_then(Value::as_str) == Some(expected_type))
            },
            timeout,
        )
        .await
        .is_some()
    }

    /// Get all messages from storage
    pub fn messages(&self) -> Vec<Message> {
        self.storage.get_all_messages(&self.thread_id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ErrorKind, MessageType};
    use crate::llm::{ContentBlock, Usage};
    use crate::runtime::ToolRegistryExecutor;
    use crate::tools::{ToolConfig, ToolRegistry};
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(2);

    fn text_response(text: &str) -> LlmResponse {
        LlmResponse {
            content: vec![ContentBlock::text(text)],
            end_turn: true,
            usage: Usage {
                input_tokens: 10,
                output_tokens: 3,
            },
        }
    }

    fn tool_response(calls: &[(&str, &str, Value)]) -> LlmResponse {
        LlmResponse {
            content: calls
                .iter()
                .map(|(id, name, input)| ContentBlock::tool_use(*id, *name, input.clone()))
                .collect(),
            end_turn: false,
            usage: Usage::default(),
        }
    }

    fn calc_input() -> Value {
        json!({"first_num": 6, "second_num": 7, "operation": "mul"})
    }

    fn types(messages: &[Message]) -> Vec<MessageType> {
        messages.iter().map(|m| m.message_type).collect()
    }

    #[tokio::test]
    async fn test_mock_llm_client() {
        let mock = MockLlmClient::new("test-model");
        mock.queue_response(text_response("Hello there"));

        let request = LlmRequest {
            system: vec![],
            messages: vec![],
            tools: vec![],
            max_tokens: Some(100),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let response = mock.complete_streaming(&request, &tx).await.unwrap();
        assert_eq!(response.text(), "Hello there");
        assert_eq!(rx.recv().await.unwrap(), "Hello ");
        assert_eq!(rx.recv().await.unwrap(), "there");

        // Second call should fail (no more responses)
        assert!(mock.complete_streaming(&request, &tx).await.is_err());
    }

    #[tokio::test]
    async fn test_simple_text_response_streams_tokens() {
        let llm = MockLlmClient::new("test-model");
        llm.queue_response(text_response("Hello from the bot"));

        let mut rt = TestRuntimeBuilder::new().llm(llm).build();
        rt.send_message("Hi").await;

        let events = rt
            .collect_until(|e| matches!(e, SseEvent::AgentDone), WAIT)
            .await
            .expect("turn did not finish");

        let streamed: String = events
            .iter()
            .filter_map(|e| match e {
                SseEvent::Token { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(streamed, "Hello from the bot");

        let msgs = rt.messages();
        assert_eq!(types(&msgs), vec![MessageType::User, MessageType::Agent]);
        assert_eq!(
            msgs[1].usage_data,
            Some(UsageData {
                input_tokens: 10,
                output_tokens: 3
            })
        );
        assert_eq!(
            rt.storage.checkpoints(&rt.thread_id),
            vec![ConvState::Reasoning { round: 0 }, ConvState::Idle]
        );
    }

    #[tokio::test]
    async fn test_system_prompt_carries_thread_id() {
        let llm = MockLlmClient::new("test-model");
        llm.queue_response(text_response("ok"));

        let mut rt = TestRuntimeBuilder::new().llm(llm).thread_id("thread_9").build();
        rt.send_message("Hi").await;
        assert!(rt.wait_for_done(WAIT).await);

        let requests = rt.llm.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].system[0].text.contains("`thread_9`"));
        assert_eq!(requests[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_execution_cycle() {
        let llm = MockLlmClient::new("test-model");
        llm.queue_response(tool_response(&[("call_1", "calculator", calc_input())]));
        llm.queue_response(text_response("6 times 7 is 42"));

        let tools = MockToolExecutor::new()
            .with_tool("calculator", ToolOutput::success("{\"result\":42.0}"));

        let mut rt = TestRuntimeBuilder::new().llm(llm).tools(tools).build();
        rt.send_message("What is 6*7?").await;
        assert!(rt.wait_for_done(WAIT).await);

        let msgs = rt.messages();
        // User + Agent(tool_use) + Tool(result) + Agent(text)
        assert_eq!(
            types(&msgs),
            vec![
                MessageType::User,
                MessageType::Agent,
                MessageType::Tool,
                MessageType::Agent
            ]
        );

        let executions = rt.tools.executions.lock().unwrap().clone();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].0, "calculator");
        assert_eq!(executions[0].1, calc_input());
        assert_eq!(executions[0].2, "test-thread");

        // The second request sees the tool result
        let requests = rt.llm.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(
            rt.storage.get_current_state(&rt.thread_id),
            Some(ConvState::Idle)
        );
    }

    #[tokio::test]
    async fn test_tools_run_in_requested_order() {
        let llm = MockLlmClient::new("test-model");
        llm.queue_response(tool_response(&[
            ("call_a", "web_search", json!({"query": "rust"})),
            ("call_b", "calculator", calc_input()),
        ]));
        llm.queue_response(text_response("done"));

        let tools = MockToolExecutor::new()
            .with_tool("web_search", ToolOutput::success("1. Rust"))
            .with_tool("calculator", ToolOutput::success("42"));

        let mut rt = TestRuntimeBuilder::new().llm(llm).tools(tools).build();
        rt.send_message("search then multiply").await;
        assert!(rt.wait_for_done(WAIT).await);

        assert_eq!(rt.tools.executed_names(), vec!["web_search", "calculator"]);
        let msgs = rt.messages();
        assert_eq!(msgs.len(), 5);
        match (&msgs[2].content, &msgs[3].content) {
            (MessageContent::Tool(first), MessageContent::Tool(second)) => {
                assert_eq!(first.tool_use_id, "call_a");
                assert_eq!(second.tool_use_id, "call_b");
            }
            other => panic!("expected two tool results, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_to_model() {
        let llm = MockLlmClient::new("test-model");
        llm.queue_response(tool_response(&[("call_1", "bash", json!({"cmd": "ls"}))]));
        llm.queue_response(text_response("I cannot do that"));

        let mut rt = TestRuntimeBuilder::new().llm(llm).build();
        rt.send_message("run ls").await;
        assert!(rt.wait_for_done(WAIT).await);

        let msgs = rt.messages();
        match &msgs[2].content {
            MessageContent::Tool(result) => {
                assert!(result.is_error);
                assert_eq!(result.content, "Unknown tool: bash");
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_llm_error_handling() {
        let llm = MockLlmClient::new("test-model");
        llm.queue_error(LlmError::auth("Invalid API key"));

        let mut rt = TestRuntimeBuilder::new().llm(llm).build();
        rt.send_message("Hi").await;

        let events = rt
            .collect_until(|e| matches!(e, SseEvent::Error { .. }), WAIT)
            .await
            .expect("no error event");
        assert!(matches!(
            events.last(),
            Some(SseEvent::Error { message }) if message == "Invalid API key"
        ));
        assert_eq!(
            rt.storage.get_current_state(&rt.thread_id),
            Some(ConvState::Error {
                message: "Invalid API key".to_string(),
                error_kind: ErrorKind::Auth,
            })
        );
        // The user message is kept even though the turn failed
        assert_eq!(types(&rt.messages()), vec![MessageType::User]);
    }

    #[tokio::test]
    async fn test_new_message_recovers_from_error() {
        let llm = MockLlmClient::new("test-model");
        llm.queue_error(LlmError::server_error("overloaded"));
        llm.queue_response(text_response("back again"));

        let mut rt = TestRuntimeBuilder::new().llm(llm).build();
        rt.send_message("first").await;
        assert!(rt.wait_for_state("error", WAIT).await);

        rt.send_message("second").await;
        assert!(rt.wait_for_done(WAIT).await);

        let msgs = rt.messages();
        assert_eq!(
            types(&msgs),
            vec![MessageType::User, MessageType::User, MessageType::Agent]
        );
        // Both user messages reach the model
        assert_eq!(rt.llm.recorded_requests()[1].messages.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_wedge_thread() {
        let llm = MockLlmClient::new("test-model");
        llm.queue_response(text_response("still here"));

        let mut rt = TestRuntimeBuilder::new().llm(llm).build();
        rt.storage.fail_next_write();
        rt.send_message("lost").await;

        let events = rt
            .collect_until(|e| matches!(e, SseEvent::Error { .. }), WAIT)
            .await
            .expect("no error event");
        assert!(matches!(
            events.last(),
            Some(SseEvent::Error { message }) if message == "disk I/O error"
        ));
        assert!(matches!(
            rt.storage.get_current_state(&rt.thread_id),
            Some(ConvState::Error { .. })
        ));
        // The failed turn never reached the model
        assert!(rt.llm.recorded_requests().is_empty());

        rt.send_message("retry").await;
        assert!(rt.wait_for_done(WAIT).await);
        assert_eq!(
            types(&rt.messages()),
            vec![MessageType::User, MessageType::Agent]
        );
        assert_eq!(
            rt.storage.get_current_state(&rt.thread_id),
            Some(ConvState::Idle)
        );
    }

    #[tokio::test]
    async fn test_tool_round_limit() {
        let llm = MockLlmClient::new("test-model");
        llm.queue_response(tool_response(&[("call_1", "calculator", calc_input())]));
        llm.queue_response(tool_response(&[("call_2", "calculator", calc_input())]));

        let tools = MockToolExecutor::new().with_tool("calculator", ToolOutput::success("42"));

        let mut rt = TestRuntimeBuilder::new()
            .llm(llm)
            .tools(tools)
            .max_tool_rounds(Some(1))
            .build();
        rt.send_message("loop forever").await;
        assert!(rt.wait_for_state("error", WAIT).await);

        // Only the first round ran
        assert_eq!(rt.tools.executed_names(), vec!["calculator"]);

        let msgs = rt.messages();
        assert_eq!(
            types(&msgs),
            vec![
                MessageType::User,
                MessageType::Agent,
                MessageType::Tool,
                MessageType::Agent,
                MessageType::Tool
            ]
        );
        match &msgs[4].content {
            MessageContent::Tool(result) => {
                assert_eq!(result.tool_use_id, "call_2");
                assert!(result.is_error);
            }
            other => panic!("expected synthetic tool result, got {other:?}"),
        }
        assert!(matches!(
            rt.storage.get_current_state(&rt.thread_id),
            Some(ConvState::Error {
                error_kind: ErrorKind::ToolLoopLimit,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_rag_tool_end_to_end() {
        let documents = Arc::new(DocumentRegistry::new(
            Arc::new(MockEmbedder::new()),
            &RagConfig::default(),
        ));
        documents
            .ingest_pages(
                "test-thread",
                "lease.pdf",
                "/tmp/ragbot-lease.pdf",
                &[
                    "The rent is due on the first day of each month.".to_string(),
                    "Pets are not allowed in the building.".to_string(),
                ],
            )
            .await
            .unwrap();

        let llm = MockLlmClient::new("test-model");
        llm.queue_response(tool_response(&[(
            "call_1",
            "rag_tool",
            json!({"query": "are pets allowed", "thread_id": "test-thread"}),
        )]));
        llm.queue_response(text_response("No pets."));

        let registry = ToolRegistry::standard(&reqwest::Client::new(), &ToolConfig::default());
        let mut rt = TestRuntimeBuilder::new()
            .llm(llm)
            .documents(documents)
            .tools(ToolRegistryExecutor::new(Arc::new(registry)))
            .build_with_tools();
        rt.send_message("Can I keep a cat?").await;
        assert!(rt.wait_for_done(WAIT).await);

        let requests = rt.llm.recorded_requests();
        assert!(requests[0].system[0].text.contains("`lease.pdf`"));
        assert_eq!(requests[0].tools.len(), 4);

        let msgs = rt.messages();
        let MessageContent::Tool(result) = &msgs[2].content else {
            panic!("expected tool result");
        };
        assert!(!result.is_error);
        let payload: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(payload["source_file"], "lease.pdf");
        assert_eq!(payload["context"][0], "Pets are not allowed in the building.");
    }
}

