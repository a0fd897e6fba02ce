//! Mocks and fixtures shared by the Nodeflow test suites.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::event::ExecutionEvent;
use nodeflow_core::node::{NodeKind, NodeRecord};
use nodeflow_core::traits::{EventSink, SearchProvider, TextGenerator};
use nodeflow_core::types::GenerationRequest;

type ErrorFactory = Arc<dyn Fn() -> NodeflowError + Send + Sync>;

#[derive(Clone)]
enum Reply {
    Value(Value),
    Text(String),
    Unparseable,
    Fail(ErrorFactory),
}

/// Replies for prompts containing `needle`, consumed in order. The last
/// reply repeats once the others are used up.
struct Rule {
    needle: String,
    structured: bool,
    replies: Vec<Reply>,
    next: usize,
}

impl Rule {
    fn take(&mut self) -> Reply {
        let i = self.next.min(self.replies.len() - 1);
        self.next += 1;
        self.replies[i].clone()
    }
}

/// A recorded generator call.
#[derive(Debug, Clone)]
pub enum Call {
    Text(GenerationRequest),
    Structured(String),
}

impl Call {
    pub fn prompt(&self) -> &str {
        match self {
            Self::Text(request) => &request.prompt,
            Self::Structured(prompt) => prompt,
        }
    }
}

/// Scripted [`TextGenerator`].
///
/// Replies are chosen by the first rule whose needle occurs in the prompt.
/// Unmatched text requests echo the prompt; unmatched structured requests
/// fail with `LlmParse`.
#[derive(Default)]
pub struct MockGenerator {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Call>>,
    delay: Option<Duration>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(self, needle: &str, structured: bool, replies: Vec<Reply>) -> Self {
        assert!(!replies.is_empty(), "a rule needs at least one reply");
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            structured,
            replies,
            next: 0,
        });
        self
    }

    pub fn on_structured(self, needle: &str, reply: Value) -> Self {
        self.rule(needle, true, vec![Reply::Value(reply)])
    }

    pub fn on_structured_sequence(self, needle: &str, replies: Vec<Value>) -> Self {
        self.rule(needle, true, replies.into_iter().map(Reply::Value).collect())
    }

    /// Structured calls matching `needle` fail with `LlmParse`.
    pub fn on_structured_unparseable(self, needle: &str) -> Self {
        self.rule(needle, true, vec![Reply::Unparseable])
    }

    pub fn on_structured_error<F>(self, needle: &str, error: F) -> Self
    where
        F: Fn() -> NodeflowError + Send + Sync + 'static,
    {
        self.rule(needle, true, vec![Reply::Fail(Arc::new(error))])
    }

    pub fn on_text(self, needle: &str, reply: &str) -> Self {
        self.rule(needle, false, vec![Reply::Text(reply.to_string())])
    }

    pub fn on_text_error<F>(self, needle: &str, error: F) -> Self
    where
        F: Fn() -> NodeflowError + Send + Sync + 'static,
    {
        self.rule(needle, false, vec![Reply::Fail(Arc::new(error))])
    }

    /// Every call sleeps this long before replying.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn text_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Text(_)))
            .count()
    }

    pub fn structured_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Structured(_)))
            .count()
    }

    /// Prompts of all calls containing `needle`, in call order.
    pub fn prompts_containing(&self, needle: &str) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.prompt().to_string())
            .filter(|p| p.contains(needle))
            .collect()
    }

    fn reply_for(&self, prompt: &str, structured: bool) -> Option<Reply> {
        let mut rules = self.rules.lock().unwrap();
        rules
            .iter_mut()
            .find(|r| r.structured == structured && prompt.contains(&r.needle))
            .map(Rule::take)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl TextGenerator for MockGenerator {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Call::Text(request.clone()));
            let reply = self.reply_for(&request.prompt, false);
            self.pause().await;
            match reply {
                Some(Reply::Text(text)) => Ok(text),
                Some(Reply::Value(value)) => Ok(value.to_string()),
                Some(Reply::Unparseable) => Ok(String::new()),
                Some(Reply::Fail(error)) => Err(error()),
                None => Ok(format!("echo: {}", request.prompt)),
            }
        })
    }

    fn generate_structured(&self, prompt: String) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Call::Structured(prompt.clone()));
            let reply = self.reply_for(&prompt, true);
            self.pause().await;
            match reply {
                Some(Reply::Value(value)) => Ok(value),
                Some(Reply::Text(text)) => Ok(Value::String(text)),
                Some(Reply::Fail(error)) => Err(error()),
                Some(Reply::Unparseable) | None => {
                    Err(NodeflowError::LlmParse("no JSON object in response".into()))
                }
            }
        })
    }
}

/// [`SearchProvider`] with a fixed answer.
pub struct MockSearch {
    reply: std::result::Result<String, String>,
    queries: Mutex<Vec<String>>,
}

impl MockSearch {
    pub fn returning(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Every search fails with a `Search` error carrying `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl SearchProvider for MockSearch {
    fn search(&self, query: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.queries.lock().unwrap().push(query);
            self.reply.clone().map_err(NodeflowError::Search)
        })
    }
}

/// [`EventSink`] that keeps every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Terminal events only.
    pub fn outcomes(&self) -> Vec<ExecutionEvent> {
        self.events()
            .into_iter()
            .filter(ExecutionEvent::is_terminal)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ExecutionEvent) -> BoxFuture<'_, ()> {
        self.events.lock().unwrap().push(event);
        Box::pin(async {})
    }
}

// -- Fixtures --

/// Formatter node (upper-casing) whose graph-local id is `local`.
pub fn plain_node(id: &str, local: &str) -> NodeRecord {
    NodeRecord::new(
        id,
        NodeKind::Formatter,
        json!({ "node": { "id": local }, "operation": "to_upper" }),
    )
}

/// Like [`plain_node`], carrying one `source -> target` edge.
pub fn node_with_edge(id: &str, local: &str, source: &str, target: &str) -> NodeRecord {
    NodeRecord::new(
        id,
        NodeKind::Formatter,
        json!({
            "node": { "id": local },
            "operation": "to_upper",
            "edge": { "source": source, "target": target }
        }),
    )
}

pub fn extract_text_node(id: &str, file_name: &str, text: &str) -> NodeRecord {
    NodeRecord::new(
        id,
        NodeKind::ExtractText,
        json!({ "file_name": file_name, "extracted_text": text }),
    )
}

pub fn generative_node(id: &str, prompt: &str) -> NodeRecord {
    NodeRecord::new(id, NodeKind::GenerativeAi, json!({ "prompt": prompt }))
}

pub fn formatter_node(id: &str, operation: &str) -> NodeRecord {
    NodeRecord::new(id, NodeKind::Formatter, json!({ "operation": operation }))
}

pub fn agent_node(id: &str, goal: &str) -> NodeRecord {
    NodeRecord::new(id, NodeKind::Agent, json!({ "goal": goal }))
}
