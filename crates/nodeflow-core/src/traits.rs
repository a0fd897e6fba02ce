use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::event::ExecutionEvent;
use crate::types::*;

/// LLM client: one streaming chat completion per call.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Text generation as seen by the execution engine.
///
/// Both calls are treated as opaque functions of their input.
pub trait TextGenerator: Send + Sync + 'static {
    /// Generate free text.
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String>>;

    /// Generate a JSON object for the prompt.
    ///
    /// Fails with `LlmParse` when the model output contains no valid JSON.
    fn generate_structured(&self, prompt: String) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Web search returning a text digest of the results.
pub trait SearchProvider: Send + Sync + 'static {
    fn search(&self, query: String) -> BoxFuture<'_, Result<String>>;
}

/// Receiver of per-node progress events.
///
/// The engine awaits `emit`, so a bounded sink applies backpressure.
/// Implementations must not fail; a consumer that went away is ignored.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ExecutionEvent) -> BoxFuture<'_, ()>;
}
