use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use tracing::{debug, warn};

use nodeflow_core::config::ModelConfig;
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::{LlmClient, TextGenerator};
use nodeflow_core::types::*;

const JSON_SYSTEM_PROMPT: &str =
    "You are a precise assistant. Respond with ONLY a single valid JSON object and no other text.";

/// Adapts a streaming [`LlmClient`] into the engine's [`TextGenerator`].
pub struct LlmGenerator {
    client: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl LlmGenerator {
    pub fn new(client: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { client, config }
    }

    /// Model settings for one request, with per-request overrides applied.
    fn request_config(&self, request: &GenerationRequest) -> ModelConfig {
        let mut config = self.config.clone();
        if let Some(model) = &request.model {
            config.model_id = model.clone();
        }
        if let Some(temperature) = request.temperature {
            config.temperature = temperature;
        }
        if let Some(max_tokens) = request.max_tokens {
            config.max_tokens = max_tokens;
        }
        config
    }

    async fn complete(&self, request: GenerationRequest) -> Result<String> {
        let config = self.request_config(&request);
        let mut stream = self.client.chat_stream(&config, request.messages()).await?;

        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::TextDelta(chunk) => text.push_str(&chunk),
                StreamDelta::Stop(StopReason::MaxTokens) => {
                    warn!(model = %config.model_id, "Completion truncated at max_tokens");
                }
                StreamDelta::Stop(StopReason::EndTurn) => {}
                StreamDelta::Usage {
                    input_tokens,
                    output_tokens,
                } => debug!(input_tokens, output_tokens, "Token usage"),
            }
        }
        Ok(text)
    }
}

impl TextGenerator for LlmGenerator {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(self.complete(request))
    }

    fn generate_structured(&self, prompt: String) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let request = GenerationRequest::new(prompt).with_system(JSON_SYSTEM_PROMPT);
            let text = self.complete(request).await?;
            parse_json_object(&text)
        })
    }
}

/// Parse the JSON object embedded in a model response.
pub fn parse_json_object(text: &str) -> Result<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(extract_json(text))
        .map_err(|e| NodeflowError::LlmParse(e.to_string()))?;
    if !value.is_object() {
        return Err(NodeflowError::LlmParse(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }
    Ok(value)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Strip code fences or surrounding prose from a JSON answer.
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let after = &trimmed[start + fence.len()..];
            if let Some(end) = after.find("```") {
                return after[..end].trim();
            }
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}
