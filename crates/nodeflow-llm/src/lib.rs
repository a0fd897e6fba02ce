pub mod generator;
pub mod providers;
pub mod retry;
pub mod search;
pub mod streaming;

use std::sync::Arc;

use nodeflow_core::config::AppConfig;
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::{LlmClient, SearchProvider};

pub use generator::LlmGenerator;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;
pub use search::TavilySearch;

/// Create an LLM client for the provider name.
///
/// Every supported provider speaks the OpenAI chat completions protocol.
pub fn create_client(provider: &str) -> Result<Box<dyn LlmClient>> {
    match provider {
        "openai" | "azure-openai" | "ollama" | "vllm" | "groq" | "openrouter" | "together"
        | "deepseek" | "lmstudio" => Ok(Box::new(OpenAiClient::new())),
        other => Err(NodeflowError::UnsupportedProvider(other.to_string())),
    }
}

/// Build the text generator described by the config: primary model with
/// retries, then fallback models.
pub fn build_generator(config: &AppConfig) -> Result<LlmGenerator> {
    let primary = create_client(&config.model.provider)?;
    let fallbacks = config
        .fallback_models
        .iter()
        .map(|m| Ok((m.clone(), create_client(&m.provider)?)))
        .collect::<Result<Vec<_>>>()?;
    let retry = config.model.retry.clone().unwrap_or_default();
    let client: Arc<dyn LlmClient> = Arc::new(RetryingClient::new(primary, fallbacks, retry));
    Ok(LlmGenerator::new(client, config.model.clone()))
}

/// Build the web search provider, if one is configured.
pub fn build_search(config: &AppConfig) -> Result<Option<Arc<dyn SearchProvider>>> {
    match &config.web_search {
        Some(ws) => Ok(Some(Arc::new(TavilySearch::from_config(ws)?))),
        None => Ok(None),
    }
}
