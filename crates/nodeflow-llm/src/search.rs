use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use nodeflow_core::config::WebSearchConfig;
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::SearchProvider;

const TAVILY_API_URL: &str = "https://api.tavily.com/search";

/// Web search backed by the Tavily API.
pub struct TavilySearch {
    api_key: String,
    max_results: u32,
    http: reqwest::Client,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>, max_results: u32) -> Self {
        Self {
            api_key: api_key.into(),
            max_results,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &WebSearchConfig) -> Result<Self> {
        match config.provider.as_str() {
            "tavily" => Ok(Self::new(config.api_key.clone(), config.max_results)),
            other => Err(NodeflowError::Config(format!(
                "unsupported web search provider '{}'",
                other
            ))),
        }
    }
}

#[derive(Deserialize, Default)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    url: String,
}

fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results found.".into();
    }
    hits.iter()
        .map(|h| format!("**{}**\n{}\nURL: {}", h.title, h.content, h.url))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

impl SearchProvider for TavilySearch {
    fn search(&self, query: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            debug!(query = %query, "Web search");
            let resp = self
                .http
                .post(TAVILY_API_URL)
                .json(&json!({
                    "api_key": self.api_key,
                    "query": query,
                    "max_results": self.max_results,
                }))
                .send()
                .await
                .map_err(|e| NodeflowError::Search(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(NodeflowError::Search(format!("HTTP {}", resp.status())));
            }

            let body: SearchResponse = resp
                .json()
                .await
                .map_err(|e| NodeflowError::Search(e.to_string()))?;

            Ok(format_hits(&body.results))
        })
    }
}
