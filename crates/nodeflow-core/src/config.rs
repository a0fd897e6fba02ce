use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NodeflowError, Result};
use crate::persona::{default_personas, Persona};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    /// Models tried in order after the primary fails with a retryable error.
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub agent: AgentConfig,
    /// Review personas. Empty means the built-in table.
    #[serde(default)]
    pub personas: Vec<Persona>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub web_search: Option<WebSearchConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_model_id() -> String { "gpt-4o-mini".to_string() }
fn default_max_tokens() -> u32 { 2048 }
fn default_temperature() -> f32 { 0.7 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Bounds for the agent node's plan/execute/review loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_improvement_cycles")]
    pub max_improvement_cycles: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Aggregated review score at which the loop stops with success.
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_improvement_cycles: default_max_improvement_cycles(),
            timeout_secs: default_timeout_secs(),
            min_success_rate: default_min_success_rate(),
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_max_iterations() -> u32 { 2 }
fn default_max_improvement_cycles() -> u32 { 2 }
fn default_timeout_secs() -> u64 { 300 }
fn default_min_success_rate() -> f64 { 0.7 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the streaming event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_event_buffer() -> usize { 64 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default = "default_search_provider")]
    pub provider: String,
    pub api_key: String,
    #[serde(default = "default_search_max_results")]
    pub max_results: u32,
}

const REDACTED: &str = "********";

fn default_search_provider() -> String { "tavily".to_string() }
fn default_search_max_results() -> u32 { 5 }

impl AppConfig {
    /// Load config from a TOML file, expanding `${ENV_VAR}` references.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| NodeflowError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| NodeflowError::Config(e.to_string()))?;
        config.validate()?;
        debug!(path = %path.display(), personas = config.personas.len(), "Loaded config");
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.agent.min_success_rate) {
            return Err(NodeflowError::Config(format!(
                "agent.min_success_rate must be within [0, 1], got {}",
                self.agent.min_success_rate
            )));
        }
        if self.engine.event_buffer == 0 {
            return Err(NodeflowError::Config(
                "engine.event_buffer must be at least 1".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for persona in &self.personas {
            if !seen.insert(persona.id.as_str()) {
                return Err(NodeflowError::Config(format!(
                    "duplicate persona id '{}'",
                    persona.id
                )));
            }
        }
        Ok(())
    }

    /// Copy with every credential replaced by a placeholder, for display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        let models = std::iter::once(&mut config.model).chain(config.fallback_models.iter_mut());
        for model in models {
            if let Some(key) = model.api_key.as_mut() {
                *key = REDACTED.to_string();
            }
        }
        if let Some(search) = config.web_search.as_mut() {
            search.api_key = REDACTED.to_string();
        }
        config
    }

    /// The persona table in effect: configured personas, or the built-in set.
    pub fn personas(&self) -> Vec<Persona> {
        if self.personas.is_empty() {
            default_personas()
        } else {
            self.personas.clone()
        }
    }
}

/// Expand `${VAR}` references. Unset variables are left as written.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' || chars.peek() != Some(&'{') {
            result.push(c);
            continue;
        }
        chars.next();
        let name: String = chars.by_ref().take_while(|&c| c != '}').collect();
        match std::env::var(&name) {
            Ok(val) => result.push_str(&val),
            Err(_) => {
                result.push_str("${");
                result.push_str(&name);
                result.push('}');
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_NODEFLOW_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_NODEFLOW_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_NODEFLOW_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_NODEFLOW_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_NODEFLOW_VAR}\"");
    }

    #[test]
    fn test_lone_dollar_is_kept() {
        assert_eq!(expand_env_vars("cost = \"$5\""), "cost = \"$5\"");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.model.model_id, "gpt-4o-mini");
        assert_eq!(config.agent.max_iterations, 2);
        assert_eq!(config.agent.max_improvement_cycles, 2);
        assert_eq!(config.agent.timeout_secs, 300);
        assert!((config.agent.min_success_rate - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.engine.event_buffer, 64);
        assert!(config.web_search.is_none());
        assert_eq!(config.personas().len(), 4);
    }

    #[test]
    fn test_configured_personas_replace_defaults() {
        let toml_str = r#"
[[personas]]
id = "security_reviewer"
role = "Reviews for security issues"
focus_areas = ["input validation"]

[[personas]]
id = "summarizer"
role = "Summarizes the result"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let personas = config.personas();
        assert_eq!(personas.len(), 2);
        assert_eq!(personas[0].id, "security_reviewer");
        assert!(personas[0].evaluation_criteria.is_empty());
    }

    #[test]
    fn test_validate_rejects_out_of_range_success_rate() {
        let mut config = AppConfig::default();
        config.agent.min_success_rate = 1.5;
        match config.validate() {
            Err(NodeflowError::Config(msg)) => assert!(msg.contains("min_success_rate")),
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_redacted_hides_keys() {
        let toml_str = r#"
[model]
api_key = "sk-primary"

[[fallback_models]]
provider = "anthropic"
api_key = "sk-fallback"

[[fallback_models]]
provider = "ollama"

[web_search]
api_key = "tvly-secret"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let shown = config.redacted();
        assert_eq!(shown.model.api_key.as_deref(), Some("********"));
        assert_eq!(shown.fallback_models[0].api_key.as_deref(), Some("********"));
        assert!(shown.fallback_models[1].api_key.is_none());
        assert_eq!(shown.web_search.as_ref().unwrap().api_key, "********");

        let rendered = toml::to_string_pretty(&shown).unwrap();
        assert!(!rendered.contains("sk-primary"));
        assert!(!rendered.contains("sk-fallback"));
        assert!(!rendered.contains("tvly-secret"));
        assert_eq!(config.model.api_key.as_deref(), Some("sk-primary"));
    }

    #[test]
    fn test_validate_rejects_duplicate_personas() {
        let mut config = AppConfig::default();
        config.personas = vec![default_personas()[0].clone(), default_personas()[0].clone()];
        assert!(config.validate().is_err());
    }
}
