use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeflowError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Search errors
    #[error("Search request failed: {0}")]
    Search(String),

    // Node errors
    #[error("Node {node_id}: {message}")]
    NodeConfig { node_id: String, message: String },

    #[error("Node {node_id}: unknown node type '{node_type}'")]
    UnknownNodeType { node_id: String, node_type: String },

    // Run errors
    #[error("Invalid run: {0}")]
    InvalidRun(String),

    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NodeflowError {
    /// Shorthand for a configuration error attached to a node.
    pub fn node_config(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeConfig {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Whether this error was caused by the node's own input rather than
    /// by a collaborator failing at runtime.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::NodeConfig { .. } | Self::UnknownNodeType { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, NodeflowError>;
