//! Node records as supplied by the caller, and the typed configuration
//! each node kind reads out of its free-form `config` object.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NodeflowError, Result};

/// Processing step type.
///
/// Unrecognised type strings are kept as `Unknown` so the run can report
/// them as a per-node configuration error instead of rejecting the whole
/// node list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    ExtractText,
    GenerativeAi,
    Formatter,
    Agent,
    Unknown(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ExtractText => "extract_text",
            Self::GenerativeAi => "generative_ai",
            Self::Formatter => "formatter",
            Self::Agent => "agent",
            Self::Unknown(other) => other,
        }
    }
}

impl From<String> for NodeKind {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "extract_text" => Self::ExtractText,
            "generative_ai" => Self::GenerativeAi,
            "formatter" => Self::Formatter,
            "agent" => Self::Agent,
            _ => Self::Unknown(s),
        }
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of a run's input list. Read-only for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Unique within a run.
    pub id: String,
    #[serde(rename = "node_type", alias = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub config: Value,
}

/// A `source -> target` pair of edge-local ids (`config.node.id` values).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDescriptor {
    pub source: String,
    pub target: String,
}

impl NodeRecord {
    pub fn new(id: impl Into<String>, kind: NodeKind, config: Value) -> Self {
        Self {
            id: id.into(),
            kind,
            config,
        }
    }

    /// The edge-local id declared at `config.node.id`, if any.
    pub fn config_node_id(&self) -> Option<&str> {
        self.config.get("node")?.get("id")?.as_str()
    }

    /// Edge descriptors embedded in this node's config.
    ///
    /// Reads `config.edge` and every element of `config.edges`.
    /// Entries that are not `{source, target}` string pairs are skipped.
    pub fn edge_descriptors(&self) -> Vec<EdgeDescriptor> {
        let single = self.config.get("edge").into_iter();
        let listed = self
            .config
            .get("edges")
            .and_then(Value::as_array)
            .into_iter()
            .flatten();
        single
            .chain(listed)
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    /// Deserialize `config` into the typed configuration for this node.
    pub fn typed_config<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.config.clone())
            .map_err(|e| NodeflowError::node_config(&self.id, e.to_string()))
    }
}

/// Configuration of an `extract_text` node.
///
/// The text may arrive as `extracted_text` or `extract_text`; when both are
/// present `extracted_text` is used.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawExtractTextConfig")]
pub struct ExtractTextConfig {
    pub file_name: String,
    pub extracted_text: String,
    pub file_type: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(Deserialize)]
struct RawExtractTextConfig {
    file_name: String,
    #[serde(default)]
    extracted_text: Option<String>,
    #[serde(default)]
    extract_text: Option<String>,
    #[serde(default)]
    file_type: Option<String>,
    #[serde(default)]
    file_size: Option<u64>,
}

impl TryFrom<RawExtractTextConfig> for ExtractTextConfig {
    type Error = String;

    fn try_from(raw: RawExtractTextConfig) -> std::result::Result<Self, String> {
        let extracted_text = raw
            .extracted_text
            .or(raw.extract_text)
            .ok_or_else(|| "missing field `extracted_text`".to_string())?;
        Ok(Self {
            file_name: raw.file_name,
            extracted_text,
            file_type: raw.file_type,
            file_size: raw.file_size,
        })
    }
}

/// Configuration of a `generative_ai` node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenerativeAiConfig {
    pub prompt: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_model() -> String { "gpt-4o-mini".to_string() }
fn default_temperature() -> f32 { 0.7 }

/// Configuration of a `formatter` node.
///
/// `operation` stays a string: an unrecognised operation is not an error.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FormatterConfig {
    pub operation: String,
    #[serde(default)]
    pub kana: Option<bool>,
    #[serde(default)]
    pub digit: Option<bool>,
    #[serde(default)]
    pub ascii: Option<bool>,
}

/// Configuration of an `agent` node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentNodeConfig {
    pub goal: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub capabilities: BTreeMap<String, bool>,
    #[serde(default)]
    pub behavior: BTreeMap<String, f64>,
}

impl AgentNodeConfig {
    /// Names of the capabilities switched on.
    pub fn enabled_capabilities(&self) -> Vec<&str> {
        self.capabilities
            .iter()
            .filter(|(_, on)| **on)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.get(name).copied().unwrap_or(false)
    }
}
