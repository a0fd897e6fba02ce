//! Task plans and task results returned by the model.
//!
//! Model output is loosely shaped, so fields accept either a string or a
//! list and fall back to empty values when absent.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// Accept a list of strings, a single string, or anything else rendered as text.
pub(crate) fn lenient_strings<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.into_iter().map(value_text).collect(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        other => vec![value_text(other)],
    })
}

/// Accept a string or render any other value as text.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        other => value_text(other),
    })
}

fn value_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub resources: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub dependencies: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub expected_result: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    #[serde(default)]
    pub tasks: Vec<PlannedTask>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub fallback_plans: Vec<String>,
}

impl TaskPlan {
    /// Read a plan from the model response; `None` or a malformed
    /// response yields an empty plan.
    pub fn from_response(response: Option<Value>) -> Self {
        let Some(value) = response else {
            return Self::default();
        };
        serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(error = %e, "Malformed task plan, continuing with an empty plan");
            Self::default()
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    #[default]
    Failure,
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = lenient_string(deserializer)?;
        Ok(match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "succeeded" | "completed" | "done" => Self::Success,
            _ => Self::Failure,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, deserialize_with = "lenient_string")]
    pub output: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub error: String,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub next_steps: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub assumptions: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub verification_needed: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub sources: Vec<String>,
}

impl TaskResult {
    /// Stand-in for a response that could not be read.
    pub fn invalid() -> Self {
        Self {
            status: TaskStatus::Failure,
            output: String::new(),
            error: "Invalid response format".into(),
            next_steps: Vec::new(),
            assumptions: Vec::new(),
            verification_needed: Vec::new(),
            sources: Vec::new(),
        }
    }

    pub fn from_response(response: Option<Value>) -> Self {
        let Some(value) = response else {
            return Self::invalid();
        };
        serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(error = %e, "Malformed task result");
            Self::invalid()
        })
    }

    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Success
    }

    /// One-line summary for the execution log.
    pub fn log_line(&self) -> String {
        match self.status {
            TaskStatus::Success => self.output.clone(),
            TaskStatus::Failure if self.error.is_empty() => "failed".into(),
            TaskStatus::Failure => format!("failed: {}", self.error),
        }
    }
}
