//! Progress events produced while a run executes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::{NodeKind, NodeRecord};

/// Node outcome or progress marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Success,
    Error,
    Running,
    Timeout,
    MaxIterations,
    MaxImprovementCycles,
}

impl EventStatus {
    /// Every status except `Running` ends a node.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// A single line of a node's execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub step: String,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(step: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            result: result.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Progress or outcome of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub node_id: String,
    pub node_type: NodeKind,
    pub status: EventStatus,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_log: Vec<LogEntry>,
    /// Structured payload of terminal agent events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionEvent {
    pub fn new(node: &NodeRecord, status: EventStatus, result: impl Into<String>) -> Self {
        Self {
            node_id: node.id.clone(),
            node_type: node.kind.clone(),
            status,
            result: result.into(),
            error: None,
            execution_log: Vec::new(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn running(node: &NodeRecord) -> Self {
        Self::new(node, EventStatus::Running, "")
    }

    pub fn success(node: &NodeRecord, result: impl Into<String>) -> Self {
        Self::new(node, EventStatus::Success, result)
    }

    /// Node-level failure. The message doubles as the result text.
    pub fn failure(node: &NodeRecord, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut event = Self::new(node, EventStatus::Error, message.clone());
        event.error = Some(message);
        event
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_log(mut self, log: Vec<LogEntry>) -> Self {
        self.execution_log = log;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// The run failed before any node event could be produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamError {
    pub status: EventStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl StreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: EventStatus::Error,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Item of a streaming run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    Node(ExecutionEvent),
    StreamError(StreamError),
}

impl RunEvent {
    pub fn as_node(&self) -> Option<&ExecutionEvent> {
        match self {
            Self::Node(event) => Some(event),
            Self::StreamError(_) => None,
        }
    }
}

impl From<ExecutionEvent> for RunEvent {
    fn from(event: ExecutionEvent) -> Self {
        Self::Node(event)
    }
}
