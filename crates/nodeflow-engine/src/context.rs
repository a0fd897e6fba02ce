use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

/// A node that ended in an error outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeFailure {
    pub node_id: String,
    pub message: String,
}

/// Per-run state shared by the nodes of one run.
///
/// Results are write-once and remember insertion order; the most recent
/// result is the implicit input of nodes that read ambient context.
/// A fresh context is created for every run.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    results: Vec<(String, String)>,
    index: HashMap<String, usize>,
    failures: Vec<NodeFailure>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            results: Vec::new(),
            index: HashMap::new(),
            failures: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Record a node's result. Returns `false` and keeps the first value
    /// if the node already has one.
    pub fn record(&mut self, node_id: impl Into<String>, text: impl Into<String>) -> bool {
        let node_id = node_id.into();
        if self.index.contains_key(&node_id) {
            warn!(node_id = %node_id, "Ignoring second result for node");
            return false;
        }
        self.index.insert(node_id.clone(), self.results.len());
        self.results.push((node_id, text.into()));
        true
    }

    pub fn record_failure(&mut self, node_id: impl Into<String>, message: impl Into<String>) {
        self.failures.push(NodeFailure {
            node_id: node_id.into(),
            message: message.into(),
        });
    }

    pub fn get(&self, node_id: &str) -> Option<&str> {
        self.index
            .get(node_id)
            .map(|&i| self.results[i].1.as_str())
    }

    /// The most recently recorded result.
    pub fn latest(&self) -> Option<&str> {
        self.results.last().map(|(_, text)| text.as_str())
    }

    /// Results in the order they were recorded.
    pub fn results(&self) -> impl Iterator<Item = (&str, &str)> {
        self.results.iter().map(|(id, text)| (id.as_str(), text.as_str()))
    }

    pub fn failures(&self) -> &[NodeFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_follows_insertion_order() {
        let mut ctx = RunContext::new();
        assert!(ctx.latest().is_none());
        ctx.record("n2", "second");
        ctx.record("n1", "first");
        assert_eq!(ctx.latest(), Some("first"));
        let ids: Vec<&str> = ctx.results().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["n2", "n1"]);
    }

    #[test]
    fn test_results_are_write_once() {
        let mut ctx = RunContext::new();
        assert!(ctx.record("n1", "a"));
        assert!(!ctx.record("n1", "b"));
        assert_eq!(ctx.get("n1"), Some("a"));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_failures_do_not_become_results() {
        let mut ctx = RunContext::new();
        ctx.record("n1", "ok");
        ctx.record_failure("n2", "boom");
        assert_eq!(ctx.latest(), Some("ok"));
        assert_eq!(ctx.failures()[0].node_id, "n2");
        assert!(ctx.get("n2").is_none());
    }

    #[test]
    fn test_fresh_contexts_are_independent() {
        let mut a = RunContext::new();
        a.record("n1", "x");
        let b = RunContext::new();
        assert!(b.is_empty());
        assert_ne!(a.run_id(), b.run_id());
    }
}
