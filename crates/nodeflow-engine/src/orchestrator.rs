//! Drives whole runs: validate, schedule, dispatch each node in order,
//! report progress.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, field, info, instrument, warn, Span};
use uuid::Uuid;

use nodeflow_core::config::AppConfig;
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::event::{EventStatus, ExecutionEvent, RunEvent, StreamError};
use nodeflow_core::node::NodeRecord;
use nodeflow_core::traits::{EventSink, SearchProvider, TextGenerator};

use crate::agent::AgentController;
use crate::context::{NodeFailure, RunContext};
use crate::dispatcher::NodeDispatcher;
use crate::events::{ChannelSink, NoopSink};
use crate::graph::{schedule, DependencyGraph, Schedule};

/// What one completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub schedule: Schedule,
    /// Terminal event of every scheduled node, in execution order.
    pub events: Vec<ExecutionEvent>,
    pub failures: Vec<NodeFailure>,
}

impl RunSummary {
    /// Result text per executed node. Failed nodes contribute their
    /// error message.
    pub fn results(&self) -> Vec<String> {
        self.events.iter().map(|e| e.result.clone()).collect()
    }
}

/// Runs node lists. Cheap to clone; every run gets its own context.
#[derive(Clone)]
pub struct RunOrchestrator {
    dispatcher: Arc<NodeDispatcher>,
    event_buffer: usize,
}

impl RunOrchestrator {
    pub fn new(dispatcher: NodeDispatcher, event_buffer: usize) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            event_buffer: event_buffer.max(1),
        }
    }

    /// Wire the dispatcher and agent controller from application config.
    pub fn from_config(
        generator: Arc<dyn TextGenerator>,
        search: Option<Arc<dyn SearchProvider>>,
        config: &AppConfig,
    ) -> Self {
        let mut agent =
            AgentController::new(generator.clone(), config.personas(), config.agent.clone());
        if let Some(search) = search {
            agent = agent.with_search(search);
        }
        Self::new(
            NodeDispatcher::new(generator, agent),
            config.engine.event_buffer,
        )
    }

    /// Validate the node list and compute its execution order.
    pub fn plan(nodes: &[NodeRecord]) -> Result<Schedule> {
        let mut seen = HashSet::with_capacity(nodes.len());
        if let Some(dup) = nodes.iter().find(|n| !seen.insert(n.id.as_str())) {
            return Err(NodeflowError::InvalidRun(format!(
                "duplicate node id '{}'",
                dup.id
            )));
        }
        Ok(schedule(&DependencyGraph::build(nodes)))
    }

    /// Run `nodes` to completion, reporting every event to `sink`.
    ///
    /// Node failures become `error` events and never stop the run. The run
    /// itself fails only on invalid input or cancellation.
    #[instrument(name = "run", skip_all, fields(nodes = nodes.len(), run_id = field::Empty))]
    pub async fn run(
        &self,
        nodes: &[NodeRecord],
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let plan = Self::plan(nodes)?;
        let mut ctx = RunContext::new();
        Span::current().record("run_id", field::display(ctx.run_id()));
        info!(order = ?plan.order, cyclic = plan.cyclic.len(), "Run started");

        let by_id: HashMap<&str, &NodeRecord> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut events = Vec::with_capacity(plan.order.len());

        for id in &plan.order {
            if cancel.is_cancelled() {
                return Err(NodeflowError::Cancelled);
            }
            let Some(node) = by_id.get(id.as_str()).copied() else {
                continue;
            };

            sink.emit(ExecutionEvent::running(node)).await;
            let event = match self.dispatcher.dispatch(node, &ctx, sink, cancel).await {
                Ok(event) => event,
                Err(NodeflowError::Cancelled) => {
                    info!(node_id = %node.id, "Run cancelled");
                    return Err(NodeflowError::Cancelled);
                }
                Err(e) => {
                    warn!(node_id = %node.id, kind = %node.kind, error = %e, "Node failed");
                    ExecutionEvent::failure(node, e.to_string())
                }
            };

            if event.status == EventStatus::Error {
                let message = event.error.clone().unwrap_or_else(|| event.result.clone());
                ctx.record_failure(&node.id, message);
            } else {
                ctx.record(&node.id, event.result.clone());
            }
            debug!(node_id = %node.id, status = ?event.status, "Node finished");
            sink.emit(event.clone()).await;
            events.push(event);
        }

        info!(
            executed = events.len(),
            failed = ctx.failures().len(),
            "Run finished"
        );
        Ok(RunSummary {
            run_id: ctx.run_id(),
            schedule: plan,
            events,
            failures: ctx.failures().to_vec(),
        })
    }

    /// Batch mode: result text per executed node, in execution order.
    pub async fn run_batch(&self, nodes: &[NodeRecord]) -> Result<Vec<String>> {
        let summary = self
            .run(nodes, &NoopSink, &CancellationToken::new())
            .await?;
        Ok(summary.results())
    }

    /// Streaming mode. The run executes on its own task; dropping the
    /// returned stream cancels it.
    pub fn run_stream(&self, nodes: Vec<NodeRecord>) -> ExecutionStream {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let cancel = CancellationToken::new();
        let stream = ExecutionStream {
            inner: ReceiverStream::new(rx),
            cancel: cancel.clone(),
            _guard: cancel.clone().drop_guard(),
        };

        let this = self.clone();
        tokio::spawn(async move {
            let sink = ChannelSink::new(tx.clone());
            match this.run(&nodes, &sink, &cancel).await {
                Ok(summary) => debug!(run_id = %summary.run_id, "Stream complete"),
                Err(NodeflowError::Cancelled) => debug!("Stream cancelled"),
                Err(e) => {
                    warn!(error = %e, "Run failed before execution");
                    let _ = tx
                        .send(RunEvent::StreamError(StreamError::new(e.to_string())))
                        .await;
                }
            }
        });
        stream
    }
}

/// Ordered events of a streaming run.
pub struct ExecutionStream {
    inner: ReceiverStream<RunEvent>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl ExecutionStream {
    /// Stop the run without dropping the stream.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for ExecutionStream {
    type Item = RunEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RunEvent>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use nodeflow_core::config::AgentConfig;
    use nodeflow_core::node::NodeKind;
    use nodeflow_core::persona::default_personas;
    use nodeflow_test_utils::{
        agent_node, extract_text_node, formatter_node, generative_node, node_with_edge, plain_node,
        MockGenerator, RecordingSink,
    };
    use serde_json::json;
    use std::time::Duration;

    fn orchestrator(gen: Arc<MockGenerator>) -> RunOrchestrator {
        let agent = AgentController::new(gen.clone(), default_personas(), AgentConfig::default());
        RunOrchestrator::new(NodeDispatcher::new(gen, agent), 8)
    }

    #[tokio::test]
    async fn test_batch_runs_in_input_order_without_edges() {
        let orch = orchestrator(Arc::new(MockGenerator::new().on_text("Question", "answer")));
        let nodes = vec![
            extract_text_node("n1", "a.txt", "hello"),
            generative_node("n2", "Why?"),
            formatter_node("n3", "to_upper"),
        ];
        let results = orch.run_batch(&nodes).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].contains("a.txt") && results[0].contains("hello"));
        assert_eq!(results[1], "answer");
        assert_eq!(results[2], "ANSWER");
    }

    #[tokio::test]
    async fn test_edges_reorder_execution() {
        let orch = orchestrator(Arc::new(MockGenerator::new()));
        // b depends on a but is listed first.
        let nodes = vec![node_with_edge("b", "B", "A", "B"), plain_node("a", "A")];
        let summary = orch
            .run(&nodes, &RecordingSink::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.schedule.order, vec!["a", "b"]);
        let ids: Vec<&str> = summary.events.iter().map(|e| e.node_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_cyclic_nodes_run_exactly_once() {
        let orch = orchestrator(Arc::new(MockGenerator::new()));
        let nodes = vec![
            node_with_edge("a", "A", "A", "B"),
            node_with_edge("b", "B", "B", "A"),
            plain_node("c", "C"),
        ];
        let summary = orch
            .run(&nodes, &RecordingSink::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.schedule.order, vec!["c", "a", "b"]);
        assert_eq!(summary.events.len(), 3);
    }

    #[tokio::test]
    async fn test_fresh_runs_do_not_share_results() {
        let orch = orchestrator(Arc::new(MockGenerator::new()));
        let first = orch
            .run_batch(&[extract_text_node("n1", "a.txt", "hello"), formatter_node("n2", "to_upper")])
            .await
            .unwrap();
        assert!(first[1].contains("HELLO"));

        let second = orch.run_batch(&[formatter_node("n2", "to_upper")]).await.unwrap();
        assert_eq!(second, vec![String::new()]);
    }

    #[tokio::test]
    async fn test_node_error_does_not_abort_run() {
        let orch = orchestrator(Arc::new(MockGenerator::new()));
        let nodes = vec![
            extract_text_node("n1", "a.txt", "hello"),
            NodeRecord::new("n2", NodeKind::ExtractText, json!({"file_name": "b.txt"})),
            NodeRecord::new("n3", NodeKind::Unknown("ocr".into()), json!({})),
            formatter_node("n4", "to_upper"),
        ];
        let sink = RecordingSink::new();
        let summary = orch
            .run(&nodes, &sink, &CancellationToken::new())
            .await
            .unwrap();

        let statuses: Vec<EventStatus> = summary.events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![EventStatus::Success, EventStatus::Error, EventStatus::Error, EventStatus::Success]
        );
        assert!(summary.events[1].error.as_deref().unwrap().contains("n2"));
        assert!(summary.events[2].result.contains("ocr"));
        // The formatter reads the last successful result.
        assert!(summary.events[3].result.contains("HELLO"));
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(sink.outcomes().len(), 4);
    }

    #[tokio::test]
    async fn test_generation_failure_is_node_error() {
        let gen = Arc::new(
            MockGenerator::new().on_text_error("Question", || NodeflowError::LlmRequest("HTTP 503".into())),
        );
        let results = orchestrator(gen)
            .run_batch(&[generative_node("n1", "Why?"), formatter_node("n2", "to_lower")])
            .await
            .unwrap();
        assert!(results[0].contains("HTTP 503"));
        assert_eq!(results[1], "");
    }

    #[tokio::test]
    async fn test_duplicate_ids_reject_batch() {
        let orch = orchestrator(Arc::new(MockGenerator::new()));
        let nodes = vec![formatter_node("n1", "to_upper"), formatter_node("n1", "to_lower")];
        match orch.run_batch(&nodes).await {
            Err(NodeflowError::InvalidRun(msg)) => assert!(msg.contains("n1")),
            other => panic!("Expected InvalidRun, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_emits_running_then_terminal() {
        let orch = orchestrator(Arc::new(MockGenerator::new()));
        let events: Vec<RunEvent> = orch
            .run_stream(vec![
                extract_text_node("n1", "a.txt", "hello"),
                formatter_node("n2", "to_upper"),
            ])
            .collect()
            .await;

        let seen: Vec<(String, EventStatus)> = events
            .iter()
            .map(|e| {
                let node = e.as_node().unwrap();
                (node.node_id.clone(), node.status)
            })
            .collect();
        assert_eq!(
            seen,
            vec![
                ("n1".to_string(), EventStatus::Running),
                ("n1".to_string(), EventStatus::Success),
                ("n2".to_string(), EventStatus::Running),
                ("n2".to_string(), EventStatus::Success),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_reports_invalid_run() {
        let orch = orchestrator(Arc::new(MockGenerator::new()));
        let events: Vec<RunEvent> = orch
            .run_stream(vec![formatter_node("n1", "to_upper"), formatter_node("n1", "to_upper")])
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            RunEvent::StreamError(err) => {
                assert_eq!(err.status, EventStatus::Error);
                assert!(err.message.contains("duplicate node id"));
            }
            other => panic!("Expected a stream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_agent_progress_is_streamed() {
        let gen = Arc::new(MockGenerator::new().on_structured("task plan", json!({"tasks": []})));
        let events: Vec<RunEvent> = orchestrator(gen)
            .run_stream(vec![agent_node("n1", "Summarize")])
            .collect()
            .await;
        let nodes: Vec<&ExecutionEvent> = events.iter().filter_map(RunEvent::as_node).collect();
        assert!(nodes.len() > 2);
        assert!(nodes[..nodes.len() - 1].iter().all(|e| e.status == EventStatus::Running));
        assert_eq!(nodes.last().unwrap().status, EventStatus::MaxIterations);
        assert!(nodes.last().unwrap().error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stream_cancels_run() {
        let gen = Arc::new(
            MockGenerator::new()
                .on_structured("task plan", json!({"tasks": [{"description": "Draft"}]}))
                .with_delay(Duration::from_secs(10)),
        );
        let orch = orchestrator(gen.clone());
        let mut stream = orch.run_stream(vec![agent_node("n1", "Summarize"), generative_node("n2", "Why?")]);

        let first = stream.next().await.unwrap();
        assert_eq!(first.as_node().unwrap().status, EventStatus::Running);
        drop(stream);

        tokio::time::sleep(Duration::from_secs(600)).await;
        // At most the in-flight plan call was issued; no task or later node ran.
        assert!(gen.calls().len() <= 1);
        assert_eq!(gen.text_calls(), 0);
    }
}
