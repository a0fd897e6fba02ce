pub mod agent;
pub mod context;
pub mod dispatcher;
pub mod events;
pub mod formatter;
pub mod graph;
pub mod orchestrator;

pub use agent::{AgentController, AgentOutcome};
pub use context::{NodeFailure, RunContext};
pub use dispatcher::NodeDispatcher;
pub use events::{ChannelSink, NoopSink};
pub use graph::{DependencyGraph, Schedule};
pub use orchestrator::{ExecutionStream, RunOrchestrator, RunSummary};

use std::future::Future;

use nodeflow_core::error::{NodeflowError, Result};
use tokio_util::sync::CancellationToken;

/// Run `call` unless `cancel` fires first.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        result = call => result,
        _ = cancel.cancelled() => Err(NodeflowError::Cancelled),
    }
}
