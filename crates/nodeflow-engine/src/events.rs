//! Event sinks for batch and streaming runs.

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::trace;

use nodeflow_core::event::{ExecutionEvent, RunEvent};
use nodeflow_core::traits::EventSink;

/// Discards every event. Used by batch runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: ExecutionEvent) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Forwards events into a bounded channel.
///
/// A full channel makes the run wait for the consumer. A closed channel
/// is ignored; the run notices through its cancellation token instead.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<RunEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<RunEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ExecutionEvent) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.tx.send(RunEvent::Node(event)).await.is_err() {
                trace!("Event receiver closed");
            }
        })
    }
}
