//! Push-style progress reporting.
//!
//! The orchestrator emits one event per completed action plus a final
//! summary to a sink the caller supplies. Sinks must not block: batch and
//! loop progress never waits for a consumer.

use std::time::Duration;
use uuid::Uuid;

use crate::batch::BatchSummary;
use crate::executor::ActionResult;

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    BatchStarted {
        batch_id: Uuid,
        total: usize,
    },
    ActionCompleted {
        batch_id: Uuid,
        session: String,
        result: ActionResult,
    },
    /// A rate-limit wait is in progress for one session; the action will be
    /// reattempted after `wait`.
    RateLimited {
        batch_id: Uuid,
        session: String,
        wait: Duration,
    },
    /// A dead session was removed from the pool mid-batch.
    SessionRemoved {
        batch_id: Uuid,
        session: String,
    },
    BatchFinished {
        batch_id: Uuid,
        summary: BatchSummary,
    },
    LoopStarted {
        scope: String,
    },
    LoopStopped {
        scope: String,
    },
}

pub trait ProgressSink: Send + Sync {
    fn send(&self, event: ProgressEvent);
}

/// Reports progress through the tracing pipeline. The default sink.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn send(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::BatchStarted { batch_id, total } => {
                tracing::info!(%batch_id, total, "batch started");
            }
            ProgressEvent::ActionCompleted {
                batch_id,
                session,
                result,
            } => {
                tracing::info!(%batch_id, session = %session, result = %result, "action completed");
            }
            ProgressEvent::RateLimited {
                batch_id,
                session,
                wait,
            } => {
                tracing::warn!(%batch_id, session = %session, wait_secs = wait.as_secs(), "rate limited, waiting");
            }
            ProgressEvent::SessionRemoved { batch_id, session } => {
                tracing::warn!(%batch_id, session = %session, "dead session removed from pool");
            }
            ProgressEvent::BatchFinished { batch_id, summary } => {
                tracing::info!(
                    %batch_id,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "batch finished"
                );
            }
            ProgressEvent::LoopStarted { scope } => {
                tracing::info!(scope = %scope, "keep-alive loop started");
            }
            ProgressEvent::LoopStopped { scope } => {
                tracing::info!(scope = %scope, "keep-alive loop stopped");
            }
        }
    }
}

/// Forwards events into an unbounded channel for callers that want the
/// stream (a front-end, a test harness). Send never blocks; events to a
/// dropped receiver are discarded.
pub struct ChannelSink(pub tokio::sync::mpsc::UnboundedSender<ProgressEvent>);

impl ProgressSink for ChannelSink {
    fn send(&self, event: ProgressEvent) {
        let _ = self.0.send(event);
    }
}
