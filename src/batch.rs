//! Bounded fan-out of one action over many sessions.
//!
//! A batch call never raises past its boundary: every per-session outcome
//! is classified and folded into the aggregate counts, and the batch always
//! completes with a summary even when every session fails. Worker tasks
//! return their own outcome and the coordinator merges them after each
//! join; there are no shared mutable counters.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::SessionRecord;
use crate::executor::{Action, ActionExecutor, ActionResult, SessionGuard};
use crate::pool::SessionPool;
use crate::progress::{ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Cap on actions in flight at once; also the chunk size in parallel
    /// mode. The reference behavior used 3.
    pub max_concurrency: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Pace with `uniform(min_delay, max_delay)` instead of `min_delay`.
    pub randomize: bool,
    /// Chunked concurrent dispatch when set; strictly sequential otherwise.
    pub parallel: bool,
    /// Stop issuing new actions once this many have succeeded; in-flight
    /// actions still finish, never-attempted sessions count as skipped.
    pub target_count: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            min_delay: Duration::from_secs(5 * 60),
            max_delay: Duration::from_secs(10 * 60),
            randomize: true,
            parallel: false,
            target_count: None,
        }
    }
}

impl BatchConfig {
    pub fn from_settings(settings: &crate::config::OrchestratorSettings) -> Self {
        Self {
            max_concurrency: settings.max_concurrency,
            min_delay: settings.min_delay,
            max_delay: settings.max_delay,
            ..Default::default()
        }
    }

    fn normalized(mut self) -> Self {
        self.max_concurrency = self.max_concurrency.max(1);
        self.max_delay = self.max_delay.max(self.min_delay);
        self
    }
}

/// Aggregate result of one batch call.
/// `succeeded + failed + skipped` equals the number of sessions considered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchSummary {
    pub fn considered(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    fn absorb(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Succeeded => self.succeeded += 1,
            Disposition::Failed => self.failed += 1,
            Disposition::Skipped => self.skipped += 1,
        }
    }

    fn target_reached(&self, cfg: &BatchConfig) -> bool {
        cfg.target_count
            .is_some_and(|target| self.succeeded >= target)
    }
}

#[derive(Debug, Clone, Copy)]
enum Disposition {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Clone)]
pub struct BatchRunner {
    executor: Arc<ActionExecutor>,
    pool: SessionPool,
    guard: Arc<SessionGuard>,
}

impl BatchRunner {
    pub fn new(executor: Arc<ActionExecutor>, pool: SessionPool, guard: Arc<SessionGuard>) -> Self {
        Self {
            executor,
            pool,
            guard,
        }
    }

    /// Fan `action` out over `sessions` under `cfg`.
    ///
    /// Parallel mode dispatches chunks of `max_concurrency` sessions and
    /// joins each chunk before dispatching the next, so a slow chunk delays
    /// its successor; a semaphore additionally caps in-flight actions.
    pub async fn run(
        &self,
        sessions: Vec<SessionRecord>,
        action: Action,
        cfg: BatchConfig,
        sink: Arc<dyn ProgressSink>,
    ) -> BatchSummary {
        let cfg = cfg.normalized();
        let batch_id = Uuid::new_v4();
        sink.send(ProgressEvent::BatchStarted {
            batch_id,
            total: sessions.len(),
        });

        let action = Arc::new(action);
        let semaphore = Arc::new(Semaphore::new(cfg.max_concurrency));
        let mut summary = BatchSummary::default();

        if cfg.parallel {
            let chunks: Vec<Vec<SessionRecord>> = sessions
                .chunks(cfg.max_concurrency)
                .map(<[SessionRecord]>::to_vec)
                .collect();

            for chunk in chunks {
                if summary.target_reached(&cfg) {
                    summary.skipped += chunk.len();
                    continue;
                }

                let mut set = JoinSet::new();
                for session in chunk {
                    set.spawn(drive_session(
                        self.clone(),
                        Arc::clone(&semaphore),
                        session,
                        Arc::clone(&action),
                        cfg,
                        batch_id,
                        Arc::clone(&sink),
                    ));
                }
                while let Some(joined) = set.join_next().await {
                    match joined {
                        Ok(disposition) => summary.absorb(disposition),
                        Err(e) => {
                            warn!(%batch_id, error = %e, "batch worker aborted");
                            summary.failed += 1;
                        }
                    }
                }
            }
        } else {
            for session in sessions {
                if summary.target_reached(&cfg) {
                    summary.skipped += 1;
                    continue;
                }
                let disposition = drive_session(
                    self.clone(),
                    Arc::clone(&semaphore),
                    session,
                    Arc::clone(&action),
                    cfg,
                    batch_id,
                    Arc::clone(&sink),
                )
                .await;
                summary.absorb(disposition);
            }
        }

        sink.send(ProgressEvent::BatchFinished {
            batch_id,
            summary: summary.clone(),
        });
        summary
    }
}

/// Drive one session to a terminal result.
///
/// `RateLimited` is the one non-terminal result: the signaled wait governs
/// the delay (not the configured pacing) and the action is reattempted.
/// `SessionInvalid` cascades a pool delete so the session cannot re-fail a
/// later batch.
async fn drive_session(
    runner: BatchRunner,
    semaphore: Arc<Semaphore>,
    session: SessionRecord,
    action: Arc<Action>,
    cfg: BatchConfig,
    batch_id: Uuid,
    sink: Arc<dyn ProgressSink>,
) -> Disposition {
    let Some(_claim) = runner.guard.try_claim(&session.id) else {
        debug!(session = %session.label, "already driven by another batch or loop, skipping");
        return Disposition::Skipped;
    };

    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return Disposition::Skipped,
    };

    let result = loop {
        let result = runner.executor.execute(&session, &action).await;
        match result {
            ActionResult::RateLimited(wait) => {
                sink.send(ProgressEvent::RateLimited {
                    batch_id,
                    session: session.label.clone(),
                    wait,
                });
                tokio::time::sleep(wait).await;
            }
            terminal => break terminal,
        }
    };

    let disposition = match &result {
        ActionResult::Success | ActionResult::AlreadyInTargetState => Disposition::Succeeded,
        ActionResult::SessionInvalid => {
            match runner.pool.delete(session.id.clone()).await {
                Ok(()) => sink.send(ProgressEvent::SessionRemoved {
                    batch_id,
                    session: session.label.clone(),
                }),
                Err(e) => {
                    warn!(session = %session.label, error = %e, "failed to remove dead session")
                }
            }
            Disposition::Failed
        }
        _ => Disposition::Failed,
    };

    sink.send(ProgressEvent::ActionCompleted {
        batch_id,
        session: session.label.clone(),
        result,
    });

    // Pacing runs inside the held slot: the slot is not handed to the next
    // session until the interval elapses.
    tokio::time::sleep(pacing_interval(&cfg)).await;

    disposition
}

fn pacing_interval(cfg: &BatchConfig) -> Duration {
    if cfg.randomize && cfg.max_delay > cfg.min_delay {
        let span = (cfg.max_delay - cfg.min_delay).as_millis() as u64;
        let offset = rand::thread_rng().gen_range(0..=span);
        cfg.min_delay + Duration::from_millis(offset)
    } else {
        cfg.min_delay
    }
}
