//! The activity-window keep-alive loop.
//!
//! An indefinitely running background task that, while the local time is
//! inside the configured window, fires a presence keep-alive for every
//! active session in scope once per period, and outside the window sleeps
//! until the window next opens. The loop only ends through cancellation;
//! no single session's failure can take it down.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::db::{Db, QueryBuilder, SessionRecord};
use crate::executor::{Action, ActionExecutor, ActionResult, SessionGuard};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::registry::{LoopScope, ScopeTarget};
use crate::window::ActivityWindow;

/// Handle to a running loop. Owned by the cancellation registry.
pub struct LoopHandle {
    scope: LoopScope,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LoopHandle {
    pub fn scope(&self) -> &LoopScope {
        &self.scope
    }

    /// Request cooperative cancellation. Takes effect at the loop's next
    /// suspension point; in-flight keep-alives are not aborted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Sessions a loop scope currently ranges over. Re-resolved on every tick
/// so deletions and `mark_inactive` take effect without restarting the loop.
pub async fn resolve_scope_sessions(
    db: &Db,
    scope: &LoopScope,
) -> anyhow::Result<Vec<SessionRecord>> {
    match &scope.target {
        ScopeTarget::AllSessions => QueryBuilder::list_sessions(db, scope.user_id).await,
        ScopeTarget::Flow(flow_id) => QueryBuilder::flow_sessions(db, flow_id.clone()).await,
    }
}

#[derive(Clone)]
pub struct KeepAliveScheduler {
    db: Db,
    executor: Arc<ActionExecutor>,
    guard: Arc<SessionGuard>,
}

impl KeepAliveScheduler {
    pub fn new(db: Db, executor: Arc<ActionExecutor>, guard: Arc<SessionGuard>) -> Self {
        Self {
            db,
            executor,
            guard,
        }
    }

    /// Spawn the loop and hand back its handle. The handle must be given
    /// to the registry; dropping it leaks a running loop.
    pub fn start(
        &self,
        scope: LoopScope,
        window: ActivityWindow,
        period: Duration,
        sink: Arc<dyn ProgressSink>,
    ) -> LoopHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            self.clone(),
            scope.clone(),
            window,
            period,
            cancel.clone(),
            sink,
        ));

        LoopHandle {
            scope,
            cancel,
            task,
        }
    }
}

async fn run_loop(
    scheduler: KeepAliveScheduler,
    scope: LoopScope,
    window: ActivityWindow,
    period: Duration,
    cancel: CancellationToken,
    sink: Arc<dyn ProgressSink>,
) {
    sink.send(ProgressEvent::LoopStarted {
        scope: scope.to_string(),
    });

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let now = chrono::Local::now().naive_local();
        if window.contains(now) {
            match resolve_scope_sessions(&scheduler.db, &scope).await {
                Ok(sessions) => {
                    for session in sessions.into_iter().filter(|s| s.is_active) {
                        spawn_keepalive(
                            Arc::clone(&scheduler.executor),
                            Arc::clone(&scheduler.guard),
                            session,
                        );
                    }
                }
                Err(e) => warn!(scope = %scope, error = %e, "failed to resolve scope sessions"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }
        } else {
            let delay = window.until_next_start(now);
            debug!(
                scope = %scope,
                sleep_secs = delay.as_secs(),
                "outside activity window"
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    sink.send(ProgressEvent::LoopStopped {
        scope: scope.to_string(),
    });
}

/// One fire-and-forget keep-alive. Failures are logged and discarded; they
/// never reach the loop.
fn spawn_keepalive(executor: Arc<ActionExecutor>, guard: Arc<SessionGuard>, session: SessionRecord) {
    tokio::spawn(async move {
        let Some(_claim) = guard.try_claim(&session.id) else {
            debug!(session = %session.label, "busy elsewhere, keep-alive tick skipped");
            return;
        };

        match executor.execute(&session, &Action::ToggleOnline).await {
            ActionResult::Success | ActionResult::AlreadyInTargetState => {
                debug!(session = %session.label, "keep-alive ok");
            }
            result => {
                warn!(session = %session.label, result = %result, "keep-alive failed, discarded");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::TracingSink;
    use chrono::Timelike;

    fn always_open() -> ActivityWindow {
        ActivityWindow::parse("00:00-00:00").unwrap()
    }

    /// A window that opens roughly two hours from the current wall-clock
    /// time, so "now" is reliably outside it.
    fn closed_for_hours() -> ActivityWindow {
        let now = chrono::Local::now().naive_local();
        let start = (now.hour() + 2) % 24;
        let end = (now.hour() + 3) % 24;
        ActivityWindow::parse(&format!("{:02}:00-{:02}:00", start, end)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_wakeup_fires_nothing() {
        let env = crate::testing::test_env(1, 3).await;
        let scheduler =
            KeepAliveScheduler::new(env.db.clone(), env.executor.clone(), env.guard.clone());

        let handle = scheduler.start(
            LoopScope::all_sessions(1),
            always_open(),
            Duration::from_secs(60),
            Arc::new(TracingSink),
        );
        // Cancel before the spawned loop has had a chance to run.
        handle.cancel();

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(handle.is_finished());
        assert_eq!(env.client.attempts().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn inside_the_window_every_active_session_gets_a_tick() {
        let env = crate::testing::test_env(1, 3).await;
        // One session opted out of background loops.
        env.pool
            .mark_inactive(env.sessions[0].id.clone())
            .await
            .unwrap();

        let scheduler =
            KeepAliveScheduler::new(env.db.clone(), env.executor.clone(), env.guard.clone());
        let handle = scheduler.start(
            LoopScope::all_sessions(1),
            always_open(),
            Duration::from_secs(60),
            Arc::new(TracingSink),
        );

        // Let the first tick and its fire-and-forget tasks run.
        tokio::time::sleep(Duration::from_secs(30)).await;
        handle.cancel();
        tokio::time::sleep(Duration::from_secs(120)).await;

        let attempts = env.client.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().all(|a| a.label != env.sessions[0].label));
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn outside_the_window_nothing_fires_until_cancelled() {
        let env = crate::testing::test_env(1, 2).await;
        let scheduler =
            KeepAliveScheduler::new(env.db.clone(), env.executor.clone(), env.guard.clone());

        let handle = scheduler.start(
            LoopScope::all_sessions(1),
            closed_for_hours(),
            Duration::from_secs(60),
            Arc::new(TracingSink),
        );

        // Well under the two hours until the window opens.
        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        assert_eq!(env.client.attempts().len(), 0);

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_survives_failing_sessions() {
        let env = crate::testing::test_env(1, 2).await;
        env.client.fail_connect(
            &env.sessions[0].label,
            crate::executor::NetError::Transport("boom".into()),
        );

        let scheduler =
            KeepAliveScheduler::new(env.db.clone(), env.executor.clone(), env.guard.clone());
        let handle = scheduler.start(
            LoopScope::all_sessions(1),
            always_open(),
            Duration::from_secs(60),
            Arc::new(TracingSink),
        );

        // Three periods pass; the loop keeps ticking despite the failure.
        tokio::time::sleep(Duration::from_secs(185)).await;
        handle.cancel();
        tokio::time::sleep(Duration::from_secs(120)).await;

        let healthy: usize = env
            .client
            .attempts()
            .iter()
            .filter(|a| a.label == env.sessions[1].label)
            .count();
        assert!(healthy >= 3, "only {} healthy ticks", healthy);
        assert!(handle.is_finished());
    }
}
