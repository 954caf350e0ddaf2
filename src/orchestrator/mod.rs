//! The orchestrator facade: wires the session pool, executor, batch
//! runner, keep-alive scheduler, and cancellation registry together behind
//! the three-call contract surface (`run_batch` / `start_keepalive` /
//! `stop`) a front-end talks to.


use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use surrealdb::RecordId;

use crate::artifact::ArtifactStore;
use crate::batch::{BatchConfig, BatchRunner, BatchSummary};
use crate::config::OrchestratorSettings;
use crate::db::{Db, DatabaseConfig, FlowRecord, SessionRecord, create_connection, ensure_schema};
use crate::executor::{Action, ActionExecutor, NetworkClient, SessionGuard};
use crate::flows::{self, FlowError};
use crate::pool::SessionPool;
use crate::progress::ProgressSink;
use crate::proxy::ProxyChecker;
use crate::registry::{LoopRegistry, LoopScope, RegistryError};
use crate::scheduler::{KeepAliveScheduler, resolve_scope_sessions};
use crate::window::ActivityWindow;

pub struct Orchestrator {
    db: Db,
    settings: OrchestratorSettings,
    pool: SessionPool,
    executor: Arc<ActionExecutor>,
    guard: Arc<SessionGuard>,
    registry: LoopRegistry,
}

impl Orchestrator {
    /// Connect to the database, ensure the schema, and assemble the
    /// component stack around the supplied network client.
    pub async fn new(
        db_config: DatabaseConfig,
        settings: OrchestratorSettings,
        client: Arc<dyn NetworkClient>,
    ) -> Result<Self> {
        let db = create_connection(db_config).await?;
        ensure_schema(&db).await?;

        let artifacts = ArtifactStore::new(settings.sessions_dir.clone());
        let pool = SessionPool::new(db.clone(), artifacts.clone());
        let executor = Arc::new(ActionExecutor::new(db.clone(), artifacts, client));
        let guard = SessionGuard::new();

        Ok(Self {
            db,
            settings,
            pool,
            executor,
            guard,
            registry: LoopRegistry::new(),
        })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig::from_settings(&self.settings)
    }

    /// Sessions a scope currently ranges over.
    pub async fn resolve_scope(&self, scope: &LoopScope) -> Result<Vec<SessionRecord>> {
        resolve_scope_sessions(&self.db, scope).await
    }

    /// Run one bounded batch of `action` over the scope's sessions.
    pub async fn run_batch(
        &self,
        scope: &LoopScope,
        action: Action,
        cfg: BatchConfig,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<BatchSummary> {
        let sessions = self.resolve_scope(scope).await?;
        let runner = BatchRunner::new(
            Arc::clone(&self.executor),
            self.pool.clone(),
            Arc::clone(&self.guard),
        );
        Ok(runner.run(sessions, action, cfg, sink).await)
    }

    /// Start a keep-alive loop for a scope, gated by `window`.
    ///
    /// Fails with `AlreadyRunning` when the scope already has a loop,
    /// unless `replace` is set (cancel the old one, start the new one).
    pub fn start_keepalive(
        &self,
        scope: LoopScope,
        window: ActivityWindow,
        period: Option<Duration>,
        replace: bool,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<(), RegistryError> {
        let scheduler = KeepAliveScheduler::new(
            self.db.clone(),
            Arc::clone(&self.executor),
            Arc::clone(&self.guard),
        );
        let handle = scheduler.start(
            scope,
            window,
            period.unwrap_or(self.settings.keepalive_period),
            sink,
        );
        self.registry.register(handle, replace)
    }

    /// Stop the loop for a scope. No-op (returns false) when none runs.
    pub fn stop(&self, scope: &LoopScope) -> bool {
        self.registry.cancel(scope)
    }

    pub fn stop_all(&self, user_id: i64) -> usize {
        self.registry.cancel_all_for(user_id)
    }

    pub fn list_running(&self, user_id: i64) -> Vec<LoopScope> {
        self.registry.list_running(user_id)
    }

    pub async fn create_flow(
        &self,
        user_id: i64,
        name: &str,
        session_ids: &[RecordId],
    ) -> Result<FlowRecord, FlowError> {
        flows::create_flow(&self.db, user_id, name, session_ids, self.settings.min_flow_size).await
    }

    pub async fn auto_partition(&self, user_id: i64) -> Result<Vec<FlowRecord>, FlowError> {
        flows::auto_partition(&self.db, user_id, self.settings.flow_group_size).await
    }

    pub async fn random_flow(&self, user_id: i64, size: usize) -> Result<FlowRecord, FlowError> {
        flows::random_flow(&self.db, user_id, size).await
    }

    pub async fn check_proxies(
        &self,
        user_id: i64,
    ) -> Result<Vec<(crate::db::ProxyRecord, bool)>> {
        ProxyChecker::default().check_all(&self.db, user_id).await
    }
}
