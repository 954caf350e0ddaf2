//! Shared test fixtures: an in-memory environment and a scripted network
//! client that records every attempt with its (paused-clock) timestamp.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::artifact::ArtifactStore;
use crate::db::{DatabaseConfig, Db, SessionRecord, create_connection, ensure_schema};
use crate::executor::{
    ActionExecutor, NetError, NetworkClient, NetworkConnection, SessionGuard,
};
use crate::pool::{NewSession, SessionPool};
use crate::progress::ProgressEvent;
use crate::proxy::ProxyEndpoint;
use crate::target::TargetLink;

#[derive(Debug, Clone)]
pub(crate) struct Attempt {
    pub label: String,
    pub at: tokio::time::Instant,
}

#[derive(Default)]
struct ScriptState {
    /// Per-label queues of scripted outcomes; exhausted or unscripted
    /// labels succeed.
    scripts: Mutex<HashMap<String, VecDeque<Result<(), NetError>>>>,
    connect_errors: Mutex<HashMap<String, NetError>>,
    attempts: Mutex<Vec<Attempt>>,
}

impl ScriptState {
    fn next(&self, label: &str) -> Result<(), NetError> {
        self.attempts
            .lock()
            .expect("attempts poisoned")
            .push(Attempt {
                label: label.to_string(),
                at: tokio::time::Instant::now(),
            });
        self.scripts
            .lock()
            .expect("scripts poisoned")
            .get_mut(label)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()))
    }
}

#[derive(Default)]
pub(crate) struct ScriptedClient {
    state: Arc<ScriptState>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, label: &str, outcomes: Vec<Result<(), NetError>>) {
        self.state
            .scripts
            .lock()
            .expect("scripts poisoned")
            .insert(label.to_string(), outcomes.into());
    }

    pub fn fail_connect(&self, label: &str, err: NetError) {
        self.state
            .connect_errors
            .lock()
            .expect("connect errors poisoned")
            .insert(label.to_string(), err);
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.state
            .attempts
            .lock()
            .expect("attempts poisoned")
            .clone()
    }
}

struct ScriptedConnection {
    label: String,
    state: Arc<ScriptState>,
}

#[async_trait]
impl NetworkClient for ScriptedClient {
    async fn connect(
        &self,
        session: &SessionRecord,
        _artifact_path: &Path,
        _proxy: Option<&ProxyEndpoint>,
    ) -> Result<Box<dyn NetworkConnection>, NetError> {
        if let Some(err) = self
            .state
            .connect_errors
            .lock()
            .expect("connect errors poisoned")
            .get(&session.label)
        {
            return Err(err.clone());
        }
        Ok(Box::new(ScriptedConnection {
            label: session.label.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

#[async_trait]
impl NetworkConnection for ScriptedConnection {
    async fn join(&mut self, _target: &TargetLink) -> Result<(), NetError> {
        self.state.next(&self.label)
    }

    async fn leave(&mut self, _target: &TargetLink) -> Result<(), NetError> {
        self.state.next(&self.label)
    }

    async fn broadcast(&mut self, _text: &str) -> Result<(), NetError> {
        self.state.next(&self.label)
    }

    async fn refresh_presence(&mut self) -> Result<(), NetError> {
        self.state.next(&self.label)
    }

    async fn check_membership(&mut self, _target: &TargetLink) -> Result<(), NetError> {
        self.state.next(&self.label)
    }

    async fn close(&mut self) {}
}

pub(crate) struct TestEnv {
    pub db: Db,
    pub pool: SessionPool,
    pub client: Arc<ScriptedClient>,
    pub executor: Arc<ActionExecutor>,
    pub guard: Arc<SessionGuard>,
    pub sessions: Vec<SessionRecord>,
    _dir: tempfile::TempDir,
}

/// In-memory database, temp artifact store, `count` registered sessions
/// (labels `acct00`, `acct01`, ...), scripted client.
pub(crate) async fn test_env(user_id: i64, count: usize) -> TestEnv {
    let db = create_connection(DatabaseConfig::with_url("memory"))
        .await
        .expect("memory db");
    ensure_schema(&db).await.expect("schema");

    let dir = tempfile::tempdir().expect("tempdir");
    let artifacts = ArtifactStore::new(dir.path());
    let pool = SessionPool::new(db.clone(), artifacts.clone());

    let mut sessions = Vec::with_capacity(count);
    for i in 0..count {
        let record = pool
            .register(NewSession {
                user_id,
                label: format!("acct{:02}", i),
                api_id: 1000 + i as i64,
                api_hash: "hash".to_string(),
                proxy_id: None,
                is_active: true,
                artifact_blob: b"opaque".to_vec(),
            })
            .await
            .expect("register session");
        sessions.push(record);
    }

    let client = ScriptedClient::new();
    let executor = Arc::new(ActionExecutor::new(
        db.clone(),
        artifacts,
        client.clone() as Arc<dyn NetworkClient>,
    ));

    TestEnv {
        db,
        pool,
        client,
        executor,
        guard: SessionGuard::new(),
        sessions,
        _dir: dir,
    }
}

/// Collect everything currently buffered in a progress channel.
pub(crate) fn drain(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>,
) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
