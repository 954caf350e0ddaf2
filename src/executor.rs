//! Single-action execution against one session.
//!
//! The executor is the only component that touches the network layer. It
//! resolves a session's authentication artifact and proxy binding into a
//! live connection, performs exactly one action, and maps every failure the
//! network layer can produce into the closed [`ActionResult`] taxonomy. No
//! retry or backoff happens here; rate-limit and retry policy belong to the
//! callers (the batch runner and the keep-alive scheduler want different
//! policies for the same `RateLimited` result).

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use surrealdb::RecordId;
use tracing::{debug, warn};

use crate::artifact::ArtifactStore;
use crate::db::{Db, SessionRecord};
use crate::proxy::ProxyEndpoint;
use crate::target::TargetLink;

/// One network operation performed on behalf of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Join(TargetLink),
    Leave(TargetLink),
    Broadcast { text: String },
    /// Presence keep-alive: bounce the account's online status.
    ToggleOnline,
    CheckMembership(TargetLink),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Leave(_) => "leave",
            Self::Broadcast { .. } => "broadcast",
            Self::ToggleOnline => "toggle-online",
            Self::CheckMembership(_) => "check-membership",
        }
    }
}

/// Classified outcome of one (session, action) pair.
///
/// This taxonomy is the contract every network client implementation must
/// be mappable into; nothing below it ever escapes to the batch runner or
/// the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    Success,
    /// The session was already where the action wanted it (already a
    /// member, not a member, join request already pending).
    AlreadyInTargetState,
    /// The network layer signaled a rate limit with a mandatory wait.
    RateLimited(Duration),
    /// Banned in the target or not allowed to write there.
    Forbidden,
    /// Authentication is gone; the session should be deleted.
    SessionInvalid,
    TransientError(String),
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::AlreadyInTargetState => write!(f, "already in target state"),
            Self::RateLimited(wait) => write!(f, "rate limited for {}s", wait.as_secs()),
            Self::Forbidden => write!(f, "forbidden"),
            Self::SessionInvalid => write!(f, "session invalid"),
            Self::TransientError(msg) => write!(f, "transient error: {}", msg),
        }
    }
}

/// Failures the network layer is allowed to surface. Client implementations
/// translate their library's error hierarchy into this enum and nothing
/// else; the executor owns the mapping into [`ActionResult`].
#[derive(Debug, Clone)]
pub enum NetError {
    AlreadyParticipant,
    NotParticipant,
    /// Join request sent to a private group; approval is out of our hands.
    JoinRequestPending,
    BannedInTarget,
    WriteForbidden,
    /// Rate limit carrying the wait the server demanded.
    FloodWait(Duration),
    /// The saved authentication is no longer accepted.
    AuthRevoked,
    Transport(String),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyParticipant => write!(f, "already a participant"),
            Self::NotParticipant => write!(f, "not a participant"),
            Self::JoinRequestPending => write!(f, "join request pending approval"),
            Self::BannedInTarget => write!(f, "banned in target"),
            Self::WriteForbidden => write!(f, "writing forbidden"),
            Self::FloodWait(wait) => write!(f, "flood wait {}s", wait.as_secs()),
            Self::AuthRevoked => write!(f, "authorization revoked"),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for NetError {}

/// A live, authenticated connection for one session. One action per
/// connection; the executor closes it on every exit path.
#[async_trait]
pub trait NetworkConnection: Send {
    async fn join(&mut self, target: &TargetLink) -> Result<(), NetError>;
    async fn leave(&mut self, target: &TargetLink) -> Result<(), NetError>;
    async fn broadcast(&mut self, text: &str) -> Result<(), NetError>;
    /// Bounce presence (offline, then online) to keep the account visible.
    async fn refresh_presence(&mut self) -> Result<(), NetError>;
    /// Ok when the session is a member of the target, `NotParticipant` when not.
    async fn check_membership(&mut self, target: &TargetLink) -> Result<(), NetError>;
    async fn close(&mut self);
}

/// Factory for connections. The real implementation lives outside this
/// crate; [`DryRunClient`] is provided for rehearsal and tests.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn connect(
        &self,
        session: &SessionRecord,
        artifact_path: &Path,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Box<dyn NetworkConnection>, NetError>;
}

/// Runs exactly one action against one session and classifies the outcome.
pub struct ActionExecutor {
    db: Db,
    artifacts: ArtifactStore,
    client: Arc<dyn NetworkClient>,
}

impl ActionExecutor {
    pub fn new(db: Db, artifacts: ArtifactStore, client: Arc<dyn NetworkClient>) -> Self {
        Self {
            db,
            artifacts,
            client,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Execute `action` on behalf of `session`.
    ///
    /// Never returns an error: every failure is folded into the
    /// [`ActionResult`] taxonomy. A missing artifact or rejected
    /// authentication yields `SessionInvalid` without the action being
    /// attempted.
    pub async fn execute(&self, session: &SessionRecord, action: &Action) -> ActionResult {
        if !self.artifacts.exists(&session.artifact).await {
            warn!(
                session = %session.label,
                artifact = %session.artifact,
                "artifact file missing, session invalid"
            );
            return ActionResult::SessionInvalid;
        }
        let artifact_path = self.artifacts.path_for(&session.artifact);

        let proxy = match ProxyEndpoint::resolve(&self.db, session).await {
            Ok(proxy) => proxy,
            Err(e) => return ActionResult::TransientError(e.to_string()),
        };

        let mut conn = match self
            .client
            .connect(session, &artifact_path, proxy.as_ref())
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                debug!(session = %session.label, error = %e, "connect failed");
                return classify(e);
            }
        };

        let outcome = match action {
            Action::Join(target) => conn.join(target).await,
            Action::Leave(target) => conn.leave(target).await,
            Action::Broadcast { text } => conn.broadcast(text).await,
            Action::ToggleOnline => conn.refresh_presence().await,
            Action::CheckMembership(target) => conn.check_membership(target).await,
        };

        // Release the connection on every path before reporting.
        conn.close().await;

        match outcome {
            Ok(()) => ActionResult::Success,
            Err(e) => classify(e),
        }
    }
}

fn classify(err: NetError) -> ActionResult {
    match err {
        NetError::AlreadyParticipant
        | NetError::NotParticipant
        | NetError::JoinRequestPending => ActionResult::AlreadyInTargetState,
        NetError::BannedInTarget | NetError::WriteForbidden => ActionResult::Forbidden,
        NetError::FloodWait(wait) => ActionResult::RateLimited(wait),
        NetError::AuthRevoked => ActionResult::SessionInvalid,
        NetError::Transport(msg) => ActionResult::TransientError(msg),
    }
}

/// Marks sessions busy for the duration of one action sequence so the same
/// session is never driven by two concurrent executor invocations. Claims
/// release on drop.
#[derive(Debug, Default)]
pub struct SessionGuard {
    busy: Mutex<HashSet<RecordId>>,
}

impl SessionGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn try_claim(self: &Arc<Self>, id: &RecordId) -> Option<SessionClaim> {
        let mut busy = self.busy.lock().expect("session guard poisoned");
        if busy.insert(id.clone()) {
            Some(SessionClaim {
                guard: Arc::clone(self),
                id: id.clone(),
            })
        } else {
            None
        }
    }

    pub fn is_busy(&self, id: &RecordId) -> bool {
        self.busy.lock().expect("session guard poisoned").contains(id)
    }
}

pub struct SessionClaim {
    guard: Arc<SessionGuard>,
    id: RecordId,
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.guard
            .busy
            .lock()
            .expect("session guard poisoned")
            .remove(&self.id);
    }
}

/// A stand-in network client that performs no I/O: every connect succeeds
/// and every action logs and reports success. Lets the CLI rehearse a
/// campaign (pacing, chunking, windows) without network access.
pub struct DryRunClient;

struct DryRunConnection {
    label: String,
}

#[async_trait]
impl NetworkClient for DryRunClient {
    async fn connect(
        &self,
        session: &SessionRecord,
        _artifact_path: &Path,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Box<dyn NetworkConnection>, NetError> {
        debug!(
            session = %session.label,
            proxy = proxy.map(|p| p.url()).unwrap_or_else(|| "direct".to_string()),
            "dry-run connect"
        );
        Ok(Box::new(DryRunConnection {
            label: session.label.clone(),
        }))
    }
}

#[async_trait]
impl NetworkConnection for DryRunConnection {
    async fn join(&mut self, target: &TargetLink) -> Result<(), NetError> {
        debug!(session = %self.label, target = %target, "dry-run join");
        Ok(())
    }

    async fn leave(&mut self, target: &TargetLink) -> Result<(), NetError> {
        debug!(session = %self.label, target = %target, "dry-run leave");
        Ok(())
    }

    async fn broadcast(&mut self, text: &str) -> Result<(), NetError> {
        debug!(session = %self.label, chars = text.len(), "dry-run broadcast");
        Ok(())
    }

    async fn refresh_presence(&mut self) -> Result<(), NetError> {
        debug!(session = %self.label, "dry-run presence bounce");
        Ok(())
    }

    async fn check_membership(&mut self, target: &TargetLink) -> Result<(), NetError> {
        debug!(session = %self.label, target = %target, "dry-run membership check");
        Ok(())
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_the_contract() {
        assert_eq!(
            classify(NetError::AlreadyParticipant),
            ActionResult::AlreadyInTargetState
        );
        assert_eq!(
            classify(NetError::JoinRequestPending),
            ActionResult::AlreadyInTargetState
        );
        assert_eq!(classify(NetError::BannedInTarget), ActionResult::Forbidden);
        assert_eq!(classify(NetError::WriteForbidden), ActionResult::Forbidden);
        assert_eq!(
            classify(NetError::FloodWait(Duration::from_secs(30))),
            ActionResult::RateLimited(Duration::from_secs(30))
        );
        assert_eq!(classify(NetError::AuthRevoked), ActionResult::SessionInvalid);
        assert!(matches!(
            classify(NetError::Transport("timeout".into())),
            ActionResult::TransientError(_)
        ));
    }

    #[test]
    fn guard_claims_are_exclusive_and_release_on_drop() {
        let guard = SessionGuard::new();
        let id = RecordId::from_table_key("session", "a");

        let claim = guard.try_claim(&id).expect("first claim");
        assert!(guard.try_claim(&id).is_none());
        assert!(guard.is_busy(&id));

        drop(claim);
        assert!(!guard.is_busy(&id));
        assert!(guard.try_claim(&id).is_some());
    }
}
