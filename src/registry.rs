//! Registry of running background loops.
//!
//! At most one loop may run per (user, scope) at a time. Handles live only
//! in memory: a process restart loses all running loops, which is a known
//! and accepted limitation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use surrealdb::RecordId;
use tracing::{debug, info};

use crate::scheduler::LoopHandle;

/// What a background loop ranges over.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeTarget {
    /// Every session the user owns.
    AllSessions,
    /// One flow's member sessions.
    Flow(RecordId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoopScope {
    pub user_id: i64,
    pub target: ScopeTarget,
}

impl LoopScope {
    pub fn all_sessions(user_id: i64) -> Self {
        Self {
            user_id,
            target: ScopeTarget::AllSessions,
        }
    }

    pub fn flow(user_id: i64, flow_id: RecordId) -> Self {
        Self {
            user_id,
            target: ScopeTarget::Flow(flow_id),
        }
    }
}

impl fmt::Display for LoopScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            ScopeTarget::AllSessions => write!(f, "user {} / all sessions", self.user_id),
            ScopeTarget::Flow(id) => write!(f, "user {} / flow {}", self.user_id, id),
        }
    }
}

#[derive(Debug)]
pub enum RegistryError {
    /// A loop is already registered for this scope and replacement was not
    /// requested.
    AlreadyRunning(LoopScope),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning(scope) => {
                write!(f, "a loop is already running for {}", scope)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Default)]
pub struct LoopRegistry {
    running: Mutex<HashMap<LoopScope, LoopHandle>>,
}

impl LoopRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loop handle for its scope.
    ///
    /// Fails with `AlreadyRunning` when a live handle exists for the scope,
    /// unless `replace` is set, in which case the old loop is cancelled
    /// first. A rejected handle is cancelled before the error returns, so
    /// the loop it refers to never outlives the registration attempt.
    /// Handles whose task already finished are pruned on the way.
    pub fn register(&self, handle: LoopHandle, replace: bool) -> Result<(), RegistryError> {
        let mut running = self.running.lock().expect("loop registry poisoned");
        running.retain(|_, existing| !existing.is_finished());

        if let Some(existing) = running.get(handle.scope()) {
            if !replace {
                handle.cancel();
                return Err(RegistryError::AlreadyRunning(handle.scope().clone()));
            }
            debug!(scope = %handle.scope(), "replacing running loop");
            existing.cancel();
        }

        info!(scope = %handle.scope(), "loop registered");
        running.insert(handle.scope().clone(), handle);
        Ok(())
    }

    /// Cancel and forget the loop for a scope. Returns whether one existed.
    pub fn cancel(&self, scope: &LoopScope) -> bool {
        let mut running = self.running.lock().expect("loop registry poisoned");
        match running.remove(scope) {
            Some(handle) => {
                handle.cancel();
                info!(scope = %scope, "loop cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every loop a user owns. Returns how many were cancelled.
    pub fn cancel_all_for(&self, user_id: i64) -> usize {
        let mut running = self.running.lock().expect("loop registry poisoned");
        let scopes: Vec<LoopScope> = running
            .keys()
            .filter(|scope| scope.user_id == user_id)
            .cloned()
            .collect();
        for scope in &scopes {
            if let Some(handle) = running.remove(scope) {
                handle.cancel();
            }
        }
        scopes.len()
    }

    /// Scopes with a live loop for this user.
    pub fn list_running(&self, user_id: i64) -> Vec<LoopScope> {
        let mut running = self.running.lock().expect("loop registry poisoned");
        running.retain(|_, existing| !existing.is_finished());
        running
            .keys()
            .filter(|scope| scope.user_id == user_id)
            .cloned()
            .collect()
    }
}
