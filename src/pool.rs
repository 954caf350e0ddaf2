//! The session pool: bookkeeping over authenticated identities.
//!
//! Nothing here talks to the network. The pool persists session rows,
//! owns their artifact files, and supports the delete cascade the rest of
//! the orchestrator relies on for self-healing (a dead session is removed
//! once and never re-fails a later batch).

use anyhow::Result;
use surrealdb::RecordId;
use tracing::info;

use crate::artifact::ArtifactStore;
use crate::db::{Db, QueryBuilder, SessionCreate, SessionRecord};

/// Input for registering a session after an external authentication flow
/// has produced its artifact blob.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: i64,
    pub label: String,
    pub api_id: i64,
    pub api_hash: String,
    pub proxy_id: Option<RecordId>,
    pub is_active: bool,
    pub artifact_blob: Vec<u8>,
}

#[derive(Clone)]
pub struct SessionPool {
    db: Db,
    artifacts: ArtifactStore,
}

impl SessionPool {
    pub fn new(db: Db, artifacts: ArtifactStore) -> Self {
        Self { db, artifacts }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Persist a freshly authenticated session: artifact file first, then
    /// the database row referencing it.
    pub async fn register(&self, new: NewSession) -> Result<SessionRecord> {
        let artifact = ArtifactStore::derive_name(&format!("{}:{}", new.user_id, new.label));
        self.artifacts.save(&artifact, &new.artifact_blob).await?;

        let record = QueryBuilder::create_session(
            &self.db,
            &SessionCreate {
                user_id: new.user_id,
                label: new.label,
                api_id: new.api_id,
                api_hash: new.api_hash,
                artifact,
                proxy_id: new.proxy_id,
                is_active: new.is_active,
            },
        )
        .await?;

        info!(session = %record.label, "session registered");
        Ok(record)
    }

    pub async fn list(&self, user_id: i64) -> Result<Vec<SessionRecord>> {
        QueryBuilder::list_sessions(&self.db, user_id).await
    }

    pub async fn get(&self, session_id: RecordId) -> Result<Option<SessionRecord>> {
        QueryBuilder::find_session(&self.db, session_id).await
    }

    /// Exclude a session from future background loops without deleting it.
    pub async fn mark_inactive(&self, session_id: RecordId) -> Result<()> {
        QueryBuilder::set_session_active(&self.db, session_id, false).await
    }

    /// Delete a session with full cascade: artifact file, flow membership
    /// edges, then the row itself. Safe to call for a session whose
    /// artifact already disappeared.
    pub async fn delete(&self, session_id: RecordId) -> Result<()> {
        if let Some(record) = QueryBuilder::find_session(&self.db, session_id.clone()).await? {
            self.artifacts.delete(&record.artifact).await?;
            info!(session = %record.label, "deleting session");
        }
        QueryBuilder::delete_session(&self.db, session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DatabaseConfig, create_connection, ensure_schema};

    async fn setup_pool() -> (SessionPool, tempfile::TempDir) {
        let db = create_connection(DatabaseConfig::with_url("memory"))
            .await
            .unwrap();
        ensure_schema(&db).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        (SessionPool::new(db, ArtifactStore::new(dir.path())), dir)
    }

    fn new_session(user_id: i64, label: &str) -> NewSession {
        NewSession {
            user_id,
            label: label.to_string(),
            api_id: 12345,
            api_hash: "hash".to_string(),
            proxy_id: None,
            is_active: false,
            artifact_blob: b"blob".to_vec(),
        }
    }

    #[tokio::test]
    async fn register_persists_row_and_artifact() {
        let (pool, _dir) = setup_pool().await;
        let record = pool.register(new_session(7, "+15550001")).await.unwrap();

        assert_eq!(record.user_id, 7);
        assert!(pool.artifacts().exists(&record.artifact).await);
        assert_eq!(pool.list(7).await.unwrap().len(), 1);
        assert!(pool.list(8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_cascades_artifact_and_row() {
        let (pool, _dir) = setup_pool().await;
        let record = pool.register(new_session(7, "+15550001")).await.unwrap();
        let artifact = record.artifact.clone();

        pool.delete(record.id.clone()).await.unwrap();

        assert!(!pool.artifacts().exists(&artifact).await);
        assert!(pool.get(record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_inactive_clears_the_flag() {
        let (pool, _dir) = setup_pool().await;
        let record = pool
            .register(NewSession {
                is_active: true,
                ..new_session(7, "+15550001")
            })
            .await
            .unwrap();
        assert!(record.is_active);

        pool.mark_inactive(record.id.clone()).await.unwrap();
        let reloaded = pool.get(record.id).await.unwrap().unwrap();
        assert!(!reloaded.is_active);
    }
}
