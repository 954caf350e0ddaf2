//! Flow grouping: naming and partitioning sessions into cohorts.

use rand::seq::SliceRandom;
use std::fmt;
use surrealdb::RecordId;
use tracing::{debug, info};

use crate::db::{Db, FlowRecord, QueryBuilder};

#[derive(Debug)]
pub enum FlowError {
    /// A flow with this name already exists for the user.
    DuplicateName(String),
    /// Fewer sessions available than the cohort requires.
    InsufficientSessions { available: usize, required: usize },
    Database(String),
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName(name) => write!(f, "flow `{}` already exists", name),
            Self::InsufficientSessions {
                available,
                required,
            } => write!(
                f,
                "not enough sessions: {} available, {} required",
                available, required
            ),
            Self::Database(msg) => write!(f, "database error: {}", msg),
        }
    }
}

impl std::error::Error for FlowError {}

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Create a flow from an explicit session selection.
pub async fn create_flow(
    db: &Db,
    user_id: i64,
    name: &str,
    session_ids: &[RecordId],
    min_size: usize,
) -> Result<FlowRecord, FlowError> {
    if session_ids.len() < min_size {
        return Err(FlowError::InsufficientSessions {
            available: session_ids.len(),
            required: min_size,
        });
    }
    if QueryBuilder::find_flow_by_name(db, user_id, name)
        .await?
        .is_some()
    {
        return Err(FlowError::DuplicateName(name.to_string()));
    }

    let flow = QueryBuilder::create_flow(db, user_id, name).await?;
    for session_id in session_ids {
        QueryBuilder::add_flow_member(db, flow.id.clone(), session_id.clone()).await?;
    }

    info!(flow = %flow.name, members = session_ids.len(), "flow created");
    Ok(flow)
}

/// Partition a user's sessions into cohorts of `group_size`.
///
/// Sessions are shuffled, then dealt round-robin: cohort `i` receives the
/// shuffled sessions at indices `i`, `i + num_flows`, `i + 2 * num_flows`.
/// Dealing instead of slicing contiguously keeps any ordering bias in the
/// stored sessions (oldest-first, newest-first) from concentrating in one
/// long-lived cohort. Names collide deterministically (`Flow_<user>_<n>`);
/// a collision skips that cohort rather than failing the whole partition.
pub async fn auto_partition(
    db: &Db,
    user_id: i64,
    group_size: usize,
) -> Result<Vec<FlowRecord>, FlowError> {
    let mut sessions = QueryBuilder::list_sessions(db, user_id).await?;
    if sessions.len() < group_size {
        return Err(FlowError::InsufficientSessions {
            available: sessions.len(),
            required: group_size,
        });
    }

    sessions.shuffle(&mut rand::thread_rng());
    let num_flows = sessions.len() / group_size;

    let mut created = Vec::new();
    for i in 0..num_flows {
        let name = format!("Flow_{}_{}", user_id, i + 1);
        if QueryBuilder::find_flow_by_name(db, user_id, &name)
            .await?
            .is_some()
        {
            debug!(flow = %name, "name taken, skipping cohort");
            continue;
        }

        let flow = QueryBuilder::create_flow(db, user_id, &name).await?;
        for j in 0..group_size {
            let index = i + j * num_flows;
            if let Some(session) = sessions.get(index) {
                QueryBuilder::add_flow_member(db, flow.id.clone(), session.id.clone()).await?;
            }
        }
        created.push(flow);
    }

    info!(user = user_id, flows = created.len(), "auto partition done");
    Ok(created)
}

/// Create a flow from `size` randomly sampled sessions and activate them
/// for background loops. The generated name is timestamped, so repeated
/// calls do not collide.
pub async fn random_flow(db: &Db, user_id: i64, size: usize) -> Result<FlowRecord, FlowError> {
    let sessions = QueryBuilder::list_sessions(db, user_id).await?;
    if size == 0 || sessions.len() < size {
        return Err(FlowError::InsufficientSessions {
            available: sessions.len(),
            required: size.max(1),
        });
    }

    let chosen: Vec<_> = sessions
        .choose_multiple(&mut rand::thread_rng(), size)
        .cloned()
        .collect();

    let name = chrono::Local::now().format("Flow_%Y%m%d_%H%M%S").to_string();
    if QueryBuilder::find_flow_by_name(db, user_id, &name)
        .await?
        .is_some()
    {
        return Err(FlowError::DuplicateName(name));
    }

    let flow = QueryBuilder::create_flow(db, user_id, &name).await?;
    for session in &chosen {
        QueryBuilder::add_flow_member(db, flow.id.clone(), session.id.clone()).await?;
        QueryBuilder::set_session_active(db, session.id.clone(), true).await?;
    }

    info!(flow = %flow.name, members = size, "random flow created");
    Ok(flow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactStore;
    use crate::db::{DatabaseConfig, create_connection, ensure_schema};
    use crate::pool::{NewSession, SessionPool};
    use std::collections::HashSet;

    async fn setup(user_id: i64, count: usize) -> (Db, SessionPool, tempfile::TempDir) {
        let db = create_connection(DatabaseConfig::with_url("memory"))
            .await
            .unwrap();
        ensure_schema(&db).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let pool = SessionPool::new(db.clone(), ArtifactStore::new(dir.path()));
        for i in 0..count {
            pool.register(NewSession {
                user_id,
                label: format!("+1555000{:02}", i),
                api_id: 1,
                api_hash: "h".to_string(),
                proxy_id: None,
                is_active: false,
                artifact_blob: b"blob".to_vec(),
            })
            .await
            .unwrap();
        }
        (db, pool, dir)
    }

    #[tokio::test]
    async fn create_flow_rejects_small_and_duplicate_cohorts() {
        let (db, pool, _dir) = setup(1, 4).await;
        let ids: Vec<_> = pool
            .list(1)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();

        let err = create_flow(&db, 1, "alpha", &ids[..2], 3).await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::InsufficientSessions {
                available: 2,
                required: 3
            }
        ));

        create_flow(&db, 1, "alpha", &ids[..3], 3).await.unwrap();
        let err = create_flow(&db, 1, "alpha", &ids[..3], 3).await.unwrap_err();
        assert!(matches!(err, FlowError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn auto_partition_deals_disjoint_cohorts() {
        let (db, pool, _dir) = setup(1, 10).await;

        let flows = auto_partition(&db, 1, 3).await.unwrap();
        assert_eq!(flows.len(), 3); // floor(10 / 3)

        let all_sessions: HashSet<_> = pool
            .list(1)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();

        let mut seen = HashSet::new();
        for flow in &flows {
            let members = QueryBuilder::flow_sessions(&db, flow.id.clone())
                .await
                .unwrap();
            assert_eq!(members.len(), 3);
            for member in members {
                assert!(all_sessions.contains(&member.id));
                assert!(seen.insert(member.id), "session dealt into two cohorts");
            }
        }
    }

    #[tokio::test]
    async fn auto_partition_skips_taken_names() {
        let (db, pool, _dir) = setup(1, 6).await;
        let ids: Vec<_> = pool
            .list(1)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();

        // Occupy the first generated name up front.
        create_flow(&db, 1, "Flow_1_1", &ids[..3], 3).await.unwrap();

        let flows = auto_partition(&db, 1, 3).await.unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].name, "Flow_1_2");
    }

    #[tokio::test]
    async fn random_flow_activates_its_members() {
        let (db, _pool, _dir) = setup(1, 5).await;

        let flow = random_flow(&db, 1, 3).await.unwrap();
        let members = QueryBuilder::flow_sessions(&db, flow.id.clone())
            .await
            .unwrap();
        assert_eq!(members.len(), 3);
        assert!(members.iter().all(|s| s.is_active));

        let err = random_flow(&db, 1, 9).await.unwrap_err();
        assert!(matches!(err, FlowError::InsufficientSessions { .. }));
    }
}
