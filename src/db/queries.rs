// Database query helpers for SurrealDB.
//
// Thin, explicit queries only. Anything with actual decision logic (cohort
// partitioning, batch accounting) lives above this layer.

use crate::db::schema::*;
use anyhow::{Result, anyhow};
use surrealdb::RecordId;
use surrealdb::{Surreal, engine::any::Any};

pub struct QueryBuilder;

impl QueryBuilder {
    pub async fn create_session(
        db: &Surreal<Any>,
        data: &SessionCreate,
    ) -> Result<SessionRecord> {
        let mut res = db
            .query(
                r#"
                CREATE session SET
                    user_id = $user_id,
                    label = $label,
                    api_id = $api_id,
                    api_hash = $api_hash,
                    artifact = $artifact,
                    proxy_id = $proxy_id,
                    is_active = $is_active,
                    created_at = time::now()
                "#,
            )
            .bind(("user_id", data.user_id))
            .bind(("label", data.label.clone()))
            .bind(("api_id", data.api_id))
            .bind(("api_hash", data.api_hash.clone()))
            .bind(("artifact", data.artifact.clone()))
            .bind(("proxy_id", data.proxy_id.clone()))
            .bind(("is_active", data.is_active))
            .await?;

        let created: Option<SessionRecord> = res.take(0)?;
        created.ok_or_else(|| anyhow!("failed to create session record"))
    }

    pub async fn list_sessions(db: &Surreal<Any>, user_id: i64) -> Result<Vec<SessionRecord>> {
        let mut res = db
            .query("SELECT * FROM session WHERE user_id = $user_id ORDER BY label")
            .bind(("user_id", user_id))
            .await?;

        let sessions: Vec<SessionRecord> = res.take(0)?;
        Ok(sessions)
    }

    pub async fn find_session(
        db: &Surreal<Any>,
        session_id: RecordId,
    ) -> Result<Option<SessionRecord>> {
        let mut res = db
            .query("SELECT * FROM session WHERE id = $id LIMIT 1")
            .bind(("id", session_id))
            .await?;

        let session: Option<SessionRecord> = res.take(0)?;
        Ok(session)
    }

    pub async fn set_session_active(
        db: &Surreal<Any>,
        session_id: RecordId,
        active: bool,
    ) -> Result<()> {
        db.query("UPDATE $id SET is_active = $active")
            .bind(("id", session_id))
            .bind(("active", active))
            .await?;
        Ok(())
    }

    pub async fn set_session_proxy(
        db: &Surreal<Any>,
        session_id: RecordId,
        proxy_id: Option<RecordId>,
    ) -> Result<()> {
        db.query("UPDATE $id SET proxy_id = $proxy_id")
            .bind(("id", session_id))
            .bind(("proxy_id", proxy_id))
            .await?;
        Ok(())
    }

    /// Delete a session row together with its flow membership edges.
    /// The caller is responsible for removing the artifact file first.
    pub async fn delete_session(db: &Surreal<Any>, session_id: RecordId) -> Result<()> {
        db.query("DELETE flow_member WHERE out = $id; DELETE $id;")
            .bind(("id", session_id))
            .await?;
        Ok(())
    }

    pub async fn create_proxy(db: &Surreal<Any>, data: &ProxyCreate) -> Result<ProxyRecord> {
        let mut res = db
            .query(
                r#"
                CREATE proxy SET
                    user_id = $user_id,
                    scheme = $scheme,
                    host = $host,
                    port = $port,
                    login = $login,
                    password = $password,
                    created_at = time::now()
                "#,
            )
            .bind(("user_id", data.user_id))
            .bind(("scheme", data.scheme.clone()))
            .bind(("host", data.host.clone()))
            .bind(("port", data.port))
            .bind(("login", data.login.clone()))
            .bind(("password", data.password.clone()))
            .await?;

        let created: Option<ProxyRecord> = res.take(0)?;
        created.ok_or_else(|| anyhow!("failed to create proxy record"))
    }

    pub async fn list_proxies(db: &Surreal<Any>, user_id: i64) -> Result<Vec<ProxyRecord>> {
        let mut res = db
            .query("SELECT * FROM proxy WHERE user_id = $user_id")
            .bind(("user_id", user_id))
            .await?;

        let proxies: Vec<ProxyRecord> = res.take(0)?;
        Ok(proxies)
    }

    pub async fn find_proxy(
        db: &Surreal<Any>,
        proxy_id: RecordId,
    ) -> Result<Option<ProxyRecord>> {
        let mut res = db
            .query("SELECT * FROM proxy WHERE id = $id LIMIT 1")
            .bind(("id", proxy_id))
            .await?;

        let proxy: Option<ProxyRecord> = res.take(0)?;
        Ok(proxy)
    }

    /// Delete a proxy and null out the binding on any session that used it.
    pub async fn delete_proxy(db: &Surreal<Any>, proxy_id: RecordId) -> Result<()> {
        db.query(
            "UPDATE session SET proxy_id = NONE WHERE proxy_id = $id; DELETE $id;",
        )
        .bind(("id", proxy_id))
        .await?;
        Ok(())
    }

    pub async fn create_flow(
        db: &Surreal<Any>,
        user_id: i64,
        name: &str,
    ) -> Result<FlowRecord> {
        let mut res = db
            .query(
                r#"
                CREATE flow SET
                    user_id = $user_id,
                    name = $name,
                    created_at = time::now()
                "#,
            )
            .bind(("user_id", user_id))
            .bind(("name", name.to_string()))
            .await?;

        let created: Option<FlowRecord> = res.take(0)?;
        created.ok_or_else(|| anyhow!("failed to create flow record"))
    }

    pub async fn find_flow(db: &Surreal<Any>, flow_id: RecordId) -> Result<Option<FlowRecord>> {
        let mut res = db
            .query("SELECT * FROM flow WHERE id = $id LIMIT 1")
            .bind(("id", flow_id))
            .await?;

        let flow: Option<FlowRecord> = res.take(0)?;
        Ok(flow)
    }

    pub async fn find_flow_by_name(
        db: &Surreal<Any>,
        user_id: i64,
        name: &str,
    ) -> Result<Option<FlowRecord>> {
        let mut res = db
            .query("SELECT * FROM flow WHERE user_id = $user_id AND name = $name LIMIT 1")
            .bind(("user_id", user_id))
            .bind(("name", name.to_string()))
            .await?;

        let flow: Option<FlowRecord> = res.take(0)?;
        Ok(flow)
    }

    pub async fn list_flows(db: &Surreal<Any>, user_id: i64) -> Result<Vec<FlowRecord>> {
        let mut res = db
            .query("SELECT * FROM flow WHERE user_id = $user_id ORDER BY name")
            .bind(("user_id", user_id))
            .await?;

        let flows: Vec<FlowRecord> = res.take(0)?;
        Ok(flows)
    }

    pub async fn add_flow_member(
        db: &Surreal<Any>,
        flow_id: RecordId,
        session_id: RecordId,
    ) -> Result<()> {
        db.query("RELATE $flow->flow_member->$sess")
            .bind(("flow", flow_id))
            .bind(("sess", session_id))
            .await?;
        Ok(())
    }

    /// Resolve a flow's member sessions.
    pub async fn flow_sessions(
        db: &Surreal<Any>,
        flow_id: RecordId,
    ) -> Result<Vec<SessionRecord>> {
        let mut res = db
            .query("SELECT VALUE out FROM flow_member WHERE in = $flow")
            .bind(("flow", flow_id))
            .await?;
        let ids: Vec<RecordId> = res.take(0)?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut res = db
            .query("SELECT * FROM session WHERE id IN $ids ORDER BY label")
            .bind(("ids", ids))
            .await?;
        let sessions: Vec<SessionRecord> = res.take(0)?;
        Ok(sessions)
    }

    /// Flows a session belongs to. Used to verify membership cascades.
    pub async fn session_flows(
        db: &Surreal<Any>,
        session_id: RecordId,
    ) -> Result<Vec<RecordId>> {
        let mut res = db
            .query("SELECT VALUE in FROM flow_member WHERE out = $sess")
            .bind(("sess", session_id))
            .await?;
        let ids: Vec<RecordId> = res.take(0)?;
        Ok(ids)
    }

    pub async fn delete_flow(db: &Surreal<Any>, flow_id: RecordId) -> Result<()> {
        db.query("DELETE flow_member WHERE in = $id; DELETE $id;")
            .bind(("id", flow_id))
            .await?;
        Ok(())
    }
}
