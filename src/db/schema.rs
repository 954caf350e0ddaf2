use serde::{Deserialize, Serialize};
use surrealdb::{RecordId, sql::Datetime};

/// Persisted representation of one authenticated network identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Stable database identifier for this session (table: `session`).
    pub id: RecordId,
    /// Owning user.
    pub user_id: i64,
    /// Display label, typically the phone number the account was registered with.
    pub label: String,
    /// First half of the credential pair.
    pub api_id: i64,
    /// Second half of the credential pair.
    pub api_hash: String,
    /// File name of the authentication artifact inside the sessions directory.
    pub artifact: String,
    /// Optional proxy binding used when connecting this session.
    pub proxy_id: Option<RecordId>,
    /// Whether this session participates in background keep-alive loops.
    pub is_active: bool,
    pub created_at: Option<Datetime>,
}

/// Payload used when inserting a new session into the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreate {
    pub user_id: i64,
    pub label: String,
    pub api_id: i64,
    pub api_hash: String,
    pub artifact: String,
    pub proxy_id: Option<RecordId>,
    pub is_active: bool,
}

/// Persisted proxy connection parameters, shared by zero or more sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRecord {
    /// Stable database identifier for this proxy (table: `proxy`).
    pub id: RecordId,
    pub user_id: i64,
    /// Proxy scheme, e.g. `socks5` or `http`.
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub login: Option<String>,
    pub password: Option<String>,
    pub created_at: Option<Datetime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyCreate {
    pub user_id: i64,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub login: Option<String>,
    pub password: Option<String>,
}

/// A named, user-scoped cohort of sessions. Membership lives in the
/// `flow_member` relation table (in: flow, out: session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    /// Stable database identifier for this flow (table: `flow`).
    pub id: RecordId,
    pub user_id: i64,
    /// Unique per user.
    pub name: String,
    pub created_at: Option<Datetime>,
}
