use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("SURREALDB_URL").unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| "cohort".to_string()),
            database: env::var("SURREALDB_DATABASE")
                .unwrap_or_else(|_| "orchestrator".to_string()),
            username: env::var("SURREALDB_USERNAME").ok(),
            password: env::var("SURREALDB_PASSWORD").ok(),
        }
    }
}

impl DatabaseConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = vec![
        // One authenticated identity per row. The artifact field names a file
        // in the sessions directory; the file itself is owned by the pool.
        "DEFINE TABLE session SCHEMAFULL;
         DEFINE FIELD user_id ON TABLE session TYPE int;
         DEFINE FIELD label ON TABLE session TYPE string;
         DEFINE FIELD api_id ON TABLE session TYPE int;
         DEFINE FIELD api_hash ON TABLE session TYPE string;
         DEFINE FIELD artifact ON TABLE session TYPE string;
         DEFINE FIELD proxy_id ON TABLE session TYPE option<record<proxy>>;
         DEFINE FIELD is_active ON TABLE session TYPE bool DEFAULT false;
         DEFINE FIELD created_at ON TABLE session VALUE time::now();",
        // Proxy connection parameters, many sessions to one proxy.
        "DEFINE TABLE proxy SCHEMAFULL;
         DEFINE FIELD user_id ON TABLE proxy TYPE int;
         DEFINE FIELD scheme ON TABLE proxy TYPE string;
         DEFINE FIELD host ON TABLE proxy TYPE string;
         DEFINE FIELD port ON TABLE proxy TYPE int;
         DEFINE FIELD login ON TABLE proxy TYPE option<string>;
         DEFINE FIELD password ON TABLE proxy TYPE option<string>;
         DEFINE FIELD created_at ON TABLE proxy VALUE time::now();",
        // Named cohorts. The name is unique per user.
        "DEFINE TABLE flow SCHEMAFULL;
         DEFINE FIELD user_id ON TABLE flow TYPE int;
         DEFINE FIELD name ON TABLE flow TYPE string;
         DEFINE FIELD created_at ON TABLE flow VALUE time::now();
         DEFINE INDEX flow_name_per_user ON TABLE flow COLUMNS user_id, name UNIQUE;",
        // Flow membership edges.
        "DEFINE TABLE flow_member TYPE RELATION IN flow OUT session;",
    ];

    for query in schema_queries {
        db.query(query).await?;
    }

    Ok(())
}
