//! Proxy binding resolution and health checking.

use anyhow::Result;
use std::time::Duration;
use tracing::{info, warn};

use crate::db::{Db, ProxyRecord, QueryBuilder, SessionRecord};

/// Connection parameters handed to the network client when a session has a
/// proxy binding.
#[derive(Debug, Clone)]
pub struct ProxyEndpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub login: Option<String>,
    pub password: Option<String>,
}

impl ProxyEndpoint {
    pub fn from_record(record: &ProxyRecord) -> Self {
        Self {
            scheme: record.scheme.clone(),
            host: record.host.clone(),
            port: record.port,
            login: record.login.clone(),
            password: record.password.clone(),
        }
    }

    /// Resolve a session's proxy binding, if any. A dangling binding (the
    /// proxy row was deleted underneath the session) degrades to a direct
    /// connection with a warning rather than failing the action.
    pub async fn resolve(db: &Db, session: &SessionRecord) -> Result<Option<Self>> {
        let Some(proxy_id) = session.proxy_id.clone() else {
            return Ok(None);
        };

        match QueryBuilder::find_proxy(db, proxy_id).await? {
            Some(record) => Ok(Some(Self::from_record(&record))),
            None => {
                warn!(
                    session = %session.label,
                    "proxy binding points at a deleted proxy, connecting direct"
                );
                Ok(None)
            }
        }
    }

    /// `scheme://[login:password@]host:port`
    pub fn url(&self) -> String {
        match (&self.login, &self.password) {
            (Some(login), Some(password)) => format!(
                "{}://{}:{}@{}:{}",
                self.scheme, login, password, self.host, self.port
            ),
            _ => format!("{}://{}:{}", self.scheme, self.host, self.port),
        }
    }
}

/// Probes proxies with a short HTTP request so dead bindings can be spotted
/// before a campaign starts. Never used on the batch hot path.
pub struct ProxyChecker {
    probe_url: String,
    timeout: Duration,
}

impl Default for ProxyChecker {
    fn default() -> Self {
        Self {
            probe_url: "https://t.me".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl ProxyChecker {
    pub fn new(probe_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            probe_url: probe_url.into(),
            timeout,
        }
    }

    pub async fn check(&self, endpoint: &ProxyEndpoint) -> bool {
        let proxy = match reqwest::Proxy::all(endpoint.url()) {
            Ok(proxy) => proxy,
            Err(e) => {
                warn!(proxy = %endpoint.url(), error = %e, "unusable proxy url");
                return false;
            }
        };

        let client = match reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(proxy = %endpoint.url(), error = %e, "failed to build probe client");
                return false;
            }
        };

        match client.get(&self.probe_url).send().await {
            Ok(resp) => resp.status().is_success() || resp.status().is_redirection(),
            Err(e) => {
                info!(proxy = %endpoint.url(), error = %e, "proxy probe failed");
                false
            }
        }
    }

    /// Probe every proxy a user has saved.
    pub async fn check_all(&self, db: &Db, user_id: i64) -> Result<Vec<(ProxyRecord, bool)>> {
        let proxies = QueryBuilder::list_proxies(db, user_id).await?;
        let mut results = Vec::with_capacity(proxies.len());
        for record in proxies {
            let healthy = self.check(&ProxyEndpoint::from_record(&record)).await;
            results.push((record, healthy));
        }
        Ok(results)
    }
}
