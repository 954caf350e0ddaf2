// Core modules
mod artifact;
mod batch;
mod config;
mod db;
mod executor;
mod flows;
mod pool;
mod progress;
mod proxy;
mod registry;
mod scheduler;
mod target;
mod window;

// The facade over all of the above
mod orchestrator;

#[cfg(test)]
mod testing;

// Re-export key types and functions
pub use artifact::ArtifactStore;
pub use batch::{BatchConfig, BatchRunner, BatchSummary};
pub use config::{OrchestratorSettings, load_settings};
pub use db::{
    DatabaseConfig, Db, FlowRecord, ProxyCreate, ProxyRecord, QueryBuilder, SessionRecord,
    create_connection, ensure_schema,
};
pub use executor::{
    Action, ActionExecutor, ActionResult, DryRunClient, NetError, NetworkClient,
    NetworkConnection, SessionGuard,
};
pub use flows::{FlowError, auto_partition, create_flow, random_flow};
pub use orchestrator::Orchestrator;
pub use pool::{NewSession, SessionPool};
pub use progress::{ChannelSink, ProgressEvent, ProgressSink, TracingSink};
pub use proxy::{ProxyChecker, ProxyEndpoint};
pub use registry::{LoopRegistry, LoopScope, RegistryError, ScopeTarget};
pub use scheduler::{KeepAliveScheduler, LoopHandle};
pub use target::{TargetLink, TargetLinkError};
pub use window::{ActivityWindow, WindowError};

use anyhow::Result;
use std::sync::Arc;

/// Convenience function to create a fully configured orchestrator.
///
/// Connects to the database, ensures the schema, and wires the session
/// pool, executor, scheduler, and cancellation registry around the given
/// network client.
pub async fn create_orchestrator(
    db_config: DatabaseConfig,
    settings: OrchestratorSettings,
    client: Arc<dyn NetworkClient>,
) -> Result<Arc<Orchestrator>> {
    let orchestrator = Orchestrator::new(db_config, settings, client).await?;
    Ok(Arc::new(orchestrator))
}
