use anyhow::Result;
use clap::{Parser, Subcommand};
use cohort_orchestrator::{
    Action, ActivityWindow, BatchConfig, DatabaseConfig, DryRunClient, LoopScope, NewSession,
    Orchestrator, TargetLink, TracingSink, create_orchestrator, load_settings,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use surrealdb::RecordId;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cohort-orchestrator")]
#[command(about = "Multi-session action orchestrator (batches run against the dry-run client; real deployments supply a NetworkClient through the library)")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init {
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
    /// Register a session from an existing authentication artifact
    ImportSession {
        #[arg(long)]
        user: i64,
        /// Display label, e.g. the account's phone number
        #[arg(long)]
        label: String,
        #[arg(long)]
        api_id: i64,
        #[arg(long)]
        api_hash: String,
        /// Path to the artifact blob produced by the authentication flow
        #[arg(long)]
        artifact: PathBuf,
        /// Enroll the session in background loops right away
        #[arg(long, default_value_t = false)]
        active: bool,
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
    /// List a user's sessions
    Sessions {
        #[arg(long)]
        user: i64,
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
    /// Save a proxy binding
    AddProxy {
        #[arg(long)]
        user: i64,
        /// socks5 or http
        #[arg(long, default_value = "socks5")]
        scheme: String,
        #[arg(long)]
        host: String,
        #[arg(long)]
        port: u16,
        #[arg(long)]
        login: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
    /// Probe every saved proxy and report health
    CheckProxies {
        #[arg(long)]
        user: i64,
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
    /// Partition a user's sessions into cohorts
    Partition {
        #[arg(long)]
        user: i64,
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
    /// List a user's flows
    Flows {
        #[arg(long)]
        user: i64,
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
    /// Join a channel across the scope's sessions
    Join {
        /// Target link, e.g. https://t.me/example or https://t.me/+hash
        link: String,
        #[arg(long)]
        user: i64,
        /// Restrict to one flow (record key); all sessions otherwise
        #[arg(long)]
        flow: Option<String>,
        /// Chunked concurrent dispatch instead of strictly sequential
        #[arg(long, default_value_t = false)]
        parallel: bool,
        /// Stop after this many successes
        #[arg(long)]
        count: Option<usize>,
        #[arg(long)]
        min_delay_secs: Option<u64>,
        #[arg(long)]
        max_delay_secs: Option<u64>,
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
    /// Leave a channel across the scope's sessions
    Leave {
        link: String,
        #[arg(long)]
        user: i64,
        #[arg(long)]
        flow: Option<String>,
        #[arg(long, default_value_t = false)]
        parallel: bool,
        #[arg(long)]
        count: Option<usize>,
        #[arg(long)]
        min_delay_secs: Option<u64>,
        #[arg(long)]
        max_delay_secs: Option<u64>,
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
    /// Broadcast a message from every session in scope
    Broadcast {
        text: String,
        #[arg(long)]
        user: i64,
        #[arg(long)]
        flow: Option<String>,
        #[arg(long, default_value_t = false)]
        parallel: bool,
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
    /// Run a keep-alive loop gated by a daily activity window (ctrl-c stops)
    KeepAlive {
        /// Activity window, e.g. 09:00-18:00 or 22:00-06:00
        #[arg(long)]
        window: String,
        #[arg(long)]
        user: i64,
        #[arg(long)]
        flow: Option<String>,
        #[arg(long)]
        period_secs: Option<u64>,
        #[arg(long, default_value = "memory")]
        db_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("cohort_orchestrator=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url } => {
            let db = cohort_orchestrator::create_connection(DatabaseConfig::with_url(db_url))
                .await?;
            cohort_orchestrator::ensure_schema(&db).await?;
            info!("schema ready");
        }
        Commands::ImportSession {
            user,
            label,
            api_id,
            api_hash,
            artifact,
            active,
            db_url,
        } => {
            let orchestrator = build(db_url).await?;
            let blob = tokio::fs::read(&artifact).await?;
            let record = orchestrator
                .pool()
                .register(NewSession {
                    user_id: user,
                    label,
                    api_id,
                    api_hash,
                    proxy_id: None,
                    is_active: active,
                    artifact_blob: blob,
                })
                .await?;
            println!("registered session {} ({})", record.label, record.id);
        }
        Commands::Sessions { user, db_url } => {
            let orchestrator = build(db_url).await?;
            for session in orchestrator.pool().list(user).await? {
                println!(
                    "{}  {}  proxy={}  active={}",
                    session.id,
                    session.label,
                    session
                        .proxy_id
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    session.is_active
                );
            }
        }
        Commands::AddProxy {
            user,
            scheme,
            host,
            port,
            login,
            password,
            db_url,
        } => {
            let orchestrator = build(db_url).await?;
            let record = cohort_orchestrator::QueryBuilder::create_proxy(
                orchestrator.db(),
                &cohort_orchestrator::ProxyCreate {
                    user_id: user,
                    scheme,
                    host,
                    port,
                    login,
                    password,
                },
            )
            .await?;
            println!("saved proxy {}", record.id);
        }
        Commands::CheckProxies { user, db_url } => {
            let orchestrator = build(db_url).await?;
            for (proxy, healthy) in orchestrator.check_proxies(user).await? {
                println!(
                    "{}://{}:{}  {}",
                    proxy.scheme,
                    proxy.host,
                    proxy.port,
                    if healthy { "ok" } else { "unreachable" }
                );
            }
        }
        Commands::Partition { user, db_url } => {
            let orchestrator = build(db_url).await?;
            let flows = orchestrator.auto_partition(user).await?;
            for flow in flows {
                println!("created {}", flow.name);
            }
        }
        Commands::Flows { user, db_url } => {
            let orchestrator = build(db_url).await?;
            for flow in cohort_orchestrator::QueryBuilder::list_flows(orchestrator.db(), user)
                .await?
            {
                println!("{}  {}", flow.id, flow.name);
            }
        }
        Commands::Join {
            link,
            user,
            flow,
            parallel,
            count,
            min_delay_secs,
            max_delay_secs,
            db_url,
        } => {
            let target = TargetLink::parse(&link)?;
            run_batch(
                Action::Join(target),
                BatchArgs {
                    db_url,
                    user,
                    flow,
                    parallel,
                    count,
                    min_delay_secs,
                    max_delay_secs,
                },
            )
            .await?;
        }
        Commands::Leave {
            link,
            user,
            flow,
            parallel,
            count,
            min_delay_secs,
            max_delay_secs,
            db_url,
        } => {
            let target = TargetLink::parse(&link)?;
            run_batch(
                Action::Leave(target),
                BatchArgs {
                    db_url,
                    user,
                    flow,
                    parallel,
                    count,
                    min_delay_secs,
                    max_delay_secs,
                },
            )
            .await?;
        }
        Commands::Broadcast {
            text,
            user,
            flow,
            parallel,
            db_url,
        } => {
            run_batch(
                Action::Broadcast { text },
                BatchArgs {
                    db_url,
                    user,
                    flow,
                    parallel,
                    count: None,
                    min_delay_secs: None,
                    max_delay_secs: None,
                },
            )
            .await?;
        }
        Commands::KeepAlive {
            window,
            user,
            flow,
            period_secs,
            db_url,
        } => {
            let window = ActivityWindow::parse(&window)?;
            let orchestrator = build(db_url).await?;
            let scope = scope_for(user, flow);

            orchestrator
                .start_keepalive(
                    scope.clone(),
                    window,
                    period_secs.map(Duration::from_secs),
                    false,
                    Arc::new(TracingSink),
                )
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            info!(window = %window, "keep-alive loop running, ctrl-c to stop");

            tokio::signal::ctrl_c().await?;
            orchestrator.stop(&scope);
            info!("loop stopped");
        }
    }

    Ok(())
}

async fn build(db_url: String) -> Result<Arc<Orchestrator>> {
    let settings = load_settings()?;
    create_orchestrator(
        DatabaseConfig::with_url(db_url),
        settings,
        Arc::new(DryRunClient),
    )
    .await
}

fn scope_for(user: i64, flow: Option<String>) -> LoopScope {
    match flow {
        Some(key) => LoopScope::flow(user, RecordId::from_table_key("flow", key)),
        None => LoopScope::all_sessions(user),
    }
}

struct BatchArgs {
    db_url: String,
    user: i64,
    flow: Option<String>,
    parallel: bool,
    count: Option<usize>,
    min_delay_secs: Option<u64>,
    max_delay_secs: Option<u64>,
}

async fn run_batch(action: Action, args: BatchArgs) -> Result<()> {
    let orchestrator = build(args.db_url).await?;
    let scope = scope_for(args.user, args.flow);

    let mut cfg = BatchConfig::from_settings(orchestrator.settings());
    cfg.parallel = args.parallel;
    cfg.target_count = args.count;
    if let Some(secs) = args.min_delay_secs {
        cfg.min_delay = Duration::from_secs(secs);
    }
    if let Some(secs) = args.max_delay_secs {
        cfg.max_delay = Duration::from_secs(secs);
    }

    let summary = orchestrator
        .run_batch(&scope, action, cfg, Arc::new(TracingSink))
        .await?;
    println!(
        "done: {} succeeded, {} failed, {} skipped",
        summary.succeeded, summary.failed, summary.skipped
    );
    Ok(())
}
