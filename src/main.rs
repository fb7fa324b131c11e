use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tiered_limiter::config::{AppConfig, StoreConfig};
use tiered_limiter::{Limiter, MemoryStore, RedisExecutor, ScriptExecutor, Tier};

/// Multi-tier rate limiter backed by Redis.
#[derive(Parser)]
#[command(name = "tiered-limiter")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, overrides RUST_LOG (e.g. `debug`, `tiered_limiter=trace`)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a request for an identifier and print the binding tier.
    ///
    /// Exits with status 1 when the identifier is over its limit.
    Get {
        /// Identifier to limit
        id: String,

        /// Tier as `<quota>:<window-ms>`, in evaluation order
        #[arg(long = "tier", value_name = "Q:W", conflicts_with = "policy")]
        tiers: Vec<Tier>,

        /// Named policy from the configuration file
        #[arg(long)]
        policy: Option<String>,
    },

    /// Delete all counters of an identifier.
    Remove {
        /// Identifier to reset
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean JSON.
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    debug!(?config, "Configuration loaded");

    let executor = connect(&config.store).await?;
    let limiter = Limiter::new(config.limiter.clone());
    limiter.connect(executor);

    match cli.command {
        Commands::Get { id, tiers, policy } => {
            let tiers = match policy {
                Some(name) => config.policy(&name)?.to_vec(),
                None => tiers,
            };

            let limit = limiter.get(&id, &tiers).await?;
            println!("{}", serde_json::to_string(&limit)?);

            if limit.is_allowed() {
                Ok(ExitCode::SUCCESS)
            } else {
                info!(id = %id, reset = limit.reset, "Over limit");
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Remove { id } => {
            let removed = limiter.remove(&id).await?;
            println!("{removed}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Build the store executor selected by configuration.
async fn connect(store: &StoreConfig) -> anyhow::Result<Arc<dyn ScriptExecutor>> {
    let executor: Arc<dyn ScriptExecutor> = match store {
        StoreConfig::Memory => {
            info!("Using in-memory store, counters are not shared");
            Arc::new(MemoryStore::new())
        }
        StoreConfig::Redis(redis) => Arc::new(
            RedisExecutor::connect(redis)
                .await
                .with_context(|| format!("failed to connect to {}", redis.url))?,
        ),
        StoreConfig::Cluster(cluster) => Arc::new(
            RedisExecutor::connect_cluster(&cluster.nodes)
                .await
                .context("failed to connect to Redis Cluster")?,
        ),
    };
    Ok(executor)
}
