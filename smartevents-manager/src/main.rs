mod wiring;

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use smartevents_config::{ConfigSource, ManagerConfig};
use smartevents_core::shard::{ShardResource, ShardResourceService};
use smartevents_core::work::WorkRuntime;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "smartevents-manager")]
#[command(
    about = "Reconciles bridges, processors and connectors with their external dependencies"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    args: CommonArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct CommonArgs {
    /// Configuration file (TOML or JSON). Overrides $SMARTEVENTS_CONFIG_PATH
    /// discovery.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Identity of this process in the work ledger (overrides config)
    #[arg(long, env = "SMARTEVENTS_WORKER_ID", global = true)]
    worker_id: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the dispatch and rebalance loops until interrupted (default)
    Run,
    /// Apply database migrations and exit
    Migrate,
    /// List resources the shard has to deploy or delete
    Pending {
        /// Shard to inspect (defaults to `shard_id` from config)
        #[arg(long)]
        shard: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.args)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Migrate => run_migrate(&config).await,
        Command::Pending { shard } => run_pending(&config, shard).await,
    }
}

fn load_config(args: &CommonArgs) -> anyhow::Result<ManagerConfig> {
    let (mut config, source) = match args.config.as_deref() {
        Some(path) => {
            let mut config = ManagerConfig::load_from_file(path)?;
            if let Ok(url) = std::env::var(smartevents_config::loader::DATABASE_URL_ENV)
                && !url.trim().is_empty()
            {
                config.database.url = Some(url);
            }
            (config, ConfigSource::File(path.to_path_buf()))
        }
        None => ManagerConfig::load_from_env().context("failed to load configuration")?,
    };
    if let Some(worker_id) = args.worker_id.clone() {
        config.work.worker_id = Some(worker_id);
    }
    config.validate()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,sqlx=warn,hyper=warn,reqwest=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &source {
        ConfigSource::Default => info!("using default configuration"),
        ConfigSource::EnvInline => info!("configuration loaded from inline environment json"),
        ConfigSource::EnvPath(path) | ConfigSource::File(path) => {
            info!(path = %path.display(), "configuration loaded from file")
        }
    }
    Ok(config)
}

async fn run(config: ManagerConfig) -> anyhow::Result<()> {
    let pool = wiring::connect(&config.database).await?;
    if let Some(pool) = pool.as_ref() {
        wiring::migrate(pool).await?;
    }
    let stores = wiring::stores(pool).await?;
    let manager = wiring::manager(&config, &stores)?;

    let runtime = WorkRuntime::new(manager);
    runtime.start().await.context("failed to start work runtime")?;
    info!(owner = %runtime.manager().owner_id(), "Manager running");

    wait_for_shutdown_signal().await;

    runtime.shutdown().await.context("work runtime shutdown failed")?;
    info!(
        skipped_dispatch_ticks = runtime.skipped_dispatch_ticks().await,
        "Manager stopped"
    );
    Ok(())
}

async fn run_migrate(config: &ManagerConfig) -> anyhow::Result<()> {
    let Some(pool) = wiring::connect(&config.database).await? else {
        bail!("database.url or DATABASE_URL must be set to run migrations");
    };
    wiring::migrate(&pool).await
}

async fn run_pending(config: &ManagerConfig, shard: Option<String>) -> anyhow::Result<()> {
    let shard = shard.unwrap_or_else(|| config.shard_id.clone());
    if shard.trim().is_empty() {
        bail!("no shard given; pass --shard or set shard_id in the configuration");
    }
    let Some(pool) = wiring::connect(&config.database).await? else {
        bail!("database.url or DATABASE_URL must be set to inspect a shard");
    };
    let stores = wiring::stores(Some(pool)).await?;
    let service = ShardResourceService::new(stores.resources);

    let pending = service.find_to_deploy_or_delete(&shard).await?;
    for resource in &pending {
        let kind = match resource {
            ShardResource::Bridge(_) => "bridge",
            ShardResource::Processor(_) => "processor",
        };
        println!("{kind}\t{}\t{}", resource.id(), resource.status());
    }
    info!(shard = %shard, count = pending.len(), "Listed pending shard resources");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Received Ctrl+C"),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
            },
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C");
    }
}
