use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tidepool_agent::{
    actions::build_registry,
    loops::{run_action_loop, run_stats_loop},
    ActionContext, ActionRunner, StatsCollector
};
use tidepool_chain::provider::AlloyChainAdapter;
use tidepool_storage::{TaskStore, TimeSeriesStore};
use tidepool_types::config::{load_registry, Environment, Settings};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[clap(about = "Multi-chain liquidity provision agent")]
struct Cli {
    /// deployment-address file used outside production. defaults next to
    /// the data dir so dev setups stay self-contained
    #[clap(long, default_value = "./deployments/development.json")]
    deployments: PathBuf,
    /// collect one observation for the default chain (CHAIN_ID) and run
    /// one action tick, then exit. useful for debugging gates without
    /// letting the loops run
    #[clap(long)]
    once:        bool
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    let cli = Cli::parse();

    let settings = Settings::from_env()?;
    info!(environment = settings.environment.as_str(), "starting agent");

    let deployments = match settings.environment {
        Environment::Production => None,
        _ => Some(cli.deployments.as_path())
    };
    let registry = Arc::new(load_registry(settings.environment, deployments)?);
    if registry.is_empty() {
        eyre::bail!("no chains configured, check RPC_* environment variables");
    }
    // CHAIN_ID must name a configured chain before anything runs
    registry.get(settings.default_chain)?;

    std::fs::create_dir_all(&settings.data_dir)?;
    let tasks = Arc::new(TaskStore::open(&settings.data_file("tasks.db"))?);
    let timeseries = Arc::new(TimeSeriesStore::open(&settings.data_file("timeseries.db"))?);

    let adapter = Arc::new(AlloyChainAdapter::new(
        registry.clone(),
        settings.vault_private_key.as_deref(),
        None
    )?);

    let ctx = Arc::new(ActionContext {
        adapter:    adapter.clone(),
        registry:   registry.clone(),
        timeseries: timeseries.clone(),
        settings:   (&settings).into()
    });
    let definitions = build_registry(&ctx)?;
    info!(
        chains = registry.len(),
        definitions = definitions.len(),
        "registry initialized"
    );

    let runner = Arc::new(ActionRunner::new(tasks, definitions));
    let collector = Arc::new(StatsCollector::new(adapter, registry, timeseries));

    let token = CancellationToken::new();

    if cli.once {
        let config = ctx.registry.get(settings.default_chain)?;
        collector.collect_chain(config, &token).await?;
        let tick = runner.tick(&token).await?;
        info!(
            chain = config.id,
            started = tick.started,
            updated = tick.updated,
            "single pass done"
        );
        return Ok(())
    }

    let stats_loop = tokio::spawn(run_stats_loop(
        collector,
        settings.stats_interval,
        token.clone()
    ));
    let action_loop = tokio::spawn(run_action_loop(
        runner,
        settings.action_interval,
        settings.action_deadline,
        token.clone()
    ));

    shutdown_signal().await;
    info!("shutdown requested");
    token.cancel();

    stats_loop.await?;
    action_loop.await?;
    info!("agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
