//! tempo-runner - runs the built-in job hosts on the tempo scheduler.
//!
//! Usage:
//!   tempo-runner                      Start and run until Ctrl-C
//!   tempo-runner --filter PREFIX      Only register hosts under a type-path prefix
//!   tempo-runner --list               Print the registered jobs as JSON and exit

use clap::Parser;
use tempo_core::{config::DEFAULT_LOG_FILTER, TempoConfig};
use tempo_scheduler::Scheduler;
use tracing::{info, warn};

mod jobs;

/// tempo-runner - in-process cron scheduler demo
#[derive(Parser)]
#[command(name = "tempo-runner")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: $TEMPO_CONFIG, then ~/.tempo/tempo.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Only register job hosts whose type path starts with this prefix
    #[arg(short, long, value_name = "PREFIX")]
    filter: Option<String>,

    /// Print the registered jobs as JSON and exit without starting
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Config first: it supplies the log filter when RUST_LOG is unset.
    let loaded = TempoConfig::load(cli.config.as_deref());
    let filter = loaded
        .as_ref()
        .map(|c| c.logging.filter.clone())
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .init();

    let config = loaded.unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        TempoConfig::default()
    });

    let scheduler = Scheduler::new(config.scheduler.clone());
    let source = jobs::builtin_source();

    if cli.list {
        scheduler.register_source(&source, cli.filter.as_deref());
        println!("{}", serde_json::to_string_pretty(&scheduler.jobs())?);
        return Ok(());
    }

    let report = scheduler.schedule(&source, cli.filter.as_deref())?;
    info!(
        registered = report.registered.len(),
        rejected = report.rejected,
        grace_secs = config.scheduler.shutdown_grace_secs,
        "tempo runner started; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    scheduler.shutdown().await?;
    Ok(())
}
