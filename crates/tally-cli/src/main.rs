//! tally - Mend Renovate metrics exporter.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tally_core::app::{ControllerBuilder, Shutdown, server};
use tally_core::config::{Config, DEFAULT_CONFIG_PATH, LogConfig, LogFormat};
use tally_core::renovate::{self, PullStatusHandler, RenovateClient};
use tally_core::store;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Export Mend Renovate status as Prometheus metrics")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the exporter
    Run {
        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "TALLY_CONFIG")]
        config: PathBuf,

        /// Redis URL, enables multi-instance mode (overrides redis.url)
        #[arg(long, env = "TALLY_REDIS_URL")]
        redis_url: Option<String>,

        /// Renovate API token (overrides renovate.token)
        #[arg(long, env = "TALLY_RENOVATE_TOKEN", hide_env_values = true)]
        renovate_token: Option<String>,
    },

    /// Print the scheduling status of a running exporter
    Monitor {
        /// Introspection listener of the exporter
        #[arg(long, default_value = "127.0.0.1:8082", env = "TALLY_MONITOR_ADDRESS")]
        address: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            config,
            redis_url,
            renovate_token,
        } => run(config, redis_url, renovate_token).await,
        Commands::Monitor { address } => monitor(&address).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // logging may not be initialised yet
            eprintln!("error: {err:#}");
            error!(error = %format!("{err:#}"), "exiting");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: &Path, redis_url: Option<String>, renovate_token: Option<String>) -> Result<Config> {
    let mut config = Config::load(path)?;
    if redis_url.is_some() {
        config.redis.url = redis_url;
    }
    if renovate_token.is_some() {
        config.renovate.token = renovate_token;
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log.level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run(path: PathBuf, redis_url: Option<String>, renovate_token: Option<String>) -> Result<()> {
    let config = load_config(&path, redis_url, renovate_token)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    init_logging(&config.log);

    let store = store::connect(config.redis_url())
        .await
        .context("connecting to the store")?;

    let shutdown = Shutdown::new();
    let client = RenovateClient::new(config.renovate.url.clone(), config.renovate.token.clone());
    let pull = PullStatusHandler::new(client, config.sparse_metrics);
    let controller = Arc::new(
        ControllerBuilder::new(config.clone(), store)
            .shutdown(shutdown.clone())
            .register(renovate::task_type(), pull.into_handler())?
            .collectors(renovate::collectors())?
            .expect_tasks(&[renovate::TASK_TYPE_PULL_STATUS])
            .build()?,
    );

    let mut listeners = JoinSet::new();
    let public = server::public_router(Arc::clone(&controller));
    let address = config.server.listen_address.clone();
    let token = shutdown.token().clone();
    listeners.spawn(async move { (address.clone(), server::serve(&address, public, token).await) });

    if let Some(address) = config.server.internal_monitoring_listener_address.clone() {
        let monitoring = server::monitoring_router(Arc::clone(&controller));
        let token = shutdown.token().clone();
        listeners.spawn(async move { (address.clone(), server::serve(&address, monitoring, token).await) });
    }

    controller.schedule(renovate::task_type(), config.pull.metrics).await;

    tokio::select! {
        _ = wait_for_signal() => info!("signal received, shutting down"),
        _ = shutdown.token().cancelled() => {}
        Some(joined) = listeners.join_next() => {
            if let Ok((address, Err(err))) = joined {
                error!(address = %address, error = %err, "http listener failed");
                shutdown.fail(tally_core::TallyError::Listener { address, source: err });
            }
        }
    }

    controller.shutdown().await;
    while let Some(joined) = listeners.join_next().await {
        if let Ok((address, Err(err))) = joined {
            warn!(address = %address, error = %err, "http listener stopped with an error");
        }
    }

    if let Some(fatal) = shutdown.take_fatal() {
        return Err(fatal).context("fatal error");
    }
    info!("bye");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut terminate) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
            return;
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}

async fn monitor(address: &str) -> Result<()> {
    let url = format!("http://{address}/status");
    let status: serde_json::Value = reqwest::get(&url)
        .await
        .with_context(|| format!("calling {url}"))?
        .error_for_status()?
        .json()
        .await
        .context("decoding status")?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
