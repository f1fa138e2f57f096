use anyhow::Context;
use clap::Parser;
use drover::cli::{self, Cli, Commands};
use drover::config::AppConfig;
use drover::logging::{init_logging, init_logging_simple};
use drover::runtime::{connect_backend, WorkerRuntime};
use drover::DroverError;
use tracing::{error, info};

/// Exit status when the in-flight batch outlives the shutdown grace period
const EXIT_SHUTDOWN_TIMEOUT: i32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    match cli.command {
        None | Some(Commands::Run) => run_worker(config).await,
        Some(Commands::Migrate) => {
            init_logging_simple();
            cli::run_migrations(&config).await
        }
        Some(Commands::Cluster { action }) => {
            init_logging_simple();
            cli::cluster_command(&config, action).await
        }
        Some(Commands::Local { command, file }) => cli::local_command(&config, command, file).await,
        Some(Commands::Signal { pid, command }) => cli::send_signal(pid, command),
        Some(Commands::Config) => cli::show_config(&config),
    }
}

async fn run_worker(config: AppConfig) -> anyhow::Result<()> {
    let guard = init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        anyhow::bail!("{} configuration error(s)", errors.len());
    }

    info!("drover {} starting", env!("CARGO_PKG_VERSION"));
    let backend = connect_backend(&config)
        .await
        .context("Failed to initialise the control store")?;

    let result = WorkerRuntime::new(config, backend.store, backend.processor)
        .run()
        .await;

    match result {
        Ok(()) => Ok(()),
        Err(e @ DroverError::ShutdownTimeout { .. }) => {
            error!("{}", e);
            drop(guard);
            std::process::exit(EXIT_SHUTDOWN_TIMEOUT);
        }
        Err(e) => Err(e.into()),
    }
}
