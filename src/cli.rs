use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use crate::adapters::PostgresControlStore;
use crate::config::{AppConfig, StoreBackend};
use crate::control::{write_control_file, ClusterControl};
use crate::domain::{ControlCommand, ControlRecord};

#[derive(Parser)]
#[command(name = "drover")]
#[command(version)]
#[command(
    about = "Batch worker with cluster-wide and local pause/resume/shutdown control",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config directory (default.toml plus $DROVER_ENV.toml)
    #[arg(short, long, default_value = "config", env = "DROVER_CONFIG_DIR")]
    pub config: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the worker (default)
    Run,
    /// Apply database migrations and exit
    Migrate,
    /// Read or change the cluster-wide control record
    Cluster {
        #[command(subcommand)]
        action: ClusterAction,
    },
    /// Write a command into the local control file
    Local {
        #[arg(value_enum)]
        command: LocalCommand,
        /// Control file path (defaults to local.control_file)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Send a control signal to a running worker
    Signal {
        /// Worker process id
        #[arg(long)]
        pid: i32,
        #[arg(value_enum)]
        command: SignalCommand,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
pub enum ClusterAction {
    /// Pause every instance
    Pause(ClusterWriteArgs),
    /// Resume every instance
    Resume(ClusterWriteArgs),
    /// Shut every instance down
    Shutdown(ClusterWriteArgs),
    /// Show the current control record
    Status,
}

#[derive(clap::Args)]
pub struct ClusterWriteArgs {
    /// Free-text reason stored with the record
    #[arg(long)]
    pub reason: Option<String>,
    /// Operator identity stored with the record
    #[arg(long = "by")]
    pub updated_by: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LocalCommand {
    Pause,
    Resume,
    Running,
    Shutdown,
}

impl From<LocalCommand> for ControlCommand {
    fn from(command: LocalCommand) -> Self {
        match command {
            LocalCommand::Pause => ControlCommand::Pause,
            LocalCommand::Resume | LocalCommand::Running => ControlCommand::Running,
            LocalCommand::Shutdown => ControlCommand::Shutdown,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SignalCommand {
    Pause,
    Resume,
    Shutdown,
}

async fn connect_postgres(config: &AppConfig) -> anyhow::Result<PostgresControlStore> {
    if config.store.backend != StoreBackend::Postgres {
        bail!("this command needs the postgres backend (store.backend = \"postgres\")");
    }
    let url = config
        .store
        .database_url
        .as_deref()
        .context("store.database_url is not set")?;
    let store = PostgresControlStore::connect(url, 2, &config.store.record_key)
        .await
        .context("Failed to connect to the control store")?;
    Ok(store)
}

/// Apply the bundled migrations
pub async fn run_migrations(config: &AppConfig) -> anyhow::Result<()> {
    let store = connect_postgres(config).await?;
    store.migrate().await?;
    println!("Migrations applied");
    Ok(())
}

/// Execute a `cluster` subcommand
pub async fn cluster_command(config: &AppConfig, action: ClusterAction) -> anyhow::Result<()> {
    let store = connect_postgres(config).await?;
    let cluster = ClusterControl::new(Arc::new(store), config.control.cas_max_retries);

    let (command, args) = match action {
        ClusterAction::Status => {
            let record = cluster.cluster_state().await?;
            print_record(&record);
            return Ok(());
        }
        ClusterAction::Pause(args) => (ControlCommand::Pause, args),
        ClusterAction::Resume(args) => (ControlCommand::Running, args),
        ClusterAction::Shutdown(args) => (ControlCommand::Shutdown, args),
    };

    let updated_by = args.updated_by.or_else(default_operator);
    let record = cluster
        .set_command(command, args.reason, updated_by)
        .await
        .with_context(|| format!("Failed to set cluster command to {}", command))?;

    println!("Cluster command set to {} (v{})", record.command, record.version);
    Ok(())
}

/// Execute a `local` subcommand
pub async fn local_command(
    config: &AppConfig,
    command: LocalCommand,
    file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let path = file.unwrap_or_else(|| config.local.control_file.clone());
    let command = ControlCommand::from(command);
    write_control_file(&path, &command.as_str().to_uppercase())
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {} to {}", command.as_str().to_uppercase(), path.display());
    Ok(())
}

/// Execute a `signal` subcommand
#[cfg(unix)]
pub fn send_signal(pid: i32, command: SignalCommand) -> anyhow::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let signal = match command {
        SignalCommand::Pause => Signal::SIGUSR1,
        SignalCommand::Resume => Signal::SIGUSR2,
        SignalCommand::Shutdown => Signal::SIGTERM,
    };
    kill(Pid::from_raw(pid), signal)
        .with_context(|| format!("Failed to send {} to PID {}", signal, pid))?;
    println!("Sent {} to PID {}", signal, pid);
    Ok(())
}

#[cfg(not(unix))]
pub fn send_signal(pid: i32, _command: SignalCommand) -> anyhow::Result<()> {
    bail!(
        "Signal handling not supported on this platform; use `drover local` instead (PID {})",
        pid
    )
}

/// Print the effective configuration without secrets
pub fn show_config(config: &AppConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&config.public())?);
    if let Err(errors) = config.validate() {
        println!();
        println!("Configuration problems:");
        for error in errors {
            println!("  - {}", error);
        }
    }
    Ok(())
}

fn print_record(record: &ControlRecord) {
    println!("key:        {}", record.key);
    println!("command:    {}", record.command);
    println!("version:    {}", record.version);
    println!("updated_at: {}", record.timestamp);
    println!(
        "updated_by: {}",
        record.updated_by.as_deref().unwrap_or("-")
    );
    println!("reason:     {}", record.reason.as_deref().unwrap_or("-"));
}

fn default_operator() -> Option<String> {
    std::env::var("USER").ok().map(|user| format!("cli:{}", user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cluster_pause_with_reason() {
        let cli = Cli::try_parse_from([
            "drover", "cluster", "pause", "--reason", "deploy", "--by", "ops",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Cluster {
                action: ClusterAction::Pause(args),
            }) => {
                assert_eq!(args.reason.as_deref(), Some("deploy"));
                assert_eq!(args.updated_by.as_deref(), Some("ops"));
            }
            _ => panic!("expected cluster pause"),
        }
    }

    #[test]
    fn test_parse_local_resume_maps_to_running() {
        let cli = Cli::try_parse_from(["drover", "local", "resume"]).unwrap();
        match cli.command {
            Some(Commands::Local { command, file }) => {
                assert_eq!(ControlCommand::from(command), ControlCommand::Running);
                assert!(file.is_none());
            }
            _ => panic!("expected local command"),
        }
    }

    #[test]
    fn test_default_command_is_none() {
        let cli = Cli::try_parse_from(["drover"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("config"));
    }

    #[test]
    fn test_signal_requires_pid() {
        assert!(Cli::try_parse_from(["drover", "signal", "pause"]).is_err());
        assert!(Cli::try_parse_from(["drover", "signal", "--pid", "42", "shutdown"]).is_ok());
    }

    #[tokio::test]
    async fn test_local_command_writes_uppercase() {
        let dir = std::env::temp_dir().join(format!("drover-cli-{}", uuid::Uuid::new_v4()));
        let path = dir.join("state");
        let config = AppConfig::in_memory();

        local_command(&config, LocalCommand::Pause, Some(path.clone()))
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.trim(), "PAUSE");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
