//! Local Control Surface
//!
//! Per-instance inputs: OS signals and a control file. Both produce local
//! `CommandEvent`s, which never carry a cluster version.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::coordination::{ControlHandle, ShutdownToken};
use crate::domain::{CommandEvent, ControlCommand};

/// Polls a file whose content is a local command
pub struct ControlFilePoller {
    path: PathBuf,
    interval: Duration,
    handle: ControlHandle,
    last_content: Option<String>,
    rejected: Option<String>,
}

impl ControlFilePoller {
    pub fn new(path: impl Into<PathBuf>, interval: Duration, handle: ControlHandle) -> Self {
        Self {
            path: path.into(),
            interval,
            handle,
            last_content: None,
            rejected: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file once and act if its content changed
    pub async fn check(&mut self) {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw.trim().to_lowercase(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // A later write of the same value counts as a new change
                self.last_content = None;
                return;
            }
            Err(e) => {
                warn!("Failed to read control file {}: {}", self.path.display(), e);
                return;
            }
        };

        if self.last_content.as_deref() == Some(content.as_str()) {
            return;
        }

        if content.is_empty() {
            self.last_content = Some(content);
            return;
        }

        let command = match content.parse::<ControlCommand>() {
            Ok(command) => command,
            Err(_) => {
                warn!("Unknown control file command: {}", content);
                self.last_content = Some(content);
                return;
            }
        };

        let retry = self.rejected.as_deref() == Some(content.as_str());
        if !retry {
            info!("Control file command detected: {}", content);
        }
        match self.handle.submit(CommandEvent::local(command)).await {
            Ok(outcome) => {
                debug!("Control file {} -> {:?}", command, outcome);
                self.last_content = Some(content);
                self.rejected = None;
            }
            Err(e) => {
                // A rejected command stays pending until the state allows it
                if retry {
                    debug!("Control file command {} still rejected: {}", command, e);
                } else {
                    warn!("Control file command {} rejected: {}", command, e);
                }
                self.last_content = None;
                self.rejected = Some(content);
            }
        }
    }

    pub async fn run(mut self, mut token: ShutdownToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(
            "Watching control file {} every {:?}",
            self.path.display(),
            self.interval
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.check().await,
            }
        }

        debug!("Control file poller stopped");
    }
}

/// Write a command into a control file, creating the parent directory
pub async fn write_control_file(path: &Path, command: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, format!("{}\n", command)).await
}

/// Install SIGUSR1 (pause), SIGUSR2 (resume), SIGTERM and SIGINT (shutdown)
#[cfg(unix)]
pub fn install_signal_handlers(handle: ControlHandle, token: ShutdownToken) -> Vec<JoinHandle<()>> {
    use tokio::signal::unix::SignalKind;

    [
        (SignalKind::user_defined1(), "SIGUSR1", ControlCommand::Pause),
        (SignalKind::user_defined2(), "SIGUSR2", ControlCommand::Running),
        (SignalKind::terminate(), "SIGTERM", ControlCommand::Shutdown),
        (SignalKind::interrupt(), "SIGINT", ControlCommand::Shutdown),
    ]
    .into_iter()
    .filter_map(|(kind, name, command)| {
        spawn_signal_listener(kind, name, command, handle.clone(), token.clone())
    })
    .collect()
}

#[cfg(unix)]
fn spawn_signal_listener(
    kind: tokio::signal::unix::SignalKind,
    name: &'static str,
    command: ControlCommand,
    handle: ControlHandle,
    mut token: ShutdownToken,
) -> Option<JoinHandle<()>> {
    let mut stream = match tokio::signal::unix::signal(kind) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to install {} handler: {}", name, e);
            return None;
        }
    };

    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = stream.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("Received {}", name);
                    if let Err(e) = handle.submit(CommandEvent::local(command)).await {
                        warn!("{} ignored: {}", name, e);
                    }
                }
            }
        }
    }))
}

#[cfg(not(unix))]
pub fn install_signal_handlers(
    handle: ControlHandle,
    mut token: ShutdownToken,
) -> Vec<JoinHandle<()>> {
    vec![tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!("Received Ctrl+C");
                    let _ = handle.submit(CommandEvent::local(ControlCommand::Shutdown)).await;
                }
            }
        }
    })]
}
