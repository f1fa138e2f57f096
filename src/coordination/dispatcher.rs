//! Command dispatcher
//!
//! Every command source (cluster watcher, control file, signals, HTTP API,
//! direct calls) funnels `CommandEvent`s into one queue. A single task drains
//! it into the lifecycle state machine, so transitions are applied one at a
//! time and cluster events keep their version order.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::lifecycle::{AgentLifecycle, EventOutcome};
use super::shutdown::ShutdownToken;
use crate::domain::{CommandEvent, ControlCommand};
use crate::error::{DroverError, Result};

/// Queue entry; `reply` is set when the sender waits for the outcome
pub struct CommandEnvelope {
    pub event: CommandEvent,
    pub reply: Option<oneshot::Sender<Result<EventOutcome>>>,
}

/// Clonable handle for submitting commands to the dispatcher
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<CommandEnvelope>,
}

impl ControlHandle {
    /// Submit an event and wait for the state machine's verdict
    pub async fn submit(&self, event: CommandEvent) -> Result<EventOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CommandEnvelope {
                event,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| DroverError::Internal("command queue closed".into()))?;

        reply_rx
            .await
            .map_err(|_| DroverError::Internal("dispatcher dropped the reply".into()))?
    }

    /// Submit without waiting for the outcome
    pub async fn send(&self, event: CommandEvent) -> Result<()> {
        self.tx
            .send(CommandEnvelope { event, reply: None })
            .await
            .map_err(|_| DroverError::Internal("command queue closed".into()))
    }

    pub async fn pause(&self) -> Result<EventOutcome> {
        self.submit(CommandEvent::local(ControlCommand::Pause)).await
    }

    pub async fn resume(&self) -> Result<EventOutcome> {
        self.submit(CommandEvent::local(ControlCommand::Running)).await
    }

    pub async fn shutdown(&self) -> Result<EventOutcome> {
        self.submit(CommandEvent::local(ControlCommand::Shutdown)).await
    }
}

/// Single consumer of the command queue
pub struct CommandDispatcher {
    lifecycle: Arc<AgentLifecycle>,
    rx: mpsc::Receiver<CommandEnvelope>,
}

/// Create the command queue and its dispatcher
pub fn command_channel(
    lifecycle: Arc<AgentLifecycle>,
    capacity: usize,
) -> (ControlHandle, CommandDispatcher) {
    let (tx, rx) = mpsc::channel(capacity);
    (ControlHandle { tx }, CommandDispatcher { lifecycle, rx })
}

impl CommandDispatcher {
    /// Drain the queue until every handle is dropped or the token fires
    pub async fn run(mut self, mut token: ShutdownToken) {
        info!("Command dispatcher started");

        loop {
            tokio::select! {
                envelope = self.rx.recv() => {
                    match envelope {
                        Some(envelope) => self.dispatch(envelope).await,
                        None => {
                            debug!("All control handles dropped");
                            break;
                        }
                    }
                }
                _ = token.cancelled() => {
                    debug!("Command dispatcher cancelled");
                    break;
                }
            }
        }

        info!("Command dispatcher stopped");
    }

    async fn dispatch(&self, envelope: CommandEnvelope) {
        let CommandEnvelope { event, reply } = envelope;
        let result = self.lifecycle.apply(&event).await;

        match reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    warn!("{} {} rejected: {}", event.source, event.command, e);
                }
            }
        }
    }
}
