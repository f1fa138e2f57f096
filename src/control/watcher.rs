//! Cluster Control Watcher
//!
//! Observes the shared control record and turns every newly seen version into
//! exactly one cluster `CommandEvent` on the command queue.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::strategy::{read_record, PollWatch, PushWatch, WatchMode, WatchStrategy};
use crate::adapters::ControlStore;
use crate::coordination::{ControlHandle, EventOutcome, ExponentialBackoff, ShutdownToken};
use crate::domain::{CommandEvent, ControlRecord};

/// Watcher tuning
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Try push notifications before falling back to polling
    pub enable_push: bool,
    pub poll_interval: Duration,
    pub read_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enable_push: true,
            poll_interval: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

pub struct ClusterControlWatcher {
    store: Arc<dyn ControlStore>,
    config: WatcherConfig,
    handle: ControlHandle,
    last_emitted: i64,
    mode_tx: watch::Sender<Option<WatchMode>>,
}

impl ClusterControlWatcher {
    pub fn new(store: Arc<dyn ControlStore>, config: WatcherConfig, handle: ControlHandle) -> Self {
        let (mode_tx, _) = watch::channel(None);
        Self {
            store,
            config,
            handle,
            last_emitted: -1,
            mode_tx,
        }
    }

    /// Current watch mode; `None` until the capability probe ran
    pub fn mode_receiver(&self) -> watch::Receiver<Option<WatchMode>> {
        self.mode_tx.subscribe()
    }

    /// Highest version handed to the dispatcher so far
    pub fn last_emitted(&self) -> i64 {
        self.last_emitted
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.config.backoff_base, self.config.backoff_max).with_jitter()
    }

    /// Synchronous startup read, applied before the execution loop starts.
    ///
    /// An unreachable store is logged and left to the main loop; the instance
    /// keeps its initial RUNNING state meanwhile.
    pub async fn initial_sync(&mut self) -> Option<EventOutcome> {
        match read_record(self.store.as_ref(), self.config.read_timeout).await {
            Ok(record) => {
                info!(
                    "Initial control state: {} (v{})",
                    record.command, record.version
                );
                self.observe(record).await
            }
            Err(e) => {
                warn!("Initial control sync failed, continuing under last-known command: {}", e);
                None
            }
        }
    }

    fn poll_strategy(&self) -> Box<dyn WatchStrategy> {
        Box::new(PollWatch::new(
            Arc::clone(&self.store),
            self.config.poll_interval,
            self.config.read_timeout,
            self.backoff(),
        ))
    }

    /// Probe push capability by opening a subscription
    async fn select_strategy(&self) -> Box<dyn WatchStrategy> {
        if !self.config.enable_push {
            info!("Push notifications disabled by configuration");
            return self.poll_strategy();
        }

        let push = PushWatch::new(
            Arc::clone(&self.store),
            self.config.read_timeout,
            self.backoff(),
        );
        match self.store.subscribe().await {
            Ok(subscription) => Box::new(push.with_subscription(subscription)),
            Err(e) if e.is_capability_unavailable() => {
                info!("Push notifications unavailable ({}), falling back to polling", e);
                self.poll_strategy()
            }
            Err(e) => {
                // Transient: stay in push mode and let the strategy retry
                warn!("Capability probe failed: {}", e);
                Box::new(push)
            }
        }
    }

    fn announce(&self, mode: WatchMode) {
        self.mode_tx.send_replace(Some(mode));
        match mode {
            WatchMode::Push => info!("Cluster control watcher using PUSH mode"),
            WatchMode::Poll => info!(
                "Cluster control watcher using POLL mode (every {:?})",
                self.config.poll_interval
            ),
        }
    }

    /// Forward a record if it carries a version not emitted before.
    ///
    /// Returns the dispatcher's verdict, or `None` when suppressed.
    async fn observe(&mut self, record: ControlRecord) -> Option<EventOutcome> {
        if record.version <= self.last_emitted {
            debug!(
                "Control record v{} already emitted (last v{})",
                record.version, self.last_emitted
            );
            return None;
        }
        match self.handle.submit(CommandEvent::cluster(&record)).await {
            Ok(outcome) => {
                self.last_emitted = record.version;
                debug!("Cluster command v{} -> {:?}", record.version, outcome);
                Some(outcome)
            }
            Err(e) => {
                warn!("Cluster command v{} not applied: {}", record.version, e);
                None
            }
        }
    }

    /// Main loop; runs until the token fires
    pub async fn run(mut self, mut token: ShutdownToken) {
        let mut strategy = self.select_strategy().await;
        self.announce(strategy.mode());

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                result = strategy.next_record() => match result {
                    Ok(record) => {
                        self.observe(record).await;
                    }
                    Err(e)
                        if e.is_capability_unavailable() && strategy.mode() == WatchMode::Push =>
                    {
                        // Permanent for the lifetime of the process
                        warn!("Push watch lost capability ({}), downgrading to polling", e);
                        strategy = self.poll_strategy();
                        self.announce(WatchMode::Poll);
                    }
                    Err(e) => {
                        warn!("Control watch error: {}", e);
                        tokio::time::sleep(self.config.backoff_base).await;
                    }
                }
            }
        }

        info!("Cluster control watcher stopped");
    }
}
