//! Worker runtime
//!
//! Wires the per-instance tasks together and owns the startup and shutdown
//! sequence:
//!
//! 1. command dispatcher
//! 2. startup sync of the cluster control record (applied before any batch)
//! 3. watcher, heartbeat, control file poller, signal listeners, HTTP API
//! 4. execution loop
//! 5. on STOPPING: drain the loop within the grace timeout, cancel the
//!    background tasks, transition to STOPPED and remove the health artifacts

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::adapters::{ControlStore, InMemoryControlStore, PostgresControlStore};
use crate::api::{ApiServer, AppState};
use crate::config::{AppConfig, StoreBackend};
use crate::control::{
    install_signal_handlers, ClusterControl, ClusterControlWatcher, ControlFilePoller, WatchMode,
};
use crate::coordination::{command_channel, AgentLifecycle, ControlHandle, GracefulShutdown};
use crate::domain::AgentState;
use crate::error::{DroverError, Result};
use crate::services::{HealthFiles, HeartbeatEmitter, Metrics};
use crate::supervisor::Supervisor;
use crate::worker::{BatchLoop, BatchProcessor, IdleProcessor, PostgresTriggerProcessor};

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Control store plus the processor that pulls work from the same backend
pub struct Backend {
    pub store: Arc<dyn ControlStore>,
    pub processor: Arc<dyn BatchProcessor>,
}

/// Build the configured backend; Postgres migrations run on connect
pub async fn connect_backend(config: &AppConfig) -> Result<Backend> {
    match config.store.backend {
        StoreBackend::Postgres => {
            let url = config.store.database_url.as_deref().ok_or_else(|| {
                DroverError::Validation(
                    "store.database_url is required for the postgres backend".into(),
                )
            })?;
            let store = PostgresControlStore::connect(
                url,
                config.store.max_connections,
                &config.store.record_key,
            )
            .await?
            .with_push(config.control.enable_push);
            store.migrate().await?;

            let processor =
                PostgresTriggerProcessor::new(store.pool().clone(), config.worker.batch_size);
            Ok(Backend {
                store: Arc::new(store),
                processor: Arc::new(processor),
            })
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory control store; cluster control is process-local");
            let store = if config.control.enable_push {
                InMemoryControlStore::new(config.store.record_key.clone())
            } else {
                InMemoryControlStore::without_push(config.store.record_key.clone())
            };
            Ok(Backend {
                store: Arc::new(store),
                processor: Arc::new(IdleProcessor),
            })
        }
    }
}

pub struct WorkerRuntime {
    config: AppConfig,
    store: Arc<dyn ControlStore>,
    processor: Arc<dyn BatchProcessor>,
}

impl WorkerRuntime {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ControlStore>,
        processor: Arc<dyn BatchProcessor>,
    ) -> Self {
        Self {
            config,
            store,
            processor,
        }
    }

    /// Run until the instance reaches STOPPED
    pub async fn run(self) -> Result<()> {
        self.start().await?.wait().await
    }

    /// Start every task; the returned handle drives the shutdown sequence
    pub async fn start(self) -> Result<RunningWorker> {
        let config = self.config;
        let lifecycle = Arc::new(AgentLifecycle::new());
        let shutdown = GracefulShutdown::new(config.worker.shutdown_config());
        let files = HealthFiles::new(&config.health.dir);
        let metrics = Arc::new(Metrics::new());
        let mut background: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        info!(
            "Starting worker {} (backend: {:?}, record: {})",
            config.instance_id, config.store.backend, config.store.record_key
        );

        // Metrics first so no transition goes uncounted
        let tracker = Arc::clone(&metrics);
        let events = lifecycle.subscribe();
        let token = shutdown.token();
        background.push((
            "metrics",
            tokio::spawn(async move { tracker.track(events, token).await }),
        ));

        let (control, dispatcher) = command_channel(Arc::clone(&lifecycle), COMMAND_QUEUE_CAPACITY);
        background.push(("dispatcher", tokio::spawn(dispatcher.run(shutdown.token()))));

        let mut watcher = ClusterControlWatcher::new(
            Arc::clone(&self.store),
            config.control.watcher_config(),
            control.clone(),
        );
        let watch_mode = watcher.mode_receiver();
        if config.control.enabled {
            watcher.initial_sync().await;
            background.push(("watcher", tokio::spawn(watcher.run(shutdown.token()))));
        } else {
            info!("Cluster control disabled; only local commands apply");
        }

        let emitter = HeartbeatEmitter::new(
            Arc::clone(&lifecycle),
            files.clone(),
            Duration::from_secs(config.health.heartbeat_interval_secs),
            config.instance_id.clone(),
        );
        background.push(("heartbeat", tokio::spawn(emitter.run(shutdown.token()))));

        let poller = ControlFilePoller::new(
            &config.local.control_file,
            Duration::from_millis(config.local.file_poll_interval_ms),
            control.clone(),
        );
        background.push(("control file poller", tokio::spawn(poller.run(shutdown.token()))));

        if config.local.signals {
            for handle in install_signal_handlers(control.clone(), shutdown.token()) {
                background.push(("signal listener", handle));
            }
        }

        let mut supervisor = Supervisor::new();
        if config.api.enabled {
            let state = AppState {
                lifecycle: Arc::clone(&lifecycle),
                control: control.clone(),
                cluster: ClusterControl::new(
                    Arc::clone(&self.store),
                    config.control.cas_max_retries,
                ),
                watch_mode: watch_mode.clone(),
                metrics: Arc::clone(&metrics),
                config: Arc::new(config.public()),
            };
            let server = ApiServer::new(state, &config.api.host, config.api.port)?;
            let server_token = shutdown.token();
            let api = supervisor.spawn(
                "api",
                config.supervisor.supervisor_config(),
                move || {
                    let server = server.clone();
                    let token = server_token.clone();
                    async move { server.run(token).await }
                },
                shutdown.token(),
            );
            background.push((
                "api",
                tokio::spawn(async move {
                    match api.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!("API server gave up: {}", e),
                        Err(e) => error!("API supervisor terminated abnormally: {}", e),
                    }
                }),
            ));
        }

        let batch_loop = BatchLoop::new(
            Arc::clone(&lifecycle),
            Arc::clone(&self.processor),
            Duration::from_secs(config.worker.poll_interval_secs),
        );
        let loop_handle = tokio::spawn(batch_loop.run());

        Ok(RunningWorker {
            lifecycle,
            control,
            watch_mode,
            metrics,
            shutdown,
            files,
            supervisor,
            background,
            loop_handle,
        })
    }
}

/// A started worker
pub struct RunningWorker {
    lifecycle: Arc<AgentLifecycle>,
    control: ControlHandle,
    watch_mode: watch::Receiver<Option<WatchMode>>,
    metrics: Arc<Metrics>,
    shutdown: GracefulShutdown,
    files: HealthFiles,
    supervisor: Supervisor,
    background: Vec<(&'static str, JoinHandle<()>)>,
    loop_handle: JoinHandle<()>,
}

impl RunningWorker {
    pub fn lifecycle(&self) -> Arc<AgentLifecycle> {
        Arc::clone(&self.lifecycle)
    }

    /// Handle for direct local commands
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn watch_mode(&self) -> watch::Receiver<Option<WatchMode>> {
        self.watch_mode.clone()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn health_files(&self) -> &HealthFiles {
        &self.files
    }

    /// Wait for STOPPING, then drain and stop.
    ///
    /// Returns `ShutdownTimeout` when the in-flight batch outlives the grace
    /// period; the caller should exit non-zero.
    pub async fn wait(mut self) -> Result<()> {
        let mut state_rx = self.lifecycle.subscribe_state();
        while !state_rx.borrow_and_update().is_shutting_down() {
            if state_rx.changed().await.is_err() {
                break;
            }
        }
        info!("Shutdown requested, waiting for the current batch to finish");

        let drained = self.shutdown.drain(&mut self.loop_handle).await;
        if drained.is_err() {
            self.loop_handle.abort();
        }

        self.shutdown.cancel_background();
        self.shutdown.join_background(self.background).await;
        for component in self.supervisor.stats().await {
            info!(
                "Component {} finished in state {} ({} restarts)",
                component.name, component.state, component.restart_count
            );
        }

        let result: Result<()> = match drained {
            Ok(()) => self.lifecycle.mark_stopped().await,
            Err(e) => Err(DroverError::from(e)),
        };

        if let Err(e) = self.files.clear().await {
            warn!("Failed to remove health artifacts: {}", e);
        }
        self.shutdown.complete();

        match &result {
            Ok(()) => {
                debug_assert_eq!(self.lifecycle.current(), AgentState::Stopped);
                info!("Worker stopped");
            }
            Err(e) => error!("Worker stopped abnormally: {}", e),
        }
        result
    }
}
