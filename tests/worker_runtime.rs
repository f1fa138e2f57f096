//! Full worker runtime against the in-memory store

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drover::adapters::InMemoryControlStore;
use drover::config::AppConfig;
use drover::control::{write_control_file, ClusterControl};
use drover::domain::{AgentState, ControlCommand, ControlRecord};
use drover::worker::{BatchProcessor, BatchReport};
use drover::{AgentLifecycle, DroverError, WorkerRuntime};

/// Processor whose batches take a fixed time
struct SlowProcessor {
    duration: Duration,
    started: AtomicU64,
}

impl SlowProcessor {
    fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            started: AtomicU64::new(0),
        })
    }

    fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchProcessor for SlowProcessor {
    async fn process_batch(&self) -> drover::Result<BatchReport> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        Ok(BatchReport {
            documents: 2,
            failures: 0,
        })
    }
}

fn test_config(name: &str) -> (AppConfig, PathBuf) {
    let root = std::env::temp_dir().join(format!("drover-{}-{}", name, uuid::Uuid::new_v4()));
    let mut config = AppConfig::in_memory();
    config.instance_id = format!("test-{}", name);
    config.api.enabled = false;
    config.local.signals = false;
    config.local.control_file = root.join("control").join("state");
    config.local.file_poll_interval_ms = 20;
    config.health.dir = root.join("health");
    config.health.heartbeat_interval_secs = 1;
    config.worker.poll_interval_secs = 1;
    config.worker.shutdown_timeout_secs = 5;
    config.control.poll_interval_secs = 1;
    config.control.backoff_base_ms = 10;
    config.control.backoff_max_ms = 50;
    (config, root)
}

async fn wait_for_state(lifecycle: &AgentLifecycle, target: AgentState, within: Duration) -> bool {
    let mut rx = lifecycle.subscribe_state();
    tokio::time::timeout(within, async {
        while *rx.borrow_and_update() != target {
            if rx.changed().await.is_err() {
                return false;
            }
        }
        true
    })
    .await
    .unwrap_or(false)
}

#[tokio::test]
async fn starts_paused_and_runs_no_batch() {
    let (config, root) = test_config("paused");
    let store = Arc::new(InMemoryControlStore::default());
    let mut record = ControlRecord::initial("global_control");
    record.command = ControlCommand::Pause;
    record.version = 5;
    store.seed(record).await;

    let processor = SlowProcessor::new(Duration::from_millis(10));
    let worker = WorkerRuntime::new(config, store.clone(), processor.clone())
        .start()
        .await
        .unwrap();
    let lifecycle = worker.lifecycle();
    assert_eq!(lifecycle.current(), AgentState::Paused);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(processor.started(), 0);

    worker.control().shutdown().await.unwrap();
    worker.wait().await.unwrap();
    assert_eq!(lifecycle.current(), AgentState::Stopped);
    let _ = tokio::fs::remove_dir_all(&root).await;
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_batch() {
    let (config, root) = test_config("drain");
    let store = Arc::new(InMemoryControlStore::default());
    let processor = SlowProcessor::new(Duration::from_millis(400));

    let worker = WorkerRuntime::new(config, store.clone(), processor.clone())
        .start()
        .await
        .unwrap();
    let lifecycle = worker.lifecycle();

    // Let the first batch start, then shut down mid-batch
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(processor.started(), 1);
    let cluster = ClusterControl::new(store.clone(), 3);
    cluster.shutdown_all(Some("rollout".into()), None).await.unwrap();

    assert!(wait_for_state(&lifecycle, AgentState::Stopping, Duration::from_secs(3)).await);
    worker.wait().await.unwrap();

    assert_eq!(lifecycle.current(), AgentState::Stopped);
    let stats = lifecycle.stats().await;
    assert_eq!(stats.batches_processed, 1);
    assert_eq!(stats.documents_processed, 2);
    assert_eq!(processor.started(), 1);
    let _ = tokio::fs::remove_dir_all(&root).await;
}

#[tokio::test]
async fn grace_timeout_is_fatal() {
    let (mut config, root) = test_config("timeout");
    config.worker.shutdown_timeout_secs = 1;
    let store = Arc::new(InMemoryControlStore::default());
    let processor = SlowProcessor::new(Duration::from_secs(30));

    let worker = WorkerRuntime::new(config, store, processor.clone())
        .start()
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    worker.control().shutdown().await.unwrap();

    let err = worker.wait().await.unwrap_err();
    assert!(matches!(err, DroverError::ShutdownTimeout { timeout_secs: 1 }));
    let _ = tokio::fs::remove_dir_all(&root).await;
}

#[tokio::test]
async fn control_file_pauses_and_shuts_down() {
    let (config, root) = test_config("file");
    let control_file = config.local.control_file.clone();
    let store = Arc::new(InMemoryControlStore::default());
    let processor = SlowProcessor::new(Duration::from_millis(5));

    let worker = WorkerRuntime::new(config, store, processor)
        .start()
        .await
        .unwrap();
    let lifecycle = worker.lifecycle();

    write_control_file(&control_file, "PAUSE").await.unwrap();
    assert!(wait_for_state(&lifecycle, AgentState::Paused, Duration::from_secs(2)).await);

    write_control_file(&control_file, "SHUTDOWN").await.unwrap();
    assert!(wait_for_state(&lifecycle, AgentState::Stopping, Duration::from_secs(2)).await);

    worker.wait().await.unwrap();
    assert_eq!(lifecycle.current(), AgentState::Stopped);
    let _ = tokio::fs::remove_dir_all(&root).await;
}

#[tokio::test]
async fn health_artifacts_follow_state() {
    let (config, root) = test_config("health");
    let store = Arc::new(InMemoryControlStore::default());
    let processor = SlowProcessor::new(Duration::from_millis(5));

    let worker = WorkerRuntime::new(config, store, processor)
        .start()
        .await
        .unwrap();
    let files = worker.health_files().clone();

    // First heartbeat fires immediately
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(files.liveness_path().exists());
    assert!(files.readiness_path().exists());

    let liveness = tokio::fs::read_to_string(files.liveness_path()).await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&liveness).unwrap();
    assert_eq!(json["instance_id"], "test-health");
    assert_eq!(json["state"], "RUNNING");

    worker.control().pause().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!files.readiness_path().exists());
    assert!(files.liveness_path().exists());

    worker.control().shutdown().await.unwrap();
    worker.wait().await.unwrap();
    assert!(!files.liveness_path().exists());
    assert!(!files.readiness_path().exists());
    let _ = tokio::fs::remove_dir_all(&root).await;
}
