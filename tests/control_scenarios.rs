//! End-to-end control scenarios against the in-memory store.
//!
//! Each test wires the lifecycle, the command dispatcher and the cluster
//! watcher the same way the runtime does, with millisecond intervals.

use std::sync::Arc;
use std::time::Duration;

use drover::adapters::{CasOutcome, ControlStore, InMemoryControlStore};
use drover::control::{ClusterControl, ClusterControlWatcher, WatchMode, WatcherConfig};
use drover::coordination::{
    command_channel, AgentLifecycle, ControlHandle, EventOutcome, GracefulShutdown,
};
use drover::domain::{AgentState, CommandEvent, ControlCommand, ControlRecord};
use drover::DroverError;
use tokio::sync::watch;

struct Harness {
    store: Arc<InMemoryControlStore>,
    lifecycle: Arc<AgentLifecycle>,
    handle: ControlHandle,
    cluster: ClusterControl,
    mode: watch::Receiver<Option<WatchMode>>,
    _shutdown: GracefulShutdown,
}

fn fast_config(enable_push: bool) -> WatcherConfig {
    WatcherConfig {
        enable_push,
        poll_interval: Duration::from_millis(50),
        read_timeout: Duration::from_millis(200),
        backoff_base: Duration::from_millis(5),
        backoff_max: Duration::from_millis(20),
    }
}

fn record(command: ControlCommand, version: i64) -> ControlRecord {
    let mut record = ControlRecord::initial("global_control");
    record.command = command;
    record.version = version;
    record
}

async fn start(store: Arc<InMemoryControlStore>, enable_push: bool) -> Harness {
    let lifecycle = Arc::new(AgentLifecycle::new());
    let shutdown = GracefulShutdown::with_defaults();
    let (handle, dispatcher) = command_channel(Arc::clone(&lifecycle), 16);
    tokio::spawn(dispatcher.run(shutdown.token()));

    let dyn_store: Arc<dyn ControlStore> = store.clone();
    let mut watcher = ClusterControlWatcher::new(
        Arc::clone(&dyn_store),
        fast_config(enable_push),
        handle.clone(),
    );
    let mode = watcher.mode_receiver();
    watcher.initial_sync().await;
    tokio::spawn(watcher.run(shutdown.token()));

    Harness {
        store,
        lifecycle,
        handle,
        cluster: ClusterControl::new(dyn_store, 5),
        mode,
        _shutdown: shutdown,
    }
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

async fn wait_for_mode(
    rx: &mut watch::Receiver<Option<WatchMode>>,
    target: WatchMode,
    within: Duration,
) -> bool {
    tokio::time::timeout(within, async {
        while *rx.borrow_and_update() != Some(target) {
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
async fn start_paused_from_cluster_record() {
    let store = Arc::new(InMemoryControlStore::default());
    store.seed(record(ControlCommand::Pause, 5)).await;

    let h = start(store, true).await;

    // Applied before anything else runs
    assert_eq!(h.lifecycle.current(), AgentState::Paused);
    assert_eq!(h.lifecycle.last_applied_cluster_version().await, 5);
    assert!(!h.lifecycle.is_ready());
}

#[tokio::test]
async fn local_pause_then_newer_cluster_running_resumes() {
    let store = Arc::new(InMemoryControlStore::default());
    let h = start(store, true).await;
    assert_eq!(h.lifecycle.current(), AgentState::Running);

    h.handle.pause().await.unwrap();
    assert_eq!(h.lifecycle.current(), AgentState::Paused);

    let written = h.cluster.resume_all(None, Some("ops".into())).await.unwrap();
    assert_eq!(written.version, 1);

    assert!(wait_for_state(&h.lifecycle, AgentState::Running, Duration::from_secs(2)).await);
    assert_eq!(h.lifecycle.last_applied_cluster_version().await, 1);
}

#[tokio::test]
async fn push_unavailable_falls_back_to_polling() {
    let store = Arc::new(InMemoryControlStore::without_push("global_control"));
    let mut h = start(store, true).await;

    assert!(wait_for_mode(&mut h.mode, WatchMode::Poll, Duration::from_secs(1)).await);

    h.cluster.pause_all(Some("maintenance".into()), None).await.unwrap();
    assert!(wait_for_state(&h.lifecycle, AgentState::Paused, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn push_lost_mid_run_downgrades_permanently() {
    let store = Arc::new(InMemoryControlStore::default());
    let mut h = start(Arc::clone(&store), true).await;
    assert!(wait_for_mode(&mut h.mode, WatchMode::Push, Duration::from_secs(1)).await);

    // The deployment stops supporting notifications and the stream drops
    h.store.set_push_supported(false);
    h.store.drop_subscriptions();
    assert!(wait_for_mode(&mut h.mode, WatchMode::Poll, Duration::from_secs(2)).await);

    // Restoring the capability does not bring push back
    h.store.set_push_supported(true);
    h.cluster.pause_all(None, None).await.unwrap();
    assert!(wait_for_state(&h.lifecycle, AgentState::Paused, Duration::from_secs(2)).await);
    assert_eq!(*h.mode.borrow(), Some(WatchMode::Poll));
}

#[tokio::test]
async fn write_then_observe_in_push_mode() {
    let store = Arc::new(InMemoryControlStore::default());
    let mut h = start(store, true).await;
    assert!(wait_for_mode(&mut h.mode, WatchMode::Push, Duration::from_secs(1)).await);

    let written = h.cluster.pause_all(None, None).await.unwrap();
    assert!(wait_for_state(&h.lifecycle, AgentState::Paused, Duration::from_secs(1)).await);
    assert_eq!(h.lifecycle.last_applied_cluster_version().await, written.version);
}

#[tokio::test]
async fn write_then_observe_in_poll_mode() {
    let store = Arc::new(InMemoryControlStore::default());
    let mut h = start(store, false).await;
    assert!(wait_for_mode(&mut h.mode, WatchMode::Poll, Duration::from_secs(1)).await);

    let written = h.cluster.pause_all(None, None).await.unwrap();
    // Observed within one poll interval plus slack
    assert!(wait_for_state(&h.lifecycle, AgentState::Paused, Duration::from_millis(500)).await);
    assert_eq!(h.lifecycle.last_applied_cluster_version().await, written.version);
}

#[tokio::test]
async fn store_outage_keeps_last_known_state() {
    let store = Arc::new(InMemoryControlStore::default());
    store.seed(record(ControlCommand::Pause, 3)).await;
    let h = start(Arc::clone(&store), false).await;
    assert_eq!(h.lifecycle.current(), AgentState::Paused);

    store.set_available(false);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.lifecycle.current(), AgentState::Paused);

    store.set_available(true);
    h.cluster.resume_all(None, None).await.unwrap();
    assert!(wait_for_state(&h.lifecycle, AgentState::Running, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn cluster_shutdown_reaches_stopping() {
    let store = Arc::new(InMemoryControlStore::default());
    let h = start(store, true).await;

    h.cluster.shutdown_all(Some("rollout".into()), None).await.unwrap();
    assert!(wait_for_state(&h.lifecycle, AgentState::Stopping, Duration::from_secs(2)).await);

    // Local resume cannot leave STOPPING
    let err = h.handle.resume().await.unwrap_err();
    assert!(matches!(err, DroverError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn stale_cluster_versions_never_change_state() {
    let store = Arc::new(InMemoryControlStore::default());
    store.seed(record(ControlCommand::Running, 7)).await;
    let h = start(store, true).await;
    assert_eq!(h.lifecycle.last_applied_cluster_version().await, 7);

    for version in [3, 6, 7] {
        let outcome = h
            .handle
            .submit(CommandEvent::cluster(&record(ControlCommand::Pause, version)))
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Stale { .. }));
        assert_eq!(h.lifecycle.current(), AgentState::Running);
    }
    assert_eq!(h.lifecycle.last_applied_cluster_version().await, 7);
}

#[tokio::test]
async fn applied_version_never_decreases() {
    let store = Arc::new(InMemoryControlStore::default());
    let h = start(store, true).await;

    let mut last = h.lifecycle.last_applied_cluster_version().await;
    for (command, version) in [
        (ControlCommand::Pause, 2),
        (ControlCommand::Running, 1),
        (ControlCommand::Running, 4),
        (ControlCommand::Pause, 4),
        (ControlCommand::Running, 6),
    ] {
        let _ = h
            .handle
            .submit(CommandEvent::cluster(&record(command, version)))
            .await
            .unwrap();
        let current = h.lifecycle.last_applied_cluster_version().await;
        assert!(current >= last);
        last = current;
    }
    assert_eq!(last, 6);
}

#[tokio::test]
async fn double_local_pause_is_rejected() {
    let store = Arc::new(InMemoryControlStore::default());
    let h = start(store, true).await;

    tokio_test::assert_ok!(h.handle.pause().await);
    let err = h.handle.pause().await.unwrap_err();
    assert!(matches!(err, DroverError::InvalidStateTransition { .. }));
    assert_eq!(h.lifecycle.current(), AgentState::Paused);
}

#[tokio::test]
async fn concurrent_writers_from_same_version_yield_one_winner() {
    let store = Arc::new(InMemoryControlStore::default());
    store.seed(record(ControlCommand::Running, 10)).await;

    let current = store.load().await.unwrap();
    let pause = current.successor(ControlCommand::Pause, None, Some("a".into()));
    let shutdown = current.successor(ControlCommand::Shutdown, None, Some("b".into()));

    let (a, b) = tokio::join!(
        store.compare_and_swap(10, &pause),
        store.compare_and_swap(10, &shutdown),
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let winners = outcomes
        .iter()
        .filter(|o| matches!(o, CasOutcome::Written(_)))
        .count();
    assert_eq!(winners, 1);
    assert!(outcomes.contains(&CasOutcome::Conflict));

    let stored = store.load().await.unwrap();
    assert_eq!(stored.version, 11);
}

#[tokio::test]
async fn concurrent_cluster_writes_both_land_after_retry() {
    let store = Arc::new(InMemoryControlStore::default());
    store.seed(record(ControlCommand::Running, 10)).await;
    let cluster = ClusterControl::new(store.clone(), 5);

    let (a, b) = tokio::join!(
        cluster.pause_all(None, Some("a".into())),
        cluster.resume_all(None, Some("b".into())),
    );
    let mut versions = vec![a.unwrap().version, b.unwrap().version];
    versions.sort_unstable();
    assert_eq!(versions, vec![11, 12]);
}
