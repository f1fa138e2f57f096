//! Push and poll strategies for observing the control record
//!
//! Both strategies swallow transient store errors behind their own backoff and
//! only ever surface a capability failure, which the watcher answers with a
//! permanent downgrade to polling.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::adapters::{ControlStore, ControlSubscription};
use crate::coordination::ExponentialBackoff;
use crate::domain::ControlRecord;
use crate::error::{DroverError, Result};

/// How the watcher learns about changes to the control record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchMode {
    Push,
    Poll,
}

impl WatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchMode::Push => "PUSH",
            WatchMode::Poll => "POLL",
        }
    }
}

impl fmt::Display for WatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[async_trait]
pub trait WatchStrategy: Send {
    fn mode(&self) -> WatchMode;

    /// Next observed copy of the record.
    ///
    /// May return the same version more than once; callers de-duplicate.
    /// Errors are capability failures only.
    async fn next_record(&mut self) -> Result<ControlRecord>;
}

/// Point read bounded by `timeout`; an expired read counts as a store outage
pub async fn read_record(store: &dyn ControlStore, timeout: Duration) -> Result<ControlRecord> {
    match tokio::time::timeout(timeout, store.load()).await {
        Ok(result) => result,
        Err(_) => Err(DroverError::Store(format!(
            "control record read timed out after {:?}",
            timeout
        ))),
    }
}

/// Change-stream strategy
pub struct PushWatch {
    store: Arc<dyn ControlStore>,
    subscription: Option<Box<dyn ControlSubscription>>,
    read_timeout: Duration,
    backoff: ExponentialBackoff,
    /// Set after every (re)open and notification
    resync: bool,
}

impl PushWatch {
    pub fn new(
        store: Arc<dyn ControlStore>,
        read_timeout: Duration,
        backoff: ExponentialBackoff,
    ) -> Self {
        Self {
            store,
            subscription: None,
            read_timeout,
            backoff,
            resync: true,
        }
    }

    /// Reuse the subscription opened by the capability probe
    pub fn with_subscription(mut self, subscription: Box<dyn ControlSubscription>) -> Self {
        self.subscription = Some(subscription);
        self
    }

    async fn back_off(&mut self) {
        let delay = self.backoff.next_delay();
        debug!("Push watch retrying in {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl WatchStrategy for PushWatch {
    fn mode(&self) -> WatchMode {
        WatchMode::Push
    }

    async fn next_record(&mut self) -> Result<ControlRecord> {
        loop {
            if self.subscription.is_none() {
                match self.store.subscribe().await {
                    Ok(subscription) => {
                        debug!("Control subscription opened");
                        self.subscription = Some(subscription);
                        self.resync = true;
                    }
                    Err(e) if e.is_capability_unavailable() => return Err(e),
                    Err(e) => {
                        warn!("Failed to open control subscription: {}", e);
                        self.back_off().await;
                        continue;
                    }
                }
            }

            // Read after every (re)open so changes made during the gap are seen
            if self.resync {
                match read_record(self.store.as_ref(), self.read_timeout).await {
                    Ok(record) => {
                        self.resync = false;
                        self.backoff.reset();
                        return Ok(record);
                    }
                    Err(e) => {
                        warn!("Control record read failed: {}", e);
                        self.back_off().await;
                        continue;
                    }
                }
            }

            let Some(subscription) = self.subscription.as_mut() else {
                continue;
            };
            match subscription.changed().await {
                Ok(()) => self.resync = true,
                Err(e) if e.is_capability_unavailable() => return Err(e),
                Err(e) => {
                    warn!("Control subscription lost: {}", e);
                    self.subscription = None;
                    self.back_off().await;
                }
            }
        }
    }
}

/// Fixed-interval strategy
pub struct PollWatch {
    store: Arc<dyn ControlStore>,
    interval: tokio::time::Interval,
    read_timeout: Duration,
    backoff: ExponentialBackoff,
    retrying: bool,
}

impl PollWatch {
    /// The first read happens one `period` from now; the startup sync covers t=0
    pub fn new(
        store: Arc<dyn ControlStore>,
        period: Duration,
        read_timeout: Duration,
        backoff: ExponentialBackoff,
    ) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            store,
            interval,
            read_timeout,
            backoff,
            retrying: false,
        }
    }
}

#[async_trait]
impl WatchStrategy for PollWatch {
    fn mode(&self) -> WatchMode {
        WatchMode::Poll
    }

    async fn next_record(&mut self) -> Result<ControlRecord> {
        loop {
            if !self.retrying {
                self.interval.tick().await;
            }

            match read_record(self.store.as_ref(), self.read_timeout).await {
                Ok(record) => {
                    if self.retrying {
                        self.retrying = false;
                        self.backoff.reset();
                        self.interval.reset();
                    }
                    return Ok(record);
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!("Control poll failed: {} (retrying in {:?})", e, delay);
                    self.retrying = true;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryControlStore, MockControlStore};
    use crate::domain::ControlCommand;

    fn fast_backoff() -> ExponentialBackoff {
        ExponentialBackoff::new(Duration::from_millis(5), Duration::from_millis(20))
    }

    #[test]
    fn test_watch_mode_display() {
        assert_eq!(WatchMode::Push.to_string(), "PUSH");
        assert_eq!(WatchMode::Poll.to_string(), "POLL");
    }

    #[tokio::test]
    async fn test_read_record_surfaces_store_errors() {
        let mut store = MockControlStore::new();
        store
            .expect_load()
            .returning(|| Err(DroverError::Store("connection refused".into())));

        let err = read_record(&store, Duration::from_millis(50)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_push_reads_after_open_and_on_change() {
        let store = Arc::new(InMemoryControlStore::default());
        let mut watch = PushWatch::new(store.clone(), Duration::from_secs(1), fast_backoff());

        let first = watch.next_record().await.unwrap();
        assert_eq!(first.version, 0);

        let next = first.successor(ControlCommand::Pause, None, None);
        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.compare_and_swap(0, &next).await.unwrap();
        });

        let second = watch.next_record().await.unwrap();
        assert_eq!(second.version, 1);
        assert_eq!(second.command, ControlCommand::Pause);
    }

    #[tokio::test]
    async fn test_push_resyncs_after_subscription_loss() {
        let store = Arc::new(InMemoryControlStore::default());
        let mut watch = PushWatch::new(store.clone(), Duration::from_secs(1), fast_backoff());
        watch.next_record().await.unwrap();

        // Write lands while the subscription is down
        store.drop_subscriptions();
        let current = store.load().await.unwrap();
        store
            .compare_and_swap(0, &current.successor(ControlCommand::Shutdown, None, None))
            .await
            .unwrap();

        let record = watch.next_record().await.unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.command, ControlCommand::Shutdown);
    }

    #[tokio::test]
    async fn test_push_reports_capability_failure() {
        let store = Arc::new(InMemoryControlStore::without_push("k"));
        let mut watch = PushWatch::new(store, Duration::from_secs(1), fast_backoff());
        let err = watch.next_record().await.unwrap_err();
        assert!(err.is_capability_unavailable());
    }

    #[tokio::test]
    async fn test_poll_recovers_after_outage() {
        let store = Arc::new(InMemoryControlStore::without_push("k"));
        let mut watch = PollWatch::new(
            store.clone(),
            Duration::from_millis(10),
            Duration::from_secs(1),
            fast_backoff(),
        );

        store.set_available(false);
        let restorer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            restorer.set_available(true);
        });

        let record = watch.next_record().await.unwrap();
        assert_eq!(record.version, 0);
        assert_eq!(watch.mode(), WatchMode::Poll);
    }
}
