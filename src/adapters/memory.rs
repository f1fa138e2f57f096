//! In-process control store
//!
//! Backs single-instance development runs and the test suite. Supports toggling
//! push capability, simulated outages and dropping live subscriptions.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::traits::{CasOutcome, ControlStore, ControlSubscription};
use crate::domain::{ControlRecord, DEFAULT_RECORD_KEY};
use crate::error::{DroverError, Result};

pub struct InMemoryControlStore {
    key: String,
    record: RwLock<Option<ControlRecord>>,
    notify_tx: Mutex<broadcast::Sender<i64>>,
    push_supported: AtomicBool,
    available: Arc<AtomicBool>,
    loads: AtomicU64,
}

impl InMemoryControlStore {
    pub fn new(key: impl Into<String>) -> Self {
        let (notify_tx, _) = broadcast::channel(64);
        Self {
            key: key.into(),
            record: RwLock::new(None),
            notify_tx: Mutex::new(notify_tx),
            push_supported: AtomicBool::new(true),
            available: Arc::new(AtomicBool::new(true)),
            loads: AtomicU64::new(0),
        }
    }

    /// Store without change-subscription support (forces polling)
    pub fn without_push(key: impl Into<String>) -> Self {
        let store = Self::new(key);
        store.set_push_supported(false);
        store
    }

    /// Seed the stored record
    pub async fn seed(&self, record: ControlRecord) {
        *self.record.write().await = Some(record);
    }

    pub fn set_push_supported(&self, supported: bool) {
        self.push_supported.store(supported, Ordering::SeqCst);
    }

    /// Simulate the store becoming unreachable (or reachable again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Close every open subscription, as a dropped connection would
    pub fn drop_subscriptions(&self) {
        let (fresh, _) = broadcast::channel(64);
        if let Ok(mut tx) = self.notify_tx.lock() {
            *tx = fresh;
        }
    }

    /// Number of point reads served so far
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DroverError::Store("in-memory store marked unavailable".to_string()))
        }
    }

    fn notify(&self, version: i64) {
        if let Ok(tx) = self.notify_tx.lock() {
            let _ = tx.send(version);
        }
    }
}

impl Default for InMemoryControlStore {
    fn default() -> Self {
        Self::new(DEFAULT_RECORD_KEY)
    }
}

#[async_trait]
impl ControlStore for InMemoryControlStore {
    async fn load(&self) -> Result<ControlRecord> {
        self.ensure_available()?;
        self.loads.fetch_add(1, Ordering::Relaxed);

        if let Some(record) = self.record.read().await.as_ref() {
            return Ok(record.clone());
        }

        let mut guard = self.record.write().await;
        let record = guard.get_or_insert_with(|| ControlRecord::initial(self.key.clone()));
        Ok(record.clone())
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &ControlRecord,
    ) -> Result<CasOutcome> {
        self.ensure_available()?;

        if next.version != expected_version + 1 {
            return Err(DroverError::Validation(format!(
                "next version {} must follow expected version {}",
                next.version, expected_version
            )));
        }

        let mut guard = self.record.write().await;
        let current = guard.get_or_insert_with(|| ControlRecord::initial(self.key.clone()));
        if current.version != expected_version {
            debug!(
                "CAS conflict on {}: expected v{}, stored v{}",
                self.key, expected_version, current.version
            );
            return Ok(CasOutcome::Conflict);
        }

        *current = next.clone();
        drop(guard);

        self.notify(next.version);
        Ok(CasOutcome::Written(next.clone()))
    }

    async fn subscribe(&self) -> Result<Box<dyn ControlSubscription>> {
        if !self.push_supported.load(Ordering::SeqCst) {
            return Err(DroverError::CapabilityUnavailable(
                "change notifications are not supported by this store".to_string(),
            ));
        }
        self.ensure_available()?;

        let rx = self
            .notify_tx
            .lock()
            .map_err(|_| DroverError::Internal("notify channel poisoned".to_string()))?
            .subscribe();

        Ok(Box::new(MemorySubscription {
            rx,
            available: Arc::clone(&self.available),
        }))
    }
}

struct MemorySubscription {
    rx: broadcast::Receiver<i64>,
    available: Arc<AtomicBool>,
}

#[async_trait]
impl ControlSubscription for MemorySubscription {
    async fn changed(&mut self) -> Result<()> {
        match self.rx.recv().await {
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                if self.available.load(Ordering::SeqCst) {
                    Ok(())
                } else {
                    Err(DroverError::Store("subscription lost".to_string()))
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                Err(DroverError::Store("subscription closed".to_string()))
            }
        }
    }
}
