//! Batch Execution Loop
//!
//! Runs batches while the instance is RUNNING. Pause and shutdown never cancel
//! an in-flight batch; they only take effect between batches or during the
//! inter-batch sleep.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::processor::BatchProcessor;
use crate::coordination::AgentLifecycle;
use crate::domain::AgentState;

pub struct BatchLoop {
    lifecycle: Arc<AgentLifecycle>,
    processor: Arc<dyn BatchProcessor>,
    poll_interval: Duration,
}

impl BatchLoop {
    pub fn new(
        lifecycle: Arc<AgentLifecycle>,
        processor: Arc<dyn BatchProcessor>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            lifecycle,
            processor,
            poll_interval,
        }
    }

    /// Run until the instance leaves RUNNING/PAUSED for STOPPING
    pub async fn run(self) {
        let mut state_rx = self.lifecycle.subscribe_state();
        info!("Execution loop started (poll interval {:?})", self.poll_interval);

        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                AgentState::Stopping | AgentState::Stopped => break,
                AgentState::Paused => {
                    debug!("Execution loop paused");
                    // Wakes on any transition; re-evaluated at the top
                    if state_rx.changed().await.is_err() {
                        break;
                    }
                    continue;
                }
                AgentState::Running => {}
            }

            self.run_batch().await;

            if !self.idle(&mut state_rx).await {
                break;
            }
        }

        info!("Execution loop exited");
    }

    async fn run_batch(&self) {
        match self.processor.process_batch().await {
            Ok(report) if report.is_empty() => {}
            Ok(report) => {
                self.lifecycle
                    .record_batch(report.documents, report.failures)
                    .await;
            }
            Err(e) => {
                error!("Batch processing failed: {}", e);
                self.lifecycle.record_error().await;
            }
        }
    }

    /// Inter-batch sleep, cut short when the state leaves RUNNING.
    ///
    /// Returns false if the state channel closed.
    async fn idle(&self, state_rx: &mut watch::Receiver<AgentState>) -> bool {
        let sleep = tokio::time::sleep(self.poll_interval);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    if *state_rx.borrow() != AgentState::Running {
                        return true;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CommandEvent, ControlCommand};
    use crate::error::DroverError;
    use crate::worker::processor::{BatchReport, MockBatchProcessor};

    #[tokio::test]
    async fn test_loop_records_batches_and_errors() {
        let lifecycle = Arc::new(AgentLifecycle::new());
        let mut processor = MockBatchProcessor::new();
        let mut calls = 0;
        processor.expect_process_batch().returning(move || {
            calls += 1;
            if calls == 2 {
                Err(DroverError::Store("work table unavailable".into()))
            } else {
                Ok(BatchReport {
                    documents: 4,
                    failures: 1,
                })
            }
        });

        let task = tokio::spawn(
            BatchLoop::new(
                Arc::clone(&lifecycle),
                Arc::new(processor),
                Duration::from_millis(5),
            )
            .run(),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        lifecycle
            .apply(&CommandEvent::local(ControlCommand::Shutdown))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        let stats = lifecycle.stats().await;
        assert!(stats.batches_processed >= 2);
        assert_eq!(stats.documents_processed, stats.batches_processed * 4);
        // One failure per successful batch plus the failed batch
        assert_eq!(stats.errors_count, stats.batches_processed + 1);
        assert_eq!(lifecycle.current(), AgentState::Stopping);
    }

    #[tokio::test]
    async fn test_paused_loop_runs_no_batches() {
        let lifecycle = Arc::new(AgentLifecycle::new());
        lifecycle
            .apply(&CommandEvent::local(ControlCommand::Pause))
            .await
            .unwrap();

        let mut processor = MockBatchProcessor::new();
        processor.expect_process_batch().never();

        let task = tokio::spawn(
            BatchLoop::new(
                Arc::clone(&lifecycle),
                Arc::new(processor),
                Duration::from_millis(5),
            )
            .run(),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        lifecycle
            .apply(&CommandEvent::local(ControlCommand::Shutdown))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lifecycle.stats().await.batches_processed, 0);
    }

    #[tokio::test]
    async fn test_pause_interrupts_sleep() {
        let lifecycle = Arc::new(AgentLifecycle::new());
        let mut processor = MockBatchProcessor::new();
        processor.expect_process_batch().times(1).returning(|| {
            Ok(BatchReport {
                documents: 1,
                failures: 0,
            })
        });

        let task = tokio::spawn(
            BatchLoop::new(
                Arc::clone(&lifecycle),
                Arc::new(processor),
                Duration::from_secs(3600),
            )
            .run(),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        lifecycle
            .apply(&CommandEvent::local(ControlCommand::Pause))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        lifecycle
            .apply(&CommandEvent::local(ControlCommand::Shutdown))
            .await
            .unwrap();

        // Exits promptly despite the hour-long poll interval
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lifecycle.stats().await.documents_processed, 1);
    }
}
