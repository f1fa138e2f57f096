use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

use crate::control::WatchMode;
use crate::coordination::{AgentSnapshot, LifecycleEvent, ShutdownToken};
use crate::domain::{AgentState, CommandSource};

/// Control-plane counters for observability
#[derive(Default)]
pub struct Metrics {
    /// Transitions caused by cluster commands
    pub cluster_transitions: AtomicU64,
    /// Transitions caused by local commands
    pub local_transitions: AtomicU64,
    /// Cluster commands recorded without acting on them
    pub cluster_discarded: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::StateChanged { source, .. } => {
                let counter = match source {
                    CommandSource::Cluster => &self.cluster_transitions,
                    CommandSource::Local => &self.local_transitions,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            LifecycleEvent::ClusterCommandDiscarded { .. } => {
                self.cluster_discarded.fetch_add(1, Ordering::Relaxed);
            }
            LifecycleEvent::Stopped => {}
        }
    }

    /// Feed lifecycle events into the counters until cancelled
    pub async fn track(
        &self,
        mut events: broadcast::Receiver<LifecycleEvent>,
        mut token: ShutdownToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => self.record(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Metrics tracker lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Export metrics in Prometheus format
    pub fn prometheus(
        &self,
        snapshot: &AgentSnapshot,
        watch_mode: Option<WatchMode>,
        uptime_seconds: u64,
    ) -> String {
        let state_gauges: String = [
            AgentState::Running,
            AgentState::Paused,
            AgentState::Stopping,
            AgentState::Stopped,
        ]
        .iter()
        .map(|state| {
            format!(
                "drover_state{{state=\"{}\"}} {}\n",
                state,
                u8::from(*state == snapshot.state)
            )
        })
        .collect();

        let push_mode = match watch_mode {
            Some(WatchMode::Push) => 1,
            Some(WatchMode::Poll) => 0,
            None => -1,
        };

        format!(
            r#"# HELP drover_up Ready to process (1=RUNNING, 0=otherwise)
# TYPE drover_up gauge
drover_up {}

# HELP drover_state Current lifecycle state
# TYPE drover_state gauge
{}
# HELP drover_uptime_seconds Uptime in seconds
# TYPE drover_uptime_seconds counter
drover_uptime_seconds {}

# HELP drover_watch_push Cluster watch mode (1=push, 0=poll, -1=not started)
# TYPE drover_watch_push gauge
drover_watch_push {}

# HELP drover_cluster_version Last applied cluster control version
# TYPE drover_cluster_version gauge
drover_cluster_version {}

# HELP drover_batches_processed_total Batches executed
# TYPE drover_batches_processed_total counter
drover_batches_processed_total {}

# HELP drover_documents_processed_total Documents processed
# TYPE drover_documents_processed_total counter
drover_documents_processed_total {}

# HELP drover_errors_total Batch and document errors
# TYPE drover_errors_total counter
drover_errors_total {}

# HELP drover_cluster_transitions_total State changes caused by cluster commands
# TYPE drover_cluster_transitions_total counter
drover_cluster_transitions_total {}

# HELP drover_local_transitions_total State changes caused by local commands
# TYPE drover_local_transitions_total counter
drover_local_transitions_total {}

# HELP drover_cluster_discarded_total Cluster commands not valid in the current state
# TYPE drover_cluster_discarded_total counter
drover_cluster_discarded_total {}
"#,
            u8::from(snapshot.state.is_ready()),
            state_gauges,
            uptime_seconds,
            push_mode,
            snapshot.last_applied_cluster_version,
            snapshot.stats.batches_processed,
            snapshot.stats.documents_processed,
            snapshot.stats.errors_count,
            self.cluster_transitions.load(Ordering::Relaxed),
            self.local_transitions.load(Ordering::Relaxed),
            self.cluster_discarded.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AgentStats;

    #[test]
    fn test_prometheus_output() {
        let metrics = Metrics::new();
        metrics.record(&LifecycleEvent::StateChanged {
            from: AgentState::Running,
            to: AgentState::Paused,
            source: CommandSource::Cluster,
            version: Some(4),
        });
        metrics.record(&LifecycleEvent::ClusterCommandDiscarded {
            version: 5,
            reason: "pause not valid from PAUSED".into(),
        });

        let snapshot = AgentSnapshot {
            state: AgentState::Paused,
            last_applied_cluster_version: 5,
            stats: AgentStats {
                batches_processed: 3,
                documents_processed: 42,
                errors_count: 1,
                last_heartbeat: None,
            },
            timestamp: chrono::Utc::now(),
        };

        let text = metrics.prometheus(&snapshot, Some(WatchMode::Poll), 12);
        assert!(text.contains("drover_up 0\n"));
        assert!(text.contains("drover_state{state=\"PAUSED\"} 1\n"));
        assert!(text.contains("drover_state{state=\"RUNNING\"} 0\n"));
        assert!(text.contains("drover_watch_push 0\n"));
        assert!(text.contains("drover_cluster_version 5\n"));
        assert!(text.contains("drover_documents_processed_total 42\n"));
        assert!(text.contains("drover_cluster_transitions_total 1\n"));
        assert!(text.contains("drover_cluster_discarded_total 1\n"));
    }
}
