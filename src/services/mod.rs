pub mod heartbeat;
pub mod metrics;

pub use heartbeat::{HealthFiles, HeartbeatEmitter, LivenessReport};
pub use metrics::Metrics;
