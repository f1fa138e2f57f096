//! Coordination layer for a single worker instance
//!
//! - Lifecycle state machine owning `AgentState` and statistics
//! - Command dispatcher serializing every control input
//! - Graceful shutdown with a bounded drain
//! - Shared exponential backoff

pub mod backoff;
pub mod dispatcher;
pub mod lifecycle;
pub mod shutdown;

pub use backoff::ExponentialBackoff;
pub use dispatcher::{command_channel, CommandDispatcher, CommandEnvelope, ControlHandle};
pub use lifecycle::{AgentLifecycle, AgentSnapshot, EventOutcome, LifecycleEvent};
pub use shutdown::{GracefulShutdown, ShutdownConfig, ShutdownError, ShutdownPhase, ShutdownToken};
