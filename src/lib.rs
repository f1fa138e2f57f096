pub mod adapters;
pub mod api;
pub mod cli;
pub mod config;
pub mod control;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod services;
pub mod supervisor;
pub mod worker;

pub use adapters::{CasOutcome, ControlStore, InMemoryControlStore, PostgresControlStore};
pub use config::AppConfig;
pub use control::{ClusterControl, ClusterControlWatcher, WatchMode};
pub use coordination::{
    AgentLifecycle, AgentSnapshot, ControlHandle, EventOutcome, GracefulShutdown, LifecycleEvent,
};
pub use domain::{AgentState, CommandEvent, CommandSource, ControlCommand, ControlRecord};
pub use error::{DroverError, Result};
pub use runtime::{connect_backend, Backend, RunningWorker, WorkerRuntime};
pub use supervisor::{Supervisor, SupervisorConfig};
pub use worker::{BatchLoop, BatchProcessor, BatchReport};
