//! Supervisor layer: restart failed components with bounded backoff

pub mod component;

pub use component::{
    ComponentState, ComponentStats, SupervisedComponent, Supervisor, SupervisorConfig,
};
