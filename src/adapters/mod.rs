pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::InMemoryControlStore;
pub use postgres::{PostgresControlStore, NOTIFY_CHANNEL};
pub use traits::{CasOutcome, ControlStore, ControlSubscription};

#[cfg(test)]
pub use traits::MockControlStore;
