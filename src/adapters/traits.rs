//! Control Document Store interface
//!
//! The store is treated as an opaque document store with three capabilities:
//! point read by key, conditional write (compare-and-swap on `version`), and an
//! optional change subscription that only some deployments support.

use async_trait::async_trait;

use crate::domain::ControlRecord;
use crate::error::Result;

/// Result of a conditional write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The record was replaced; carries the stored value
    Written(ControlRecord),
    /// Another writer advanced the version first; re-read and retry
    Conflict,
}

/// Access to the single cluster-wide control record
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControlStore: Send + Sync {
    /// Point read of the control record, creating the initial record when absent
    async fn load(&self) -> Result<ControlRecord>;

    /// Replace the record only if its stored version equals `expected_version`.
    ///
    /// `next.version` must be `expected_version + 1`.
    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &ControlRecord,
    ) -> Result<CasOutcome>;

    /// Open a change subscription on the control record.
    ///
    /// Returns `DroverError::CapabilityUnavailable` when the deployment cannot
    /// push changes; any other error is transient.
    async fn subscribe(&self) -> Result<Box<dyn ControlSubscription>>;
}

/// An open push subscription
#[async_trait]
pub trait ControlSubscription: Send {
    /// Resolves when the record may have changed.
    ///
    /// Notifications can repeat or coalesce, so callers re-read the record and
    /// compare versions.
    async fn changed(&mut self) -> Result<()>;
}
