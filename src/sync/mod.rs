//! Offset-based incremental replication.
//!
//! Each pass reads this host's cursor, pulls every newer change-log record
//! owned by another host, and commits how far it safely got.

pub mod coordinator;
pub mod outcome;
pub mod plan;

pub use coordinator::{CoordinatorConfig, PassPhase, SyncCoordinator};
pub use outcome::{commit_ceiling, ChangeSet, HostOutcome, HostStatus, SyncResult};
pub use plan::{HostBatch, PendingFile, PendingTransfers};
