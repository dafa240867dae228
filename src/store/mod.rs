//! Change-log and offset tracker storage.
//!
//! The change-log is an append-only list of `(offset, path, owner)` records
//! written by other processes. The offset tracker holds one cursor row per
//! host, written only by that host.

pub mod filter;
pub mod memory;
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;

pub use filter::PathFilter;
pub use memory::MemoryStore;
pub use sql::SqlStore;

/// Position of a record in the change-log.
pub type Offset = i64;

/// One entry of the change-log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub offset: Offset,
    pub file_path: String,
    pub owning_host: String,
}

impl ChangeRecord {
    pub fn new(offset: Offset, file_path: impl Into<String>, owning_host: impl Into<String>) -> Self {
        Self {
            offset,
            file_path: file_path.into(),
            owning_host: owning_host.into(),
        }
    }
}

/// A host's stored "last offset fully synchronised" marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCursor {
    pub host: String,
    pub offset: Offset,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Read-only view over the change-log.
#[async_trait]
pub trait ChangeLogStore: Send + Sync {
    /// Records with `offset > since`, not owned by `exclude_host` and
    /// matching `filter`, ascending by offset. An empty result is not an
    /// error.
    async fn query_pending(
        &self,
        exclude_host: &str,
        since: Offset,
        filter: &PathFilter,
    ) -> Result<Vec<ChangeRecord>, StoreError>;
}

/// Durable per-host cursor.
#[async_trait]
pub trait OffsetTracker: Send + Sync {
    /// The stored cursor for `host`, or `None` if the host has never
    /// committed one.
    async fn read_cursor(&self, host: &str) -> Result<Option<OffsetCursor>, StoreError>;

    async fn insert_cursor(&self, host: &str, offset: Offset) -> Result<(), StoreError>;

    async fn update_cursor(&self, host: &str, offset: Offset) -> Result<(), StoreError>;

    /// Insert or update depending on whether a row was seen when the pass
    /// started.
    async fn commit_cursor(&self, host: &str, offset: Offset, existing: bool) -> Result<(), StoreError> {
        if existing {
            self.update_cursor(host, offset).await
        } else {
            self.insert_cursor(host, offset).await
        }
    }
}
