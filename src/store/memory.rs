//! In-memory change-log and offset tracker.
//!
//! Useful for dry runs and tests. Mirrors the SQL backend's semantics,
//! including failing an insert for a host that already has a cursor.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{ChangeLogStore, ChangeRecord, Offset, OffsetCursor, OffsetTracker, PathFilter};
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<ChangeRecord>>,
    cursors: Mutex<HashMap<String, OffsetCursor>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ChangeRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.append(record);
        }
        store
    }

    /// Append a record, keeping the log ordered by offset.
    pub fn append(&self, record: ChangeRecord) {
        let mut records = lock(&self.records);
        let at = records.partition_point(|r| r.offset < record.offset);
        records.insert(at, record);
    }

    /// Current cursor for a host, bypassing the trait.
    pub fn cursor(&self, host: &str) -> Option<OffsetCursor> {
        lock(&self.cursors).get(host).cloned()
    }

    pub fn set_cursor(&self, host: &str, offset: Offset) {
        lock(&self.cursors).insert(
            host.to_string(),
            OffsetCursor {
                host: host.to_string(),
                offset,
                updated_at: Some(Utc::now()),
            },
        );
    }
}

#[async_trait]
impl ChangeLogStore for MemoryStore {
    async fn query_pending(
        &self,
        exclude_host: &str,
        since: Offset,
        filter: &PathFilter,
    ) -> Result<Vec<ChangeRecord>, StoreError> {
        Ok(lock(&self.records)
            .iter()
            .filter(|r| r.offset > since)
            .filter(|r| r.owning_host != exclude_host)
            .filter(|r| filter.matches(&r.file_path))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OffsetTracker for MemoryStore {
    async fn read_cursor(&self, host: &str) -> Result<Option<OffsetCursor>, StoreError> {
        Ok(self.cursor(host))
    }

    async fn insert_cursor(&self, host: &str, offset: Offset) -> Result<(), StoreError> {
        if lock(&self.cursors).contains_key(host) {
            return Err(StoreError::Backend(format!("cursor for {} already exists", host)));
        }
        self.set_cursor(host, offset);
        Ok(())
    }

    async fn update_cursor(&self, host: &str, offset: Offset) -> Result<(), StoreError> {
        match lock(&self.cursors).get_mut(host) {
            Some(cursor) => {
                cursor.offset = offset;
                cursor.updated_at = Some(Utc::now());
                Ok(())
            }
            None => Err(StoreError::Backend(format!("no cursor for {} to update", host))),
        }
    }
}

// A poisoned lock only means another test thread panicked mid-update; the
// data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
