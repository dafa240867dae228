//! Grouping of pending change records by owning host.

use std::collections::BTreeMap;

use crate::store::{ChangeRecord, Offset};

/// A file waiting to be pulled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub path: String,
    pub offset: Offset,
}

/// Every pending file owned by one host, ascending by offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBatch {
    pub host: String,
    pub files: Vec<PendingFile>,
}

impl HostBatch {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn first_offset(&self) -> Option<Offset> {
        self.files.first().map(|f| f.offset)
    }

    pub fn last_offset(&self) -> Option<Offset> {
        self.files.last().map(|f| f.offset)
    }
}

/// Pending files for one pass, keyed by owning host.
///
/// Hosts with no pending records never appear, so they are never
/// contacted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingTransfers {
    by_host: BTreeMap<String, Vec<PendingFile>>,
}

impl PendingTransfers {
    pub fn from_records(records: &[ChangeRecord]) -> Self {
        let mut by_host: BTreeMap<String, Vec<PendingFile>> = BTreeMap::new();
        for record in records {
            by_host
                .entry(record.owning_host.clone())
                .or_default()
                .push(PendingFile {
                    path: record.file_path.clone(),
                    offset: record.offset,
                });
        }

        // Stores return offset order, but batches must hold it regardless.
        for files in by_host.values_mut() {
            files.sort_by_key(|f| f.offset);
        }

        Self { by_host }
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }

    pub fn host_count(&self) -> usize {
        self.by_host.len()
    }

    pub fn file_count(&self) -> usize {
        self.by_host.values().map(Vec::len).sum()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.by_host.keys().map(String::as_str)
    }

    pub fn into_batches(self) -> Vec<HostBatch> {
        self.by_host
            .into_iter()
            .map(|(host, files)| HostBatch { host, files })
            .collect()
    }
}
