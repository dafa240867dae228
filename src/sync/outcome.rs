//! Per-host results of a pass and the commit ceiling derived from them.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::store::Offset;

/// Coarse status of one host's batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Success,
    Partial,
    Failed,
}

/// What happened to one host's batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOutcome {
    /// Every file arrived.
    Synced {
        files: usize,
        last_offset: Option<Offset>,
    },
    /// A file failed; files before it arrived, the rest were abandoned.
    Partial {
        synced: usize,
        last_offset: Option<Offset>,
        failed_offset: Offset,
        failed_path: String,
        abandoned: usize,
        reason: String,
    },
    /// The host could not be reached; nothing was attempted.
    ConnectionFailed {
        files: usize,
        first_offset: Option<Offset>,
        reason: String,
    },
}

impl HostOutcome {
    pub fn status(&self) -> HostStatus {
        match self {
            HostOutcome::Synced { .. } => HostStatus::Success,
            HostOutcome::Partial { synced, .. } if *synced > 0 => HostStatus::Partial,
            HostOutcome::Partial { .. } | HostOutcome::ConnectionFailed { .. } => HostStatus::Failed,
        }
    }

    /// Highest offset that arrived from this host.
    pub fn last_synced(&self) -> Option<Offset> {
        match self {
            HostOutcome::Synced { last_offset, .. } | HostOutcome::Partial { last_offset, .. } => {
                *last_offset
            }
            HostOutcome::ConnectionFailed { .. } => None,
        }
    }

    /// Lowest offset in the batch that did not arrive.
    pub fn first_unsynced(&self) -> Option<Offset> {
        match self {
            HostOutcome::Synced { .. } => None,
            HostOutcome::Partial { failed_offset, .. } => Some(*failed_offset),
            HostOutcome::ConnectionFailed { first_offset, .. } => *first_offset,
        }
    }

    pub fn files_synced(&self) -> usize {
        match self {
            HostOutcome::Synced { files, .. } => *files,
            HostOutcome::Partial { synced, .. } => *synced,
            HostOutcome::ConnectionFailed { .. } => 0,
        }
    }
}

/// Whether the pass could determine its work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSet {
    Queried { records: usize },
    Unavailable { reason: String },
}

/// Summary of one pass.
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub local_host: String,
    pub previous_offset: Offset,
    pub final_offset: Offset,
    /// True when this pass inserted the host's first cursor row.
    pub cursor_created: bool,
    pub changes: ChangeSet,
    pub hosts: BTreeMap<String, HostOutcome>,
    pub elapsed: Duration,
}

impl SyncResult {
    /// No host failed and the change-log was readable.
    pub fn is_clean(&self) -> bool {
        matches!(self.changes, ChangeSet::Queried { .. })
            && self.hosts.values().all(|o| o.status() == HostStatus::Success)
    }

    pub fn files_synced(&self) -> usize {
        self.hosts.values().map(HostOutcome::files_synced).sum()
    }

    pub fn failed_hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts
            .iter()
            .filter(|(_, o)| o.status() != HostStatus::Success)
            .map(|(h, _)| h.as_str())
    }
}

/// Offset to commit after every host has finished.
///
/// The cursor is a single scalar, so it may only move up to the last
/// queried offset below the first record that did not arrive from any
/// host. It never moves below `previous`.
pub fn commit_ceiling<I>(previous: Offset, queried: I, outcomes: &BTreeMap<String, HostOutcome>) -> Offset
where
    I: IntoIterator<Item = Offset>,
{
    let blocking = outcomes.values().filter_map(HostOutcome::first_unsynced).min();

    queried
        .into_iter()
        .filter(|offset| blocking.map_or(true, |b| *offset < b))
        .max()
        .map_or(previous, |reached| reached.max(previous))
}
