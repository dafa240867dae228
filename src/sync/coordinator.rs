//! One synchronisation pass.
//!
//! Phases run strictly in order:
//! `Init -> CursorLoaded -> ChangesQueried -> Transferring -> Committing -> Done`.
//! Host failures are contained and alerted; only the final cursor commit
//! can fail the pass.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::alert::AlertSink;
use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::store::{ChangeLogStore, ChangeRecord, Offset, OffsetTracker, PathFilter};
use crate::sync::outcome::{commit_ceiling, ChangeSet, HostOutcome, SyncResult};
use crate::sync::plan::{HostBatch, PendingTransfers};
use crate::transfer::TransferClient;

/// Pass phase, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhase {
    Init,
    CursorLoaded,
    ChangesQueried,
    Transferring,
    Committing,
    Done,
}

/// Settings the coordinator needs, fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Name this host is known by in the change-log and offset tracker.
    pub local_host: String,
    pub path_filter: PathFilter,
    /// Hosts transferred concurrently. 1 means strictly sequential.
    pub max_parallel_hosts: usize,
}

impl CoordinatorConfig {
    pub fn new(local_host: impl Into<String>) -> Self {
        Self {
            local_host: local_host.into(),
            path_filter: PathFilter::all(),
            max_parallel_hosts: 1,
        }
    }

    pub fn with_path_filter(mut self, path_filter: PathFilter) -> Self {
        self.path_filter = path_filter;
        self
    }

    pub fn with_max_parallel_hosts(mut self, max_parallel_hosts: usize) -> Self {
        self.max_parallel_hosts = max_parallel_hosts;
        self
    }
}

impl From<&SyncSettings> for CoordinatorConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            local_host: settings.local_host.clone(),
            path_filter: PathFilter::new(settings.path_filters.iter().cloned()),
            max_parallel_hosts: settings.max_parallel_hosts,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LoadedCursor {
    offset: Offset,
    present: bool,
}

pub struct SyncCoordinator {
    config: CoordinatorConfig,
    change_log: Arc<dyn ChangeLogStore>,
    tracker: Arc<dyn OffsetTracker>,
    transfer: Arc<dyn TransferClient>,
    alerts: Arc<dyn AlertSink>,
}

impl SyncCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        change_log: Arc<dyn ChangeLogStore>,
        tracker: Arc<dyn OffsetTracker>,
        transfer: Arc<dyn TransferClient>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            config,
            change_log,
            tracker,
            transfer,
            alerts,
        }
    }

    /// Run one pass and commit the resulting cursor.
    pub async fn run_pass(&self) -> Result<SyncResult, SyncError> {
        let started = Instant::now();
        let local = self.config.local_host.as_str();
        self.enter(PassPhase::Init);
        info!(host = local, "running file sync");

        let cursor = self.load_cursor().await;
        self.enter(PassPhase::CursorLoaded);
        info!(host = local, offset = cursor.offset, present = cursor.present, "loaded offset cursor");

        let (changes, records) = self.query_changes(cursor.offset).await;
        self.enter(PassPhase::ChangesQueried);

        let pending = PendingTransfers::from_records(&records);
        info!(
            host = local,
            files = pending.file_count(),
            peers = pending.host_count(),
            "pending changes grouped"
        );
        debug!(host = local, peers = ?pending.hosts().collect::<Vec<_>>(), "peers to contact");

        self.enter(PassPhase::Transferring);
        let outcomes = self.transfer_all(pending).await;

        let final_offset = commit_ceiling(cursor.offset, records.iter().map(|r| r.offset), &outcomes);

        self.enter(PassPhase::Committing);
        if !cursor.present {
            info!(host = local, "offset not present for host, inserting offset entry");
        }
        self.tracker
            .commit_cursor(local, final_offset, cursor.present)
            .await
            .map_err(|source| SyncError::Commit {
                host: local.to_string(),
                offset: final_offset,
                source,
            })?;

        self.enter(PassPhase::Done);
        let result = SyncResult {
            local_host: local.to_string(),
            previous_offset: cursor.offset,
            final_offset,
            cursor_created: !cursor.present,
            changes,
            hosts: outcomes,
            elapsed: started.elapsed(),
        };

        if result.is_clean() {
            info!(host = local, offset = final_offset, files = result.files_synced(), "file sync completed");
        } else {
            let failed: Vec<&str> = result.failed_hosts().collect();
            warn!(
                host = local,
                offset = final_offset,
                files = result.files_synced(),
                failed_hosts = ?failed,
                "file sync completed with failures"
            );
        }

        Ok(result)
    }

    fn enter(&self, phase: PassPhase) {
        debug!(host = %self.config.local_host, ?phase, "pass phase");
    }

    /// A failed lookup degrades to "no cursor": rescanning is safe, halting
    /// is not useful.
    async fn load_cursor(&self) -> LoadedCursor {
        match self.tracker.read_cursor(&self.config.local_host).await {
            Ok(Some(cursor)) => LoadedCursor {
                offset: cursor.offset,
                present: true,
            },
            Ok(None) => LoadedCursor {
                offset: 0,
                present: false,
            },
            Err(e) => {
                error!(host = %self.config.local_host, error = %e, "failed to read offset cursor, starting from 0");
                LoadedCursor {
                    offset: 0,
                    present: false,
                }
            }
        }
    }

    async fn query_changes(&self, since: Offset) -> (ChangeSet, Vec<ChangeRecord>) {
        let local = self.config.local_host.as_str();
        match self
            .change_log
            .query_pending(local, since, &self.config.path_filter)
            .await
        {
            Ok(records) => (ChangeSet::Queried { records: records.len() }, records),
            Err(e) => {
                error!(host = local, error = %e, "could not determine pending changes");
                self.alerts
                    .notify(&format!("Could not read change-log for {}: {}", local, e))
                    .await;
                (ChangeSet::Unavailable { reason: e.to_string() }, Vec::new())
            }
        }
    }

    /// Every host future completes before this returns, so the commit is
    /// computed from the full picture.
    async fn transfer_all(&self, pending: PendingTransfers) -> BTreeMap<String, HostOutcome> {
        let parallel = self.config.max_parallel_hosts.max(1);

        stream::iter(pending.into_batches())
            .map(|batch| async move {
                let outcome = self.sync_host(&batch).await;
                (batch.host, outcome)
            })
            .buffer_unordered(parallel)
            .collect()
            .await
    }

    async fn sync_host(&self, batch: &HostBatch) -> HostOutcome {
        let local = self.config.local_host.as_str();
        let host = batch.host.as_str();
        if batch.is_empty() {
            return HostOutcome::Synced {
                files: 0,
                last_offset: None,
            };
        }
        info!(
            host,
            local,
            files = batch.len(),
            through = ?batch.last_offset(),
            "syncing files from peer"
        );

        let mut session = match self.transfer.connect(host).await {
            Ok(session) => session,
            Err(e) => {
                self.alerts
                    .notify(&format!("Exception occurred while processing synchronisation for {}", host))
                    .await;
                error!(host, error = %e, "exception occurred while processing synchronisation");
                return HostOutcome::ConnectionFailed {
                    files: batch.len(),
                    first_offset: batch.first_offset(),
                    reason: e.to_string(),
                };
            }
        };

        let mut synced = 0;
        let mut last_offset = None;
        let mut outcome = None;

        for (index, file) in batch.files.iter().enumerate() {
            match session.fetch(&file.path).await {
                Ok(()) => {
                    synced += 1;
                    last_offset = Some(file.offset);
                    debug!(host = session.host(), path = %file.path, offset = file.offset, "fetched");
                }
                Err(e) => {
                    self.alerts
                        .notify(&format!("File sync failed for server {} for path {}", host, file.path))
                        .await;
                    error!(host, path = %file.path, offset = file.offset, error = %e, "failed to fetch file");
                    outcome = Some(HostOutcome::Partial {
                        synced,
                        last_offset,
                        failed_offset: file.offset,
                        failed_path: file.path.clone(),
                        abandoned: batch.len() - index - 1,
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }

        session.close().await;
        info!(host, local, offset = ?last_offset, "last offset synced from peer");

        outcome.unwrap_or(HostOutcome::Synced {
            files: synced,
            last_offset,
        })
    }
}
