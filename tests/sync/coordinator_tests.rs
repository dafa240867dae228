// Tests for the synchronisation pass
// Drives SyncCoordinator against in-memory stores and scripted transfers

use std::sync::Arc;

use fleetsync::store::{ChangeRecord, MemoryStore, PathFilter};
use fleetsync::sync::{ChangeSet, CoordinatorConfig, HostOutcome, HostStatus, SyncCoordinator};
use fleetsync::SyncError;

use crate::support::{
    coordinator, coordinator_with, BrokenChangeLog, FlakyTracker, RecordingAlerts, ScriptedTransfer,
    LOCAL,
};

fn two_host_log() -> Vec<ChangeRecord> {
    vec![
        ChangeRecord::new(20, "/opt/data/a/1", "web-2"),
        ChangeRecord::new(30, "/opt/data/a/2", "web-2"),
        ChangeRecord::new(35, "/opt/data/b/1", "web-3"),
        ChangeRecord::new(40, "/opt/data/a/3", "web-2"),
        ChangeRecord::new(50, "/opt/data/b/2", "web-3"),
    ]
}

#[tokio::test]
async fn test_first_pass_inserts_cursor_at_max_offset() {
    let store = Arc::new(MemoryStore::with_records(two_host_log()));
    let transfer = Arc::new(ScriptedTransfer::new());
    let alerts = Arc::new(RecordingAlerts::default());

    let result = coordinator(&store, &transfer, &alerts).run_pass().await.unwrap();

    assert!(result.cursor_created);
    assert_eq!(result.previous_offset, 0);
    assert_eq!(result.final_offset, 50);
    assert_eq!(store.cursor(LOCAL).unwrap().offset, 50);
    assert!(result.is_clean());
    assert_eq!(result.files_synced(), 5);
    assert_eq!(result.changes, ChangeSet::Queried { records: 5 });
    assert!(alerts.messages().is_empty());

    assert_eq!(
        transfer.fetched_from("web-2"),
        vec!["/opt/data/a/1", "/opt/data/a/2", "/opt/data/a/3"]
    );
    assert_eq!(transfer.closed(), vec!["web-2", "web-3"]);
}

#[tokio::test]
async fn test_failed_file_bounds_commit_across_hosts() {
    let store = Arc::new(MemoryStore::with_records(two_host_log()));
    store.set_cursor(LOCAL, 10);
    let transfer = Arc::new(ScriptedTransfer::new().failing("/opt/data/a/2"));
    let alerts = Arc::new(RecordingAlerts::default());

    let result = coordinator(&store, &transfer, &alerts).run_pass().await.unwrap();

    // web-2 stopped at 30, so nothing at or above 30 may be marked synced,
    // even though web-3 got through 50.
    assert_eq!(result.final_offset, 20);
    assert_eq!(store.cursor(LOCAL).unwrap().offset, 20);
    assert!(!result.cursor_created);

    assert_eq!(transfer.fetched_from("web-2"), vec!["/opt/data/a/1"]);
    assert_eq!(transfer.fetched_from("web-3"), vec!["/opt/data/b/1", "/opt/data/b/2"]);

    let web2 = &result.hosts["web-2"];
    assert_eq!(web2.status(), HostStatus::Partial);
    assert_eq!(
        *web2,
        HostOutcome::Partial {
            synced: 1,
            last_offset: Some(20),
            failed_offset: 30,
            failed_path: "/opt/data/a/2".to_string(),
            abandoned: 1,
            reason: "failed to fetch /opt/data/a/2 from web-2: No such file".to_string(),
        }
    );
    assert_eq!(result.hosts["web-3"].status(), HostStatus::Success);

    assert_eq!(
        alerts.messages(),
        vec!["File sync failed for server web-2 for path /opt/data/a/2"]
    );
}

#[tokio::test]
async fn test_failed_pass_is_retried_from_the_gap() {
    let store = Arc::new(MemoryStore::with_records(two_host_log()));
    store.set_cursor(LOCAL, 10);
    let alerts = Arc::new(RecordingAlerts::default());

    let failing = Arc::new(ScriptedTransfer::new().failing("/opt/data/a/2"));
    coordinator(&store, &failing, &alerts).run_pass().await.unwrap();

    let healthy = Arc::new(ScriptedTransfer::new());
    let result = coordinator(&store, &healthy, &alerts).run_pass().await.unwrap();

    assert_eq!(result.previous_offset, 20);
    assert_eq!(result.final_offset, 50);
    assert_eq!(
        healthy.fetched_from("web-2"),
        vec!["/opt/data/a/2", "/opt/data/a/3"]
    );
}

#[tokio::test]
async fn test_rerun_without_new_records_is_a_noop() {
    let store = Arc::new(MemoryStore::with_records(two_host_log()));
    let alerts = Arc::new(RecordingAlerts::default());

    let first = Arc::new(ScriptedTransfer::new());
    let done = coordinator(&store, &first, &alerts).run_pass().await.unwrap();

    let second = Arc::new(ScriptedTransfer::new());
    let again = coordinator(&store, &second, &alerts).run_pass().await.unwrap();

    assert_eq!(again.final_offset, done.final_offset);
    assert_eq!(again.previous_offset, done.final_offset);
    assert!(!again.cursor_created);
    assert!(again.hosts.is_empty());
    assert!(second.connects().is_empty());
    assert_eq!(store.cursor(LOCAL).unwrap().offset, 50);
}

#[tokio::test]
async fn test_own_records_and_idle_hosts_are_not_contacted() {
    let store = Arc::new(MemoryStore::with_records(vec![
        ChangeRecord::new(1, "/opt/data/own", LOCAL),
        ChangeRecord::new(2, "/opt/data/peer", "web-2"),
        ChangeRecord::new(3, "/opt/data/own2", LOCAL),
    ]));
    let transfer = Arc::new(ScriptedTransfer::new());
    let alerts = Arc::new(RecordingAlerts::default());

    let result = coordinator(&store, &transfer, &alerts).run_pass().await.unwrap();

    assert_eq!(transfer.connects(), vec!["web-2"]);
    assert_eq!(result.hosts.len(), 1);
    assert_eq!(result.final_offset, 2);
}

#[tokio::test]
async fn test_path_filter_limits_pending_records() {
    let store = Arc::new(MemoryStore::with_records(vec![
        ChangeRecord::new(1, "/x/a/file", "web-2"),
        ChangeRecord::new(2, "/x/c/file", "web-2"),
        ChangeRecord::new(3, "/x/b/file", "web-3"),
    ]));
    let transfer = Arc::new(ScriptedTransfer::new());
    let alerts = Arc::new(RecordingAlerts::default());
    let config = CoordinatorConfig::new(LOCAL).with_path_filter(PathFilter::new(["/a/", "/b/"]));

    let result = coordinator_with(config, &store, &transfer, &alerts)
        .run_pass()
        .await
        .unwrap();

    assert_eq!(transfer.fetched_from("web-2"), vec!["/x/a/file"]);
    assert_eq!(transfer.fetched_from("web-3"), vec!["/x/b/file"]);
    assert_eq!(result.final_offset, 3);
}

#[tokio::test]
async fn test_unreachable_host_is_skipped_and_alerted() {
    let store = Arc::new(MemoryStore::with_records(vec![
        ChangeRecord::new(11, "/opt/data/b/1", "web-3"),
        ChangeRecord::new(12, "/opt/data/a/1", "web-2"),
        ChangeRecord::new(13, "/opt/data/b/2", "web-3"),
    ]));
    store.set_cursor(LOCAL, 10);
    let transfer = Arc::new(ScriptedTransfer::new().unreachable("web-2"));
    let alerts = Arc::new(RecordingAlerts::default());

    let result = coordinator(&store, &transfer, &alerts).run_pass().await.unwrap();

    assert_eq!(transfer.fetched_from("web-3"), vec!["/opt/data/b/1", "/opt/data/b/2"]);
    assert!(transfer.fetched_from("web-2").is_empty());
    assert!(matches!(
        result.hosts["web-2"],
        HostOutcome::ConnectionFailed { files: 1, first_offset: Some(12), .. }
    ));
    assert_eq!(result.final_offset, 11);
    assert_eq!(
        alerts.messages(),
        vec!["Exception occurred while processing synchronisation for web-2"]
    );
    assert_eq!(result.failed_hosts().collect::<Vec<_>>(), vec!["web-2"]);
}

#[tokio::test]
async fn test_failure_on_first_file_keeps_cursor() {
    let store = Arc::new(MemoryStore::with_records(vec![
        ChangeRecord::new(5, "/opt/data/a/1", "web-2"),
        ChangeRecord::new(6, "/opt/data/a/2", "web-2"),
    ]));
    store.set_cursor(LOCAL, 4);
    let transfer = Arc::new(ScriptedTransfer::new().failing("/opt/data/a/1"));
    let alerts = Arc::new(RecordingAlerts::default());

    let result = coordinator(&store, &transfer, &alerts).run_pass().await.unwrap();

    assert_eq!(result.final_offset, 4);
    assert_eq!(result.hosts["web-2"].status(), HostStatus::Failed);
    assert_eq!(store.cursor(LOCAL).unwrap().offset, 4);
}

#[tokio::test]
async fn test_parallel_hosts_aggregate_before_commit() {
    let store = Arc::new(MemoryStore::with_records(two_host_log()));
    store.set_cursor(LOCAL, 10);
    let transfer = Arc::new(ScriptedTransfer::new().failing("/opt/data/a/2"));
    let alerts = Arc::new(RecordingAlerts::default());
    let config = CoordinatorConfig::new(LOCAL).with_max_parallel_hosts(4);

    let result = coordinator_with(config, &store, &transfer, &alerts)
        .run_pass()
        .await
        .unwrap();

    assert_eq!(result.final_offset, 20);
    assert_eq!(transfer.connects(), vec!["web-2", "web-3"]);
}

#[tokio::test]
async fn test_unreadable_change_log_recommits_cursor() {
    let store = Arc::new(MemoryStore::new());
    store.set_cursor(LOCAL, 42);
    let transfer = Arc::new(ScriptedTransfer::new());
    let alerts = Arc::new(RecordingAlerts::default());

    let coordinator = SyncCoordinator::new(
        CoordinatorConfig::new(LOCAL),
        Arc::new(BrokenChangeLog),
        store.clone(),
        transfer.clone(),
        alerts.clone(),
    );
    let result = coordinator.run_pass().await.unwrap();

    assert!(matches!(result.changes, ChangeSet::Unavailable { .. }));
    assert!(!result.is_clean());
    assert_eq!(result.final_offset, 42);
    assert_eq!(store.cursor(LOCAL).unwrap().offset, 42);
    assert!(transfer.connects().is_empty());
    assert_eq!(alerts.messages().len(), 1);
    assert!(alerts.messages()[0].starts_with("Could not read change-log for web-1"));
}

#[tokio::test]
async fn test_unreadable_cursor_rescans_from_zero() {
    let store = Arc::new(MemoryStore::with_records(vec![
        ChangeRecord::new(1, "/opt/data/a/1", "web-2"),
        ChangeRecord::new(2, "/opt/data/a/2", "web-2"),
    ]));
    let tracker = Arc::new(FlakyTracker {
        inner: store.clone(),
        fail_reads: true,
        fail_writes: false,
    });
    let transfer = Arc::new(ScriptedTransfer::new());
    let alerts = Arc::new(RecordingAlerts::default());

    let coordinator = SyncCoordinator::new(
        CoordinatorConfig::new(LOCAL),
        store.clone(),
        tracker,
        transfer.clone(),
        alerts.clone(),
    );
    let result = coordinator.run_pass().await.unwrap();

    assert_eq!(result.previous_offset, 0);
    assert!(result.cursor_created);
    assert_eq!(store.cursor(LOCAL).unwrap().offset, 2);
    assert_eq!(transfer.fetched_from("web-2").len(), 2);
}

#[tokio::test]
async fn test_commit_failure_is_fatal() {
    let store = Arc::new(MemoryStore::with_records(vec![ChangeRecord::new(
        7,
        "/opt/data/a/1",
        "web-2",
    )]));
    store.set_cursor(LOCAL, 3);
    let tracker = Arc::new(FlakyTracker {
        inner: store.clone(),
        fail_reads: false,
        fail_writes: true,
    });
    let transfer = Arc::new(ScriptedTransfer::new());
    let alerts = Arc::new(RecordingAlerts::default());

    let coordinator = SyncCoordinator::new(
        CoordinatorConfig::new(LOCAL),
        store.clone(),
        tracker,
        transfer.clone(),
        alerts.clone(),
    );
    let err = coordinator.run_pass().await.unwrap_err();

    match err {
        SyncError::Commit { host, offset, .. } => {
            assert_eq!(host, LOCAL);
            assert_eq!(offset, 7);
        }
    }
    assert_eq!(store.cursor(LOCAL).unwrap().offset, 3);
}
