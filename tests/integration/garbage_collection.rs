use buildtrack::config::WorkspaceLayout;
use buildtrack::context::{MessageLevel, RecordingContext};
use buildtrack::gc::{GarbageMarker, GarbageSweeper, MarkOutcome};
use buildtrack::tracking::{
    ConfigCodec, DefinitionIdentity, RepositoryHints, TrackingManager, TrackingStore,
};
use chrono::{Duration as ChronoDuration, Utc};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DAY: u64 = 86_400;

fn create(manager: &TrackingManager, hash_key: &str, days_since_run: i64) {
    let ctx = RecordingContext::new();
    let mut record = manager
        .create(
            &ctx,
            &DefinitionIdentity::new("c", hash_key),
            hash_key,
            &RepositoryHints::default(),
            false,
        )
        .unwrap();
    record.last_run_on = Some(Utc::now() - ChronoDuration::days(days_since_run));
    let path = manager.tracking_file_path(hash_key).unwrap();
    fs::write(&path, ConfigCodec::encode(&record).unwrap()).unwrap();
}

fn pending_count(root: &Path) -> usize {
    match fs::read_dir(root.join("SourceRootMapping").join("GC")) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[test]
fn forty_day_old_record_is_collected_with_thirty_day_window() {
    let temp = TempDir::new().unwrap();
    let manager = TrackingManager::new(WorkspaceLayout::new(temp.path()));
    create(&manager, "old", 40);
    create(&manager, "fresh", 1);
    let ctx = RecordingContext::new();

    let report = manager
        .mark_expired(&ctx, Duration::from_secs(30 * DAY))
        .unwrap();
    assert_eq!(report.marked_count(), 1);
    assert_eq!(report.retained_count(), 1);
    let marked: Vec<_> = report.marked().collect();
    assert!(matches!(
        marked[0],
        MarkOutcome::Marked {
            build_directory_number: 1,
            legacy: false,
            ..
        }
    ));
    assert!(!manager.tracking_file_path("old").unwrap().exists());
    assert!(manager.tracking_file_path("fresh").unwrap().exists());
    assert!(temp.path().join("1").exists());
    assert_eq!(pending_count(temp.path()), 1);

    let sweep = manager.sweep(&ctx).unwrap();
    assert_eq!(sweep.deleted, vec![1]);
    assert!(!temp.path().join("1").exists());
    assert!(temp.path().join("2").exists());
    assert_eq!(pending_count(temp.path()), 0);
}

#[test]
fn marking_against_a_future_clock() {
    let temp = TempDir::new().unwrap();
    let layout = WorkspaceLayout::new(temp.path());
    let manager = TrackingManager::new(layout.clone());
    create(&manager, "a", 0);
    let marker = GarbageMarker::new(TrackingStore::new(layout));
    let ctx = RecordingContext::new();

    let soon = Utc::now() + ChronoDuration::days(20);
    let report = marker
        .mark_expired_at(&ctx, Duration::from_secs(30 * DAY), soon)
        .unwrap();
    assert_eq!(report.marked_count(), 0);

    let later = Utc::now() + ChronoDuration::days(40);
    let report = marker
        .mark_expired_at(&ctx, Duration::from_secs(30 * DAY), later)
        .unwrap();
    assert_eq!(report.marked_count(), 1);
}

#[test]
fn legacy_records_are_always_collected() {
    let temp = TempDir::new().unwrap();
    let manager = TrackingManager::new(WorkspaceLayout::new(temp.path()));
    let legacy = manager.tracking_file_path("legacy").unwrap();
    fs::create_dir_all(legacy.parent().unwrap()).unwrap();
    fs::write(&legacy, r#"{"build_dirctory": "/agent/_work/3"}"#).unwrap();
    fs::create_dir_all(temp.path().join("3").join("s")).unwrap();
    let ctx = RecordingContext::new();

    let report = manager
        .run_maintenance(&ctx, Duration::from_secs(365 * DAY))
        .unwrap();

    let mark = report.mark.unwrap();
    assert_eq!(mark.marked_count(), 1);
    assert!(matches!(
        mark.outcomes[0],
        MarkOutcome::Marked { legacy: true, .. }
    ));
    assert_eq!(report.sweep.unwrap().deleted, vec![3]);
    assert!(!temp.path().join("3").exists());
    assert!(!legacy.exists());
}

#[test]
fn sweep_twice_is_a_no_op() {
    let temp = TempDir::new().unwrap();
    let manager = TrackingManager::new(WorkspaceLayout::new(temp.path()));
    create(&manager, "a", 90);
    create(&manager, "b", 90);
    let ctx = RecordingContext::new();

    manager.mark_expired(&ctx, Duration::from_secs(DAY)).unwrap();
    let first = manager.sweep(&ctx).unwrap();
    assert_eq!(first.deleted.len(), 2);

    let second = manager.sweep(&ctx).unwrap();
    assert_eq!(second.pending, 0);
    assert!(second.deleted.is_empty());
    assert!(second.failures.is_empty());
}

#[test]
fn unparseable_tracking_file_does_not_stop_marking() {
    let temp = TempDir::new().unwrap();
    let manager = TrackingManager::new(WorkspaceLayout::new(temp.path()));
    create(&manager, "good", 90);
    let broken = manager.tracking_file_path("broken").unwrap();
    fs::create_dir_all(broken.parent().unwrap()).unwrap();
    fs::write(&broken, r#"{"fileFormatVersion": 3, "buildDirectoryNumber": "x"}"#).unwrap();
    let ctx = RecordingContext::new();

    let report = manager.mark_expired(&ctx, Duration::from_secs(DAY)).unwrap();
    assert_eq!(report.marked_count(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, broken);
    assert!(broken.exists());
}

#[test]
fn cancelled_maintenance_leaves_pending_records_for_later() {
    let temp = TempDir::new().unwrap();
    let layout = WorkspaceLayout::new(temp.path());
    let manager = TrackingManager::new(layout.clone());
    create(&manager, "a", 90);
    manager
        .mark_expired(&RecordingContext::new(), Duration::from_secs(DAY))
        .unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let cancelled = RecordingContext::with_cancellation(token);
    let report = GarbageSweeper::new(TrackingStore::new(layout))
        .sweep(&cancelled)
        .unwrap();
    assert!(report.cancelled);
    assert!(temp.path().join("1").exists());
    assert!(!cancelled.messages_at(MessageLevel::Warning).is_empty());

    let resumed = manager.sweep(&RecordingContext::new()).unwrap();
    assert_eq!(resumed.deleted, vec![1]);
    assert!(!temp.path().join("1").exists());
}
