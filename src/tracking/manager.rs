//! Tracking manager
//!
//! Facade over the store, allocator and garbage collector. This is the surface the job
//! runner talks to: it asks for a build directory before a run, updates bookkeeping
//! during maintenance, and drives garbage collection.

use crate::config::{BuildTrackConfig, WorkspaceLayout};
use crate::context::ExecutionContext;
use crate::error::{ApiError, StorageError};
use crate::gc::{GarbageMarker, GarbageSweeper, MarkReport, SweepReport};
use crate::tracking::allocator::TopLevelAllocator;
use crate::tracking::identity::{DefinitionIdentity, RepositoryHints};
use crate::tracking::record::{TrackingRecord, TrackingRecordBase};
use crate::tracking::store::TrackingStore;
use crate::types::DirectoryNumber;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A build directory ready for a run
#[derive(Debug, Clone)]
pub struct PreparedDirectory {
    pub record: TrackingRecord,
    pub tracking_file: PathBuf,
    /// Absolute build directory
    pub build_directory: PathBuf,
    /// Whether the directory was newly allocated for this run
    pub created: bool,
}

/// Result of a combined mark and sweep pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub mark: Option<MarkReport>,
    pub sweep: Option<SweepReport>,
}

/// A tracking file found on disk
#[derive(Debug, Clone)]
pub struct ListedRecord {
    pub tracking_file: PathBuf,
    pub record: TrackingRecordBase,
}

pub struct TrackingManager {
    store: TrackingStore,
    allocator: TopLevelAllocator,
    marker: GarbageMarker,
    sweeper: GarbageSweeper,
    forced_directory_number: Option<DirectoryNumber>,
}

impl TrackingManager {
    pub fn new(layout: WorkspaceLayout) -> Self {
        let store = TrackingStore::new(layout.clone());
        Self {
            allocator: TopLevelAllocator::new(layout),
            marker: GarbageMarker::new(store.clone()),
            sweeper: GarbageSweeper::new(store.clone()),
            store,
            forced_directory_number: None,
        }
    }

    pub fn from_config(layout: WorkspaceLayout, config: &BuildTrackConfig) -> Self {
        Self::new(layout).with_forced_directory_number(config.agent.agent_id)
    }

    /// Number used when a caller asks for a forced directory (the agent id on hosted pools).
    pub fn with_forced_directory_number(mut self, number: Option<DirectoryNumber>) -> Self {
        self.forced_directory_number = number;
        self
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        self.store.layout()
    }

    pub fn tracking_file_path(&self, hash_key: &str) -> Result<PathBuf, ApiError> {
        self.store.tracking_file_path(hash_key)
    }

    /// Allocate a build directory for a hash key and persist its tracking record.
    ///
    /// With `force_directory` the configured forced number is used instead of the next
    /// counter value; that is only legal on a workspace root that never allocated before.
    pub fn create(
        &self,
        ctx: &dyn ExecutionContext,
        identity: &DefinitionIdentity,
        hash_key: &str,
        hints: &RepositoryHints,
        force_directory: bool,
    ) -> Result<TrackingRecord, ApiError> {
        // Validate the key before a number is spent on it.
        self.store.tracking_file_path(hash_key)?;

        let forced = if force_directory {
            Some(self.forced_directory_number.ok_or_else(|| {
                ApiError::ConfigError(
                    "a forced build directory was requested but agent.agent_id is not set"
                        .to_string(),
                )
            })?)
        } else {
            None
        };

        let number = self.allocator.allocate_next(ctx, forced)?;
        let record = self.store.create(identity, hash_key, number, hints)?;
        self.create_physical_directories(&record)?;
        ctx.output(&format!(
            "Created build directory {} for {}",
            self.layout().build_directory(number).display(),
            hash_key
        ));
        Ok(record)
    }

    pub fn load_if_exists(
        &self,
        ctx: &dyn ExecutionContext,
        path: &Path,
    ) -> Result<Option<TrackingRecordBase>, ApiError> {
        self.store.load_if_exists(ctx, path)
    }

    /// Queue a record for deletion by the next sweep.
    pub fn mark_for_garbage_collection(
        &self,
        ctx: &dyn ExecutionContext,
        record: &TrackingRecordBase,
    ) -> Result<PathBuf, ApiError> {
        self.marker.mark_for_deletion(ctx, record)
    }

    /// Refresh identity metadata and the last run time.
    pub fn update_run_metadata(
        &self,
        record: &mut TrackingRecord,
        path: &Path,
        identity: &DefinitionIdentity,
    ) -> Result<(), ApiError> {
        record.update_run_metadata(identity, Utc::now());
        self.store.write(path, record)?;
        Ok(())
    }

    pub fn record_maintenance_started(
        &self,
        record: &mut TrackingRecord,
        path: &Path,
    ) -> Result<(), ApiError> {
        record.maintenance_started(Utc::now());
        self.store.write(path, record)?;
        Ok(())
    }

    pub fn record_maintenance_completed(
        &self,
        record: &mut TrackingRecord,
        path: &Path,
    ) -> Result<(), ApiError> {
        record.maintenance_completed(Utc::now());
        self.store.write(path, record)?;
        Ok(())
    }

    pub fn mark_expired(
        &self,
        ctx: &dyn ExecutionContext,
        expiration: Duration,
    ) -> Result<MarkReport, ApiError> {
        self.marker.mark_expired(ctx, expiration)
    }

    pub fn sweep(&self, ctx: &dyn ExecutionContext) -> Result<SweepReport, ApiError> {
        self.sweeper.sweep(ctx)
    }

    /// Get the build directory for a definition ready for a run.
    ///
    /// An existing current record is reused and stamped; a legacy record is handed to the
    /// garbage collector and replaced; a missing or unreadable record is created.
    pub fn prepare_directory(
        &self,
        ctx: &dyn ExecutionContext,
        identity: &DefinitionIdentity,
        hints: &RepositoryHints,
        force_directory: bool,
    ) -> Result<PreparedDirectory, ApiError> {
        let hash_key = identity.hash_key();
        let tracking_file = self.store.tracking_file_path(&hash_key)?;

        let existing = match self.store.load_if_exists(ctx, &tracking_file) {
            // Present but in neither format.
            Ok(None) if tracking_file.is_file() => {
                self.quarantine_unreadable(ctx, &tracking_file, "not a tracking record")?;
                None
            }
            Ok(existing) => existing,
            Err(ApiError::StorageError(StorageError::Serialization(e))) => {
                self.quarantine_unreadable(ctx, &tracking_file, &e)?;
                None
            }
            Err(e) => return Err(e),
        };

        let (record, created) = match existing {
            Some(TrackingRecordBase::Current(mut record)) => {
                self.update_run_metadata(&mut record, &tracking_file, identity)?;
                (record, false)
            }
            Some(legacy @ TrackingRecordBase::Legacy(_)) => {
                ctx.output(&format!(
                    "Replacing legacy tracking file {}",
                    tracking_file.display()
                ));
                if let Err(e) = self.mark_for_garbage_collection(ctx, &legacy) {
                    ctx.warning(&format!(
                        "Unable to queue legacy build directory for deletion: {}",
                        e
                    ));
                }
                (self.create(ctx, identity, &hash_key, hints, force_directory)?, true)
            }
            None => (self.create(ctx, identity, &hash_key, hints, force_directory)?, true),
        };

        self.create_physical_directories(&record)?;
        Ok(PreparedDirectory {
            build_directory: self.layout().build_directory(record.build_directory_number),
            record,
            tracking_file,
            created,
        })
    }

    /// Mark then sweep. Per-item problems are reported through `ctx`; a phase that fails
    /// as a whole is reported too and leaves its slot in the report empty. Only an
    /// invariant violation is returned as an error.
    pub fn run_maintenance(
        &self,
        ctx: &dyn ExecutionContext,
        expiration: Duration,
    ) -> Result<MaintenanceReport, ApiError> {
        let mut report = MaintenanceReport::default();

        match self.mark_expired(ctx, expiration) {
            Ok(mark) => report.mark = Some(mark),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => ctx.error(&format!("Marking expired build directories failed: {}", e)),
        }

        if ctx.is_cancelled() {
            ctx.warning("Maintenance cancelled before sweeping");
            return Ok(report);
        }

        match self.sweep(ctx) {
            Ok(sweep) => report.sweep = Some(sweep),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => ctx.error(&format!("Deleting collected garbage failed: {}", e)),
        }

        Ok(report)
    }

    /// Every tracking file with its decoded record. Unreadable files are reported and left out.
    pub fn list_records(&self, ctx: &dyn ExecutionContext) -> Result<Vec<ListedRecord>, ApiError> {
        let mut listed = Vec::new();
        for entry in self.marker.tracking_files() {
            let path = match entry {
                Ok(path) => path,
                Err((path, e)) => {
                    ctx.warning(&format!("Unable to read {}: {}", path.display(), e));
                    continue;
                }
            };
            match self.store.load_if_exists(ctx, &path) {
                Ok(Some(record)) => listed.push(ListedRecord {
                    tracking_file: path,
                    record,
                }),
                Ok(None) => {}
                Err(e) => ctx.warning(&format!("Unable to read {}: {}", path.display(), e)),
            }
        }
        Ok(listed)
    }

    /// Keep an unreadable tracking file as a sidecar so the build directory it named can
    /// still be found and cleaned up by hand.
    fn quarantine_unreadable(
        &self,
        ctx: &dyn ExecutionContext,
        tracking_file: &Path,
        reason: &str,
    ) -> Result<(), ApiError> {
        let sidecar = self.store.quarantine(tracking_file)?;
        ctx.warning(&format!(
            "Tracking file {} is corrupt ({}) and will be replaced; original kept as {}",
            tracking_file.display(),
            reason,
            sidecar.display()
        ));
        Ok(())
    }

    fn create_physical_directories(&self, record: &TrackingRecord) -> Result<(), StorageError> {
        let root = self.layout().root();
        for relative in record.standard_directories() {
            let path = root.join(relative);
            std::fs::create_dir_all(&path).map_err(|e| StorageError::io(&path, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{MessageLevel, RecordingContext};
    use std::fs;

    fn manager(root: &Path) -> TrackingManager {
        TrackingManager::new(WorkspaceLayout::new(root))
    }

    #[test]
    fn test_create_allocates_sequentially() {
        let temp = tempfile::tempdir().unwrap();
        let manager = manager(temp.path());
        let ctx = RecordingContext::new();
        let hints = RepositoryHints::default();

        let first = manager
            .create(&ctx, &DefinitionIdentity::new("c", "def-1"), "abc", &hints, false)
            .unwrap();
        let second = manager
            .create(&ctx, &DefinitionIdentity::new("c", "def-2"), "xyz", &hints, false)
            .unwrap();

        assert_eq!(first.build_directory_number, 1);
        assert_eq!(second.build_directory_number, 2);
        assert!(temp.path().join("1").join("s").is_dir());
        assert!(temp.path().join("2").join("TestResults").is_dir());
    }

    #[test]
    fn test_create_rejects_bad_key_without_spending_a_number() {
        let temp = tempfile::tempdir().unwrap();
        let manager = manager(temp.path());
        let ctx = RecordingContext::new();
        let identity = DefinitionIdentity::new("c", "d");
        let hints = RepositoryHints::default();

        assert!(manager.create(&ctx, &identity, "../x", &hints, false).is_err());
        let record = manager.create(&ctx, &identity, "ok", &hints, false).unwrap();
        assert_eq!(record.build_directory_number, 1);
    }

    #[test]
    fn test_forced_directory_requires_configuration_and_fresh_counter() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = RecordingContext::new();
        let identity = DefinitionIdentity::new("c", "d");
        let hints = RepositoryHints::default();

        let unconfigured = manager(temp.path());
        assert!(matches!(
            unconfigured.create(&ctx, &identity, "a", &hints, true),
            Err(ApiError::ConfigError(_))
        ));

        let forced = manager(temp.path()).with_forced_directory_number(Some(31));
        let record = forced.create(&ctx, &identity, "a", &hints, true).unwrap();
        assert_eq!(record.build_directory_number, 31);

        let err = forced.create(&ctx, &identity, "b", &hints, true).unwrap_err();
        assert!(matches!(err, ApiError::InvariantViolation(_)));
    }

    #[test]
    fn test_maintenance_timestamps() {
        let temp = tempfile::tempdir().unwrap();
        let manager = manager(temp.path());
        let ctx = RecordingContext::new();
        let identity = DefinitionIdentity::new("c", "d");
        let mut record = manager
            .create(&ctx, &identity, "k", &RepositoryHints::default(), false)
            .unwrap();
        let path = manager.tracking_file_path("k").unwrap();

        manager.record_maintenance_started(&mut record, &path).unwrap();
        manager.record_maintenance_completed(&mut record, &path).unwrap();
        manager.record_maintenance_started(&mut record, &path).unwrap();

        let loaded = manager
            .load_if_exists(&ctx, &path)
            .unwrap()
            .unwrap()
            .into_current()
            .unwrap();
        assert!(loaded.last_maintenance_attempted_on.is_some());
        assert_eq!(loaded.last_maintenance_completed_on, None);
    }

    #[test]
    fn test_update_run_metadata_persists() {
        let temp = tempfile::tempdir().unwrap();
        let manager = manager(temp.path());
        let ctx = RecordingContext::new();
        let identity = DefinitionIdentity::new("c", "d");
        let mut record = manager
            .create(&ctx, &identity, "k", &RepositoryHints::default(), false)
            .unwrap();
        let path = manager.tracking_file_path("k").unwrap();
        record.last_run_on = None;

        let renamed = identity.with_definition_name("nightly");
        manager
            .update_run_metadata(&mut record, &path, &renamed)
            .unwrap();

        let loaded = manager
            .load_if_exists(&ctx, &path)
            .unwrap()
            .unwrap()
            .into_current()
            .unwrap();
        assert_eq!(loaded.definition_name, "nightly");
        assert!(loaded.last_run_on.is_some());
    }

    #[test]
    fn test_prepare_directory_reuses_existing_record() {
        let temp = tempfile::tempdir().unwrap();
        let manager = manager(temp.path());
        let ctx = RecordingContext::new();
        let identity = DefinitionIdentity::new("c", "d").with_repository_url("https://git/r");
        let hints = RepositoryHints::default();

        let first = manager.prepare_directory(&ctx, &identity, &hints, false).unwrap();
        let second = manager.prepare_directory(&ctx, &identity, &hints, false).unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(
            first.record.build_directory_number,
            second.record.build_directory_number
        );
        assert_eq!(second.build_directory, temp.path().join("1"));
    }

    #[test]
    fn test_prepare_directory_replaces_legacy_record() {
        let temp = tempfile::tempdir().unwrap();
        let manager = manager(temp.path());
        let ctx = RecordingContext::new();
        let identity = DefinitionIdentity::new("c", "d");
        let path = manager.tracking_file_path(&identity.hash_key()).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"build_dirctory": "3"}"#).unwrap();
        fs::create_dir_all(temp.path().join("3")).unwrap();

        let prepared = manager
            .prepare_directory(&ctx, &identity, &RepositoryHints::default(), false)
            .unwrap();

        assert!(prepared.created);
        assert_eq!(prepared.record.build_directory_number, 4);
        let pending = fs::read_dir(manager.layout().garbage_root()).unwrap().count();
        assert_eq!(pending, 1);
    }

    #[test]
    fn test_prepare_directory_quarantines_corrupt_record() {
        let temp = tempfile::tempdir().unwrap();
        let manager = manager(temp.path());
        let ctx = RecordingContext::new();
        let identity = DefinitionIdentity::new("c", "d");
        let path = manager.tracking_file_path(&identity.hash_key()).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let corrupt = r#"{"fileFormatVersion": 3, "buildDirectoryNumber": 4"#;
        fs::write(&path, corrupt).unwrap();
        fs::create_dir_all(temp.path().join("4")).unwrap();

        let prepared = manager
            .prepare_directory(&ctx, &identity, &RepositoryHints::default(), false)
            .unwrap();

        assert!(prepared.created);
        assert_eq!(prepared.record.build_directory_number, 5);
        let sidecar = path.with_file_name("trackingfile.json.corrupted");
        assert_eq!(fs::read_to_string(&sidecar).unwrap(), corrupt);
        let warnings = ctx.messages_at(MessageLevel::Warning);
        assert!(warnings
            .iter()
            .any(|w| w.contains(&sidecar.display().to_string())));
    }

    #[test]
    fn test_prepare_directory_quarantines_unrecognized_content() {
        let temp = tempfile::tempdir().unwrap();
        let manager = manager(temp.path());
        let ctx = RecordingContext::new();
        let identity = DefinitionIdentity::new("c", "d");
        let path = manager.tracking_file_path(&identity.hash_key()).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[1, 2]").unwrap();

        manager
            .prepare_directory(&ctx, &identity, &RepositoryHints::default(), false)
            .unwrap();

        assert!(path.with_file_name("trackingfile.json.corrupted").exists());
        assert!(manager.load_if_exists(&ctx, &path).unwrap().is_some());
    }

    #[test]
    fn test_run_maintenance_marks_and_sweeps() {
        let temp = tempfile::tempdir().unwrap();
        let manager = manager(temp.path());
        let ctx = RecordingContext::new();
        let identity = DefinitionIdentity::new("c", "d");
        let mut record = manager
            .create(&ctx, &identity, "k", &RepositoryHints::default(), false)
            .unwrap();
        let path = manager.tracking_file_path("k").unwrap();
        record.last_run_on = Some(Utc::now() - chrono::Duration::days(10));
        manager.store.write(&path, &record).unwrap();

        let report = manager
            .run_maintenance(&ctx, Duration::from_secs(86_400))
            .unwrap();

        assert_eq!(report.mark.unwrap().marked_count(), 1);
        assert_eq!(report.sweep.unwrap().deleted, vec![1]);
        assert!(!temp.path().join("1").exists());
        assert!(!path.exists());
    }

    #[test]
    fn test_list_records_includes_legacy() {
        let temp = tempfile::tempdir().unwrap();
        let manager = manager(temp.path());
        let ctx = RecordingContext::new();
        manager
            .create(&ctx, &DefinitionIdentity::new("c", "d"), "a", &RepositoryHints::default(), false)
            .unwrap();
        let legacy = manager.tracking_file_path("b").unwrap();
        fs::create_dir_all(legacy.parent().unwrap()).unwrap();
        fs::write(&legacy, r#"{"build_dirctory": "9"}"#).unwrap();

        let listed = manager.list_records(&ctx).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed.iter().filter(|l| l.record.is_legacy()).count(), 1);
    }
}
