//! Mark phase
//!
//! Scans every tracking file under the mapping root and moves expired records into the
//! garbage directory. Legacy records carry no usable run time and are always moved.

use crate::context::ExecutionContext;
use crate::error::{ApiError, StorageError};
use crate::gc::ItemFailure;
use crate::tracking::record::{expiration_cutoff, TrackingRecord, TrackingRecordBase};
use crate::tracking::store::TrackingStore;
use crate::types::{DirectoryNumber, TRACKING_FILE_NAME};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;
use walkdir::WalkDir;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// What happened to one tracking file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MarkOutcome {
    /// Copied to the garbage directory and removed from the mapping root.
    Marked {
        tracking_file: PathBuf,
        pending_file: PathBuf,
        build_directory_number: DirectoryNumber,
        legacy: bool,
    },
    /// Still in use.
    Retained {
        tracking_file: PathBuf,
        build_directory_number: DirectoryNumber,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MarkReport {
    pub outcomes: Vec<MarkOutcome>,
    pub failures: Vec<ItemFailure>,
}

impl MarkReport {
    pub fn marked(&self) -> impl Iterator<Item = &MarkOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, MarkOutcome::Marked { .. }))
    }

    pub fn marked_count(&self) -> usize {
        self.marked().count()
    }

    pub fn retained_count(&self) -> usize {
        self.outcomes.len() - self.marked_count()
    }
}

#[derive(Debug, Clone)]
pub struct GarbageMarker {
    store: TrackingStore,
}

impl GarbageMarker {
    pub fn new(store: TrackingStore) -> Self {
        Self { store }
    }

    /// Every tracking file under the mapping root, skipping the garbage directory.
    ///
    /// Walk errors are yielded with the path they occurred at.
    pub fn tracking_files(
        &self,
    ) -> impl Iterator<Item = Result<PathBuf, (PathBuf, StorageError)>> {
        let root = self.store.layout().mapping_root();
        let garbage = self.store.layout().garbage_directory_name().to_string();
        WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                !(entry.depth() == 1 && entry.file_type().is_dir() && entry.file_name() == garbage.as_str())
            })
            .filter_map(move |entry| match entry {
                Ok(entry) => (entry.file_type().is_file()
                    && entry.file_name() == TRACKING_FILE_NAME)
                    .then(|| Ok(entry.into_path())),
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    let source = std::io::Error::from(e);
                    Some(Err((path.clone(), StorageError::io(path, source))))
                }
            })
    }

    /// Evaluate every tracking file against `cutoff`, one result per file.
    pub fn scan<'a>(
        &'a self,
        ctx: &'a dyn ExecutionContext,
        cutoff: Option<DateTime<Utc>>,
    ) -> impl Iterator<Item = (PathBuf, Result<MarkOutcome, ApiError>)> + 'a {
        self.tracking_files().map(move |entry| match entry {
            Ok(path) => {
                let result = self.evaluate(ctx, &path, cutoff);
                (path, result)
            }
            Err((path, e)) => (path, Err(e.into())),
        })
    }

    /// Mark every record unused for longer than `expiration`.
    ///
    /// Failures of single records are reported and collected; only an invariant
    /// violation aborts the scan.
    pub fn mark_expired(
        &self,
        ctx: &dyn ExecutionContext,
        expiration: Duration,
    ) -> Result<MarkReport, ApiError> {
        self.mark_expired_at(ctx, expiration, Utc::now())
    }

    pub fn mark_expired_at(
        &self,
        ctx: &dyn ExecutionContext,
        expiration: Duration,
        now: DateTime<Utc>,
    ) -> Result<MarkReport, ApiError> {
        let mut report = MarkReport::default();
        let root = self.store.layout().mapping_root();
        if !root.is_dir() {
            ctx.output(&format!(
                "Tracking directory {} does not exist, nothing to mark",
                root.display()
            ));
            return Ok(report);
        }

        ctx.output(&format!(
            "Build directories unused for more than {:.1} days will be marked for deletion",
            expiration.as_secs_f64() / SECONDS_PER_DAY
        ));
        ctx.output(&format!("Current UTC: {}", now.to_rfc3339()));
        let cutoff = expiration_cutoff(now, expiration);

        for (path, result) in self.scan(ctx, cutoff) {
            match result {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    ctx.error(&format!(
                        "Error while evaluating tracking file {} for garbage collection: {}",
                        path.display(),
                        e
                    ));
                    report.failures.push(ItemFailure {
                        path,
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            marked = report.marked_count(),
            retained = report.retained_count(),
            failed = report.failures.len(),
            "Mark phase finished"
        );
        Ok(report)
    }

    fn evaluate(
        &self,
        ctx: &dyn ExecutionContext,
        tracking_file: &Path,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<MarkOutcome, ApiError> {
        ctx.output(&format!("Evaluate tracking file: {}", tracking_file.display()));
        let record = self
            .store
            .load_if_exists(ctx, tracking_file)?
            .ok_or_else(|| ApiError::UnparseableRecord(tracking_file.to_path_buf()))?;

        match record {
            TrackingRecordBase::Legacy(legacy) => {
                tracing::debug!("{} is a legacy tracking file", tracking_file.display());
                ctx.output(&format!(
                    "Marking legacy tracking file {} for garbage collection",
                    tracking_file.display()
                ));
                let upgraded = legacy.upgrade()?;
                self.move_to_garbage(ctx, tracking_file, upgraded, true)
            }
            TrackingRecordBase::Current(record) => {
                let last_run = record
                    .last_run_on
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                ctx.output(&format!(
                    "Build directory {} was last used on {}",
                    self.store
                        .layout()
                        .build_directory(record.build_directory_number)
                        .display(),
                    last_run
                ));
                if record.is_expired(cutoff) {
                    ctx.output(&format!(
                        "Marking unused tracking file {} for garbage collection",
                        tracking_file.display()
                    ));
                    self.move_to_garbage(ctx, tracking_file, record, false)
                } else {
                    Ok(MarkOutcome::Retained {
                        tracking_file: tracking_file.to_path_buf(),
                        build_directory_number: record.build_directory_number,
                    })
                }
            }
        }
    }

    /// Copy to the garbage directory, then remove the original. If the original cannot be
    /// removed the copy is withdrawn, so a live record never has a pending deletion.
    fn move_to_garbage(
        &self,
        ctx: &dyn ExecutionContext,
        tracking_file: &Path,
        record: TrackingRecord,
        legacy: bool,
    ) -> Result<MarkOutcome, ApiError> {
        let build_directory_number = record.build_directory_number;
        let pending_file = self.write_pending(ctx, &record)?;
        if let Err(e) = self.store.delete(tracking_file) {
            if let Err(cleanup) = self.store.delete(&pending_file) {
                ctx.warning(&format!(
                    "Unable to withdraw pending deletion {}: {}",
                    pending_file.display(),
                    cleanup
                ));
            }
            return Err(e.into());
        }
        Ok(MarkOutcome::Marked {
            tracking_file: tracking_file.to_path_buf(),
            pending_file,
            build_directory_number,
            legacy,
        })
    }

    /// Queue a record for deletion under a fresh name. Legacy records are upgraded first.
    pub fn mark_for_deletion(
        &self,
        ctx: &dyn ExecutionContext,
        record: &TrackingRecordBase,
    ) -> Result<PathBuf, ApiError> {
        let record = record.clone().into_current()?;
        self.write_pending(ctx, &record)
    }

    fn write_pending(
        &self,
        ctx: &dyn ExecutionContext,
        record: &TrackingRecord,
    ) -> Result<PathBuf, ApiError> {
        let file = self
            .store
            .layout()
            .garbage_root()
            .join(format!("{}.json", Uuid::new_v4()));
        self.store.write_new(&file, record)?;
        ctx.debug(&format!(
            "Build directory {} queued for deletion in {}",
            record.build_directory_number,
            file.display()
        ));
        Ok(file)
    }
}
