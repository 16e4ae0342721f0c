//! Sweep phase
//!
//! Deletes the build directories named by pending-deletion records, then the records.
//! A record whose directory could not be deleted stays behind for the next sweep.

use crate::context::ExecutionContext;
use crate::error::{ApiError, StorageError};
use crate::gc::disk::{report_disk_usage, DiskUsage};
use crate::gc::ItemFailure;
use crate::tracking::record::TrackingRecordBase;
use crate::tracking::store::TrackingStore;
use crate::types::DirectoryNumber;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Pending-deletion records found when the sweep started
    pub pending: usize,
    /// Build directories deleted, with their records
    pub deleted: Vec<DirectoryNumber>,
    pub failures: Vec<ItemFailure>,
    /// Whether the sweep stopped early on cancellation
    pub cancelled: bool,
    /// Records not attempted because of cancellation
    pub skipped: usize,
    pub usage_before: Option<DiskUsage>,
    pub usage_after: Option<DiskUsage>,
}

#[derive(Debug, Clone)]
pub struct GarbageSweeper {
    store: TrackingStore,
}

impl GarbageSweeper {
    pub fn new(store: TrackingStore) -> Self {
        Self { store }
    }

    /// Pending-deletion files, in name order. Empty when the directory does not exist.
    pub fn pending_files(&self) -> Result<Vec<PathBuf>, StorageError> {
        let dir = self.store.layout().garbage_root();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&dir, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read directory entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file && path.extension() == Some(std::ffi::OsStr::new("json")) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Delete every pending build directory, polling for cancellation between items.
    pub fn sweep(&self, ctx: &dyn ExecutionContext) -> Result<SweepReport, ApiError> {
        let root = self.store.layout().root().to_path_buf();
        let mut report = SweepReport {
            usage_before: report_disk_usage(ctx, &root),
            ..SweepReport::default()
        };

        let garbage_root = self.store.layout().garbage_root();
        if !garbage_root.is_dir() {
            ctx.output(&format!(
                "Garbage collection directory {} does not exist, nothing to delete",
                garbage_root.display()
            ));
            return Ok(report);
        }

        let files = self.pending_files()?;
        if files.is_empty() {
            ctx.output(&format!(
                "Garbage collection directory {} is empty",
                garbage_root.display()
            ));
            return Ok(report);
        }

        report.pending = files.len();
        tracing::info!("Found {} pending deletions", files.len());

        for (index, file) in files.iter().enumerate() {
            if ctx.is_cancelled() {
                report.cancelled = true;
                report.skipped = files.len() - index;
                ctx.warning(&format!(
                    "Garbage collection cancelled, {} pending deletions left for a later run",
                    report.skipped
                ));
                break;
            }

            match self.sweep_one(ctx, file) {
                Ok(number) => report.deleted.push(number),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    ctx.error(&format!(
                        "Error while deleting garbage tracked by {}: {}",
                        file.display(),
                        e
                    ));
                    report.failures.push(ItemFailure {
                        path: file.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        report.usage_after = report_disk_usage(ctx, &root);
        Ok(report)
    }

    fn sweep_one(
        &self,
        ctx: &dyn ExecutionContext,
        pending_file: &Path,
    ) -> Result<DirectoryNumber, ApiError> {
        let record = match self.store.load_if_exists(ctx, pending_file)? {
            Some(TrackingRecordBase::Current(record)) => record,
            _ => return Err(ApiError::UnparseableRecord(pending_file.to_path_buf())),
        };

        let directory = self
            .store
            .layout()
            .build_directory(record.build_directory_number);
        ctx.output(&format!("Deleting {}", directory.display()));
        remove_build_directory(&directory)?;

        ctx.output(&format!(
            "Deleting garbage collection tracking file {}",
            pending_file.display()
        ));
        self.store.delete(pending_file)?;
        Ok(record.build_directory_number)
    }
}

/// Remove a build directory tree. Already gone is fine; a symlink is removed, not followed.
fn remove_build_directory(path: &Path) -> Result<(), StorageError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(path, e)),
    }
}
