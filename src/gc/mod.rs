//! Garbage collection of build directories
//!
//! Two phases that only communicate through the garbage directory. Marking copies expired
//! tracking records into it and removes the originals; sweeping deletes the build
//! directories those copies name, then the copies. Either phase can be interrupted and
//! rerun by a later process.

pub mod disk;
pub mod marker;
pub mod sweeper;

pub use disk::{report_disk_usage, DiskUsage};
pub use marker::{GarbageMarker, MarkOutcome, MarkReport};
pub use sweeper::{GarbageSweeper, SweepReport};

use serde::Serialize;
use std::path::PathBuf;

/// One item a best-effort pass could not process
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub path: PathBuf,
    pub message: String,
}
