//! Top-level directory number allocator
//!
//! The only producer of build directory numbers. The counter lives in
//! `<mapping root>/TopLevelTracking.json` and is loaded and saved on every allocation.

use crate::config::WorkspaceLayout;
use crate::context::ExecutionContext;
use crate::error::{ApiError, StorageError};
use crate::tracking::codec::ConfigCodec;
use crate::tracking::store::{corrupted_sidecar, write_atomic};
use crate::types::DirectoryNumber;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Singleton counter state of a workspace root
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopLevelConfig {
    /// Required: a counter file without it is treated as corrupt and rebuilt from disk.
    pub last_directory_number: DirectoryNumber,

    #[serde(default)]
    pub last_directory_created_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TopLevelAllocator {
    layout: WorkspaceLayout,
}

impl TopLevelAllocator {
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self { layout }
    }

    /// Load the counter, rebuilding it when the file is missing or corrupt.
    ///
    /// A corrupt file is copied to a `.corrupted` sidecar first. A rebuilt counter starts
    /// at the highest numeric directory name under the workspace root.
    pub fn load(&self, ctx: &dyn ExecutionContext) -> Result<TopLevelConfig, ApiError> {
        let file = self.layout.top_level_file();
        tracing::debug!("Loading top-level tracking file if exists: {}", file.display());

        let bytes = match std::fs::read(&file) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return self.rebuild();
            }
            Err(e) => return Err(StorageError::io(&file, e).into()),
        };

        match ConfigCodec::decode_top_level(&bytes) {
            Ok(config) => Ok(config),
            Err(e) => {
                let sidecar = corrupted_sidecar(&file);
                ctx.warning(&format!(
                    "Rebuilding corrupt top-level tracking file {} ({}); original kept as {}",
                    file.display(),
                    e,
                    sidecar.display()
                ));
                std::fs::copy(&file, &sidecar).map_err(|e| StorageError::io(&sidecar, e))?;
                self.rebuild()
            }
        }
    }

    fn rebuild(&self) -> Result<TopLevelConfig, ApiError> {
        let highest = highest_numbered_directory(self.layout.root())?;
        if highest > 0 {
            tracing::info!(
                "Top-level counter rebuilt from build directories on disk: {}",
                highest
            );
        }
        Ok(TopLevelConfig {
            last_directory_number: highest,
            last_directory_created_on: None,
        })
    }

    pub fn save(&self, config: &TopLevelConfig) -> Result<(), StorageError> {
        let bytes = ConfigCodec::encode_top_level(config)?;
        write_atomic(&self.layout.top_level_file(), &bytes)
    }

    /// Produce the next build directory number and persist the counter.
    ///
    /// `force_value` pins the number, which is only valid while the counter has never
    /// advanced; forcing afterwards would hand out a number that may already be in use and
    /// fails with `ApiError::InvariantViolation`.
    pub fn allocate_next(
        &self,
        ctx: &dyn ExecutionContext,
        force_value: Option<DirectoryNumber>,
    ) -> Result<DirectoryNumber, ApiError> {
        let mut config = self.load(ctx)?;

        let number = match force_value {
            Some(0) => {
                return Err(ApiError::InvariantViolation(
                    "cannot force build directory 0, numbering starts at 1".to_string(),
                ));
            }
            Some(forced) => {
                if config.last_directory_number != 0 {
                    return Err(ApiError::InvariantViolation(format!(
                        "cannot force build directory {} after the counter reached {}",
                        forced, config.last_directory_number
                    )));
                }
                forced
            }
            None => config.last_directory_number.checked_add(1).ok_or_else(|| {
                ApiError::InvariantViolation("build directory counter exhausted".to_string())
            })?,
        };

        config.last_directory_number = number;
        config.last_directory_created_on = Some(Utc::now());
        self.save(&config)?;
        tracing::debug!("Allocated build directory number {}", number);
        Ok(number)
    }
}

/// Highest directory under `root` whose name is a canonical directory number.
///
/// Names such as `web`, `01` or `+3` are not build directories and are ignored.
pub fn highest_numbered_directory(root: &Path) -> Result<DirectoryNumber, StorageError> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StorageError::io(root, e)),
    };

    let mut highest = 0;
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io(root, e))?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Ok(number) = name.parse::<DirectoryNumber>() {
            if number.to_string() == name && number > highest {
                highest = number;
            }
        }
    }
    Ok(highest)
}
