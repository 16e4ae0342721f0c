//! Tracking records
//!
//! A tracking record ties a build definition to a numbered build directory. Two on-disk
//! shapes exist: the current one, which carries a `fileFormatVersion` marker, and the
//! legacy one written by old agents, which only knows the build directory path.

use crate::error::ApiError;
use crate::tracking::identity::{DefinitionIdentity, RepositoryHints, DEFAULT_SOURCES_DIRECTORY};
use crate::types::DirectoryNumber;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Version written into every current-format record.
pub const FILE_FORMAT_VERSION: u32 = 3;

/// JSON property whose presence distinguishes current records from legacy ones.
pub const FILE_FORMAT_VERSION_PROPERTY: &str = "fileFormatVersion";

pub const ARTIFACTS_DIRECTORY: &str = "a";
pub const BINARIES_DIRECTORY: &str = "b";
pub const TEST_RESULTS_DIRECTORY: &str = "TestResults";

fn default_format_version() -> u32 {
    FILE_FORMAT_VERSION
}

fn default_sources_directory() -> String {
    DEFAULT_SOURCES_DIRECTORY.to_string()
}

/// Current-format tracking record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRecord {
    #[serde(default = "default_format_version")]
    pub file_format_version: u32,

    #[serde(default)]
    pub hash_key: String,

    #[serde(default)]
    pub system: String,

    #[serde(default)]
    pub collection_id: String,

    #[serde(default)]
    pub collection_url: String,

    #[serde(default)]
    pub definition_id: String,

    #[serde(default)]
    pub definition_name: String,

    #[serde(default)]
    pub repository_url: String,

    pub build_directory_number: DirectoryNumber,

    #[serde(default)]
    pub repository_type: String,

    #[serde(default = "default_sources_directory")]
    pub sources_directory: String,

    #[serde(default)]
    pub last_run_on: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_maintenance_attempted_on: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_maintenance_completed_on: Option<DateTime<Utc>>,
}

impl TrackingRecord {
    /// New record for a freshly allocated build directory, stamped as run at `now`.
    pub fn new(
        identity: &DefinitionIdentity,
        hash_key: &str,
        build_directory_number: DirectoryNumber,
        hints: &RepositoryHints,
        now: DateTime<Utc>,
    ) -> Self {
        let mut record = Self {
            file_format_version: FILE_FORMAT_VERSION,
            hash_key: hash_key.to_string(),
            system: String::new(),
            collection_id: identity.collection_id.clone(),
            collection_url: String::new(),
            definition_id: identity.definition_id.clone(),
            definition_name: String::new(),
            repository_url: String::new(),
            build_directory_number,
            repository_type: hints.repository_type.clone(),
            sources_directory: if hints.sources_directory.is_empty() {
                default_sources_directory()
            } else {
                hints.sources_directory.clone()
            },
            last_run_on: None,
            last_maintenance_attempted_on: None,
            last_maintenance_completed_on: None,
        };
        record.update_run_metadata(identity, now);
        record
    }

    /// Refresh descriptive identity metadata and stamp the run time.
    pub fn update_run_metadata(&mut self, identity: &DefinitionIdentity, now: DateTime<Utc>) {
        self.system = identity.system.clone();
        self.collection_url = identity.collection_url.clone();
        self.definition_name = identity.definition_name.clone();
        self.repository_url = identity.repository_url.clone();
        self.last_run_on = Some(now);
    }

    /// Begin a maintenance attempt. Clears any earlier completion.
    pub fn maintenance_started(&mut self, now: DateTime<Utc>) {
        self.last_maintenance_attempted_on = Some(now);
        self.last_maintenance_completed_on = None;
    }

    pub fn maintenance_completed(&mut self, now: DateTime<Utc>) {
        self.last_maintenance_completed_on = Some(now);
    }

    /// Whether the record was last used before `cutoff`. Records never run are expired.
    ///
    /// `cutoff` of `None` means the expiration window reaches past the earliest
    /// representable time, so only never-run records expire.
    pub fn is_expired(&self, cutoff: Option<DateTime<Utc>>) -> bool {
        match (self.last_run_on, cutoff) {
            (None, _) => true,
            (Some(last_run_on), Some(cutoff)) => last_run_on < cutoff,
            (Some(_), None) => false,
        }
    }

    /// Build directory, relative to the workspace root.
    pub fn build_directory(&self) -> PathBuf {
        PathBuf::from(self.build_directory_number.to_string())
    }

    pub fn artifacts_directory(&self) -> PathBuf {
        self.build_directory().join(ARTIFACTS_DIRECTORY)
    }

    pub fn binaries_directory(&self) -> PathBuf {
        self.build_directory().join(BINARIES_DIRECTORY)
    }

    pub fn sources_directory_path(&self) -> PathBuf {
        self.build_directory().join(&self.sources_directory)
    }

    pub fn test_results_directory(&self) -> PathBuf {
        self.build_directory().join(TEST_RESULTS_DIRECTORY)
    }

    /// Every standard directory of the build directory, relative to the workspace root.
    pub fn standard_directories(&self) -> [PathBuf; 4] {
        [
            self.artifacts_directory(),
            self.binaries_directory(),
            self.sources_directory_path(),
            self.test_results_directory(),
        ]
    }
}

/// `now - expiration`, or `None` when that precedes the representable range.
pub fn expiration_cutoff(now: DateTime<Utc>, expiration: Duration) -> Option<DateTime<Utc>> {
    let window = chrono::Duration::from_std(expiration).ok()?;
    now.checked_sub_signed(window)
}

/// Raw legacy shape. Old agents wrote either the build directory or the sources folder.
#[derive(Debug, Deserialize)]
struct RawLegacyRecord {
    #[serde(rename = "build_dirctory", default)]
    build_directory: Option<String>,
    #[serde(rename = "sourceFolder", default)]
    source_folder: Option<String>,
    #[serde(rename = "hashKey", default)]
    hash_key: Option<String>,
    #[serde(rename = "collectionId", default)]
    collection_id: Option<String>,
    #[serde(rename = "definitionId", default)]
    definition_id: Option<String>,
    #[serde(rename = "repositoryUrl", default)]
    repository_url: Option<String>,
    #[serde(default)]
    system: Option<String>,
}

/// Legacy tracking record, read only
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegacyTrackingRecord {
    /// Build directory path as written by the old agent (relative or absolute).
    #[serde(rename = "build_dirctory")]
    pub build_directory: String,
    #[serde(rename = "hashKey")]
    pub hash_key: String,
    #[serde(rename = "collectionId")]
    pub collection_id: String,
    #[serde(rename = "definitionId")]
    pub definition_id: String,
    #[serde(rename = "repositoryUrl")]
    pub repository_url: String,
    pub system: String,
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Last path component, splitting on both separators since legacy files may come from
/// either platform.
fn last_component(path: &str) -> &str {
    let trimmed = path.trim_end_matches(is_separator);
    trimmed.rsplit(is_separator).next().unwrap_or(trimmed)
}

fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches(is_separator);
    let index = trimmed.rfind(is_separator)?;
    let parent = &trimmed[..index];
    (!parent.is_empty()).then_some(parent)
}

impl LegacyTrackingRecord {
    /// Parse legacy content. Returns `None` when the content is not a legacy record.
    pub fn try_parse(content: &str) -> Option<Self> {
        let raw: RawLegacyRecord = serde_json::from_str(content).ok()?;
        let build_directory = match (raw.build_directory, raw.source_folder) {
            (Some(dir), _) if !dir.trim().is_empty() => dir,
            (_, Some(source)) if !source.trim().is_empty() => parent_path(&source)?.to_string(),
            _ => return None,
        };
        Some(Self {
            build_directory,
            hash_key: raw.hash_key.unwrap_or_default(),
            collection_id: raw.collection_id.unwrap_or_default(),
            definition_id: raw.definition_id.unwrap_or_default(),
            repository_url: raw.repository_url.unwrap_or_default(),
            system: raw.system.unwrap_or_default(),
        })
    }

    /// Build directory number, taken from the final path component.
    pub fn build_directory_number(&self) -> Result<DirectoryNumber, ApiError> {
        let name = last_component(&self.build_directory);
        name.parse::<DirectoryNumber>().map_err(|_| {
            ApiError::LegacyUpgrade(format!(
                "build directory {} does not end in a directory number",
                self.build_directory
            ))
        })
    }

    /// Convert to the current format. The repository type and sources folder were never
    /// recorded, so they take empty and default values; the record has never run.
    pub fn upgrade(&self) -> Result<TrackingRecord, ApiError> {
        Ok(TrackingRecord {
            file_format_version: FILE_FORMAT_VERSION,
            hash_key: self.hash_key.clone(),
            system: self.system.clone(),
            collection_id: self.collection_id.clone(),
            collection_url: String::new(),
            definition_id: self.definition_id.clone(),
            definition_name: String::new(),
            repository_url: self.repository_url.clone(),
            build_directory_number: self.build_directory_number()?,
            repository_type: String::new(),
            sources_directory: default_sources_directory(),
            last_run_on: None,
            last_maintenance_attempted_on: None,
            last_maintenance_completed_on: None,
        })
    }
}

/// A decoded tracking file in either shape
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingRecordBase {
    Legacy(LegacyTrackingRecord),
    Current(TrackingRecord),
}

impl TrackingRecordBase {
    pub fn is_legacy(&self) -> bool {
        matches!(self, TrackingRecordBase::Legacy(_))
    }

    /// The record in current format, upgrading legacy records.
    pub fn into_current(self) -> Result<TrackingRecord, ApiError> {
        match self {
            TrackingRecordBase::Current(record) => Ok(record),
            TrackingRecordBase::Legacy(legacy) => legacy.upgrade(),
        }
    }

    /// Build directory number, if it can be determined.
    pub fn build_directory_number(&self) -> Result<DirectoryNumber, ApiError> {
        match self {
            TrackingRecordBase::Current(record) => Ok(record.build_directory_number),
            TrackingRecordBase::Legacy(legacy) => legacy.build_directory_number(),
        }
    }
}

impl From<TrackingRecord> for TrackingRecordBase {
    fn from(record: TrackingRecord) -> Self {
        TrackingRecordBase::Current(record)
    }
}

impl From<LegacyTrackingRecord> for TrackingRecordBase {
    fn from(record: LegacyTrackingRecord) -> Self {
        TrackingRecordBase::Legacy(record)
    }
}
