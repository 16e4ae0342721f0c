//! Tracking file storage
//!
//! Reads and writes individual tracking files under the mapping root. Writes go through a
//! temp file in the target directory followed by a rename, so a crash leaves either the old
//! or the new content on disk.

use crate::config::WorkspaceLayout;
use crate::context::ExecutionContext;
use crate::error::{ApiError, StorageError};
use crate::tracking::codec::ConfigCodec;
use crate::tracking::identity::{DefinitionIdentity, RepositoryHints};
use crate::tracking::record::{TrackingRecord, TrackingRecordBase};
use crate::types::{
    DirectoryNumber, CORRUPTED_SUFFIX, TOP_LEVEL_TRACKING_FILE_NAME, TRACKING_FILE_NAME,
};
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TrackingStore {
    layout: WorkspaceLayout,
}

impl TrackingStore {
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    /// Tracking file for a hash key: `<mapping root>/<hash key path>/trackingfile.json`.
    ///
    /// `/` inside the key nests directories. Components that would escape the mapping
    /// root or land in the garbage directory are rejected.
    pub fn tracking_file_path(&self, hash_key: &str) -> Result<PathBuf, ApiError> {
        let components = hash_key_components(hash_key, self.layout.garbage_directory_name())?;
        let mut path = self.layout.mapping_root();
        for component in components {
            path.push(component);
        }
        path.push(TRACKING_FILE_NAME);
        Ok(path)
    }

    /// Build a new record for an allocated directory number and persist it.
    pub fn create(
        &self,
        identity: &DefinitionIdentity,
        hash_key: &str,
        number: DirectoryNumber,
        hints: &RepositoryHints,
    ) -> Result<TrackingRecord, ApiError> {
        let path = self.tracking_file_path(hash_key)?;
        let record = TrackingRecord::new(identity, hash_key, number, hints, Utc::now());
        self.write(&path, &record)?;
        tracing::debug!(
            "Created tracking file {} for build directory {}",
            path.display(),
            number
        );
        Ok(record)
    }

    /// Load a tracking file, `None` if it does not exist.
    ///
    /// Content that is neither format is reported as a warning and also yields `None`.
    pub fn load_if_exists(
        &self,
        ctx: &dyn ExecutionContext,
        path: &Path,
    ) -> Result<Option<TrackingRecordBase>, ApiError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(path, e).into()),
        };
        let decoded = ConfigCodec::decode(&bytes)?;
        if decoded.is_none() {
            ctx.warning(&format!(
                "Unable to parse build tracking file {}: {}",
                path.display(),
                String::from_utf8_lossy(&bytes)
            ));
        }
        Ok(decoded)
    }

    /// Overwrite a tracking file atomically.
    pub fn write(&self, path: &Path, record: &TrackingRecord) -> Result<(), StorageError> {
        tracing::trace!("Writing tracking file {}", path.display());
        let bytes = ConfigCodec::encode(record)?;
        write_atomic(path, &bytes)
    }

    /// Write a tracking file that must not exist yet.
    pub fn write_new(&self, path: &Path, record: &TrackingRecord) -> Result<(), StorageError> {
        tracing::trace!("Writing new tracking file {}", path.display());
        let bytes = ConfigCodec::encode(record)?;
        write_atomic_new(path, &bytes)
    }

    /// Move an unreadable tracking file aside to its `.corrupted` sidecar, replacing any
    /// older sidecar. Returns the sidecar path.
    pub fn quarantine(&self, path: &Path) -> Result<PathBuf, StorageError> {
        let sidecar = corrupted_sidecar(path);
        std::fs::rename(path, &sidecar).map_err(|e| StorageError::io(path, e))?;
        Ok(sidecar)
    }

    /// Remove a tracking file. Already gone is fine.
    pub fn delete(&self, path: &Path) -> Result<(), StorageError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }
}

fn hash_key_components<'a>(
    hash_key: &'a str,
    garbage_directory: &str,
) -> Result<Vec<&'a str>, ApiError> {
    if hash_key.is_empty() {
        return Err(ApiError::InvalidHashKey("hash key is empty".to_string()));
    }
    if hash_key.contains('\\') || hash_key.contains(':') {
        return Err(ApiError::InvalidHashKey(format!(
            "hash key contains a path prefix or backslash: {}",
            hash_key
        )));
    }
    let components: Vec<&str> = hash_key.split('/').collect();
    for component in &components {
        if component.is_empty() || *component == "." || *component == ".." {
            return Err(ApiError::InvalidHashKey(format!(
                "hash key has an empty or relative component: {}",
                hash_key
            )));
        }
    }
    // Case-insensitive filesystems would resolve `gc/x` into the garbage directory.
    if components[0].eq_ignore_ascii_case(garbage_directory) {
        return Err(ApiError::InvalidHashKey(format!(
            "hash key collides with the garbage directory: {}",
            hash_key
        )));
    }
    if components.len() == 1 && components[0] == TOP_LEVEL_TRACKING_FILE_NAME {
        return Err(ApiError::InvalidHashKey(format!(
            "hash key collides with the top-level tracking file: {}",
            hash_key
        )));
    }
    Ok(components)
}

/// `<file>.corrupted`, where unreadable state files are kept for inspection.
pub(crate) fn corrupted_sidecar(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(".");
    name.push(CORRUPTED_SUFFIX);
    PathBuf::from(name)
}

fn ensure_parent_dir(path: &Path) -> Result<&Path, StorageError> {
    let parent = path.parent().ok_or_else(|| {
        StorageError::InvalidPath(format!("no parent directory: {}", path.display()))
    })?;
    std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    Ok(parent)
}

fn write_temp(
    parent: &Path,
    target: &Path,
    data: &[u8],
) -> Result<tempfile::NamedTempFile, StorageError> {
    let mut temp =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| StorageError::io(parent, e))?;
    temp.write_all(data).map_err(|e| StorageError::io(target, e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io(target, e))?;
    Ok(temp)
}

/// Write via temp file and rename, replacing any existing file.
pub(crate) fn write_atomic(target: &Path, data: &[u8]) -> Result<(), StorageError> {
    let parent = ensure_parent_dir(target)?;
    let temp = write_temp(parent, target, data)?;
    temp.persist(target)
        .map_err(|e| StorageError::io(target, e.error))?;
    Ok(())
}

/// Write via temp file and rename, failing if the target already exists.
pub(crate) fn write_atomic_new(target: &Path, data: &[u8]) -> Result<(), StorageError> {
    let parent = ensure_parent_dir(target)?;
    let temp = write_temp(parent, target, data)?;
    temp.persist_noclobber(target)
        .map_err(|e| StorageError::io(target, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{MessageLevel, RecordingContext};
    use proptest::prelude::*;

    fn store(root: &Path) -> TrackingStore {
        TrackingStore::new(WorkspaceLayout::new(root))
    }

    #[test]
    fn test_tracking_file_path_nests_key_segments() {
        let store = store(Path::new("/w"));
        assert_eq!(
            store.tracking_file_path("abc").unwrap(),
            PathBuf::from("/w/SourceRootMapping/abc/trackingfile.json")
        );
        assert_eq!(
            store.tracking_file_path("c1/42").unwrap(),
            PathBuf::from("/w/SourceRootMapping/c1/42/trackingfile.json")
        );
    }

    #[test]
    fn test_tracking_file_path_rejects_unsafe_keys() {
        let store = store(Path::new("/w"));
        for key in [
            "",
            "a//b",
            "../x",
            "a/./b",
            "GC",
            "GC/x",
            "gc/x",
            "Gc",
            "c:\\x",
            "/abs",
            "TopLevelTracking.json",
        ] {
            assert!(
                matches!(store.tracking_file_path(key), Err(ApiError::InvalidHashKey(_))),
                "key {:?} should be rejected",
                key
            );
        }
    }

    #[test]
    fn test_create_then_load_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let store = store(temp.path());
        let ctx = RecordingContext::new();
        let identity = DefinitionIdentity::new("c", "7");

        let record = store
            .create(&identity, "abc", 4, &RepositoryHints::default())
            .unwrap();
        let path = store.tracking_file_path("abc").unwrap();
        let loaded = store.load_if_exists(&ctx, &path).unwrap().unwrap();
        assert_eq!(loaded, TrackingRecordBase::Current(record));
    }

    #[test]
    fn test_load_missing_and_unparseable() {
        let temp = tempfile::tempdir().unwrap();
        let store = store(temp.path());
        let ctx = RecordingContext::new();

        let path = store.tracking_file_path("missing").unwrap();
        assert_eq!(store.load_if_exists(&ctx, &path).unwrap(), None);
        assert!(ctx.messages().is_empty());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        assert_eq!(store.load_if_exists(&ctx, &path).unwrap(), None);
        assert_eq!(ctx.messages_at(MessageLevel::Warning).len(), 1);
    }

    #[test]
    fn test_write_new_refuses_to_overwrite() {
        let temp = tempfile::tempdir().unwrap();
        let store = store(temp.path());
        let identity = DefinitionIdentity::new("c", "7");
        let record = TrackingRecord::new(&identity, "k", 1, &RepositoryHints::default(), Utc::now());
        let path = temp.path().join("GC").join("one.json");

        store.write_new(&path, &record).unwrap();
        assert!(store.write_new(&path, &record).is_err());
        store.write(&path, &record).unwrap();
    }

    #[test]
    fn test_quarantine_moves_file_to_sidecar() {
        let temp = tempfile::tempdir().unwrap();
        let store = store(temp.path());
        let path = temp.path().join("trackingfile.json");
        std::fs::write(&path, "{ broken").unwrap();

        let sidecar = store.quarantine(&path).unwrap();
        assert_eq!(sidecar, temp.path().join("trackingfile.json.corrupted"));
        assert!(!path.exists());
        assert_eq!(std::fs::read_to_string(sidecar).unwrap(), "{ broken");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let store = store(temp.path());
        let path = temp.path().join("gone.json");
        store.delete(&path).unwrap();
        std::fs::write(&path, "{}").unwrap();
        store.delete(&path).unwrap();
        assert!(!path.exists());
    }

    proptest! {
        #[test]
        fn prop_accepted_keys_stay_under_mapping_root(key in "[a-zA-Z0-9._/-]{1,40}") {
            let store = store(Path::new("/w"));
            if let Ok(path) = store.tracking_file_path(&key) {
                prop_assert!(path.starts_with("/w/SourceRootMapping"));
                prop_assert!(!path.starts_with("/w/SourceRootMapping/GC/"));
                prop_assert!(!key.split('/').next().unwrap_or("").eq_ignore_ascii_case("gc"));
                prop_assert!(path
                    .components()
                    .all(|c| !matches!(c, std::path::Component::ParentDir | std::path::Component::CurDir)));
                prop_assert!(path.ends_with(TRACKING_FILE_NAME));
            }
        }
    }
}
