//! WorkspaceLayout: resolved on-disk locations under a work root.

use crate::config::LayoutConfig;
use crate::error::ApiError;
use crate::types::{DirectoryNumber, TOP_LEVEL_TRACKING_FILE_NAME};
use std::path::{Path, PathBuf};

/// Resolved directory layout of one workspace root
///
/// ```text
/// <root>/<mapping>/<hash key path>/trackingfile.json
/// <root>/<mapping>/TopLevelTracking.json
/// <root>/<mapping>/<garbage>/<uuid>.json
/// <root>/<number>/...
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: PathBuf,
    mapping_directory: String,
    garbage_directory: String,
}

impl WorkspaceLayout {
    /// Layout with the default directory names.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, &LayoutConfig::default())
    }

    pub fn with_config(root: impl Into<PathBuf>, config: &LayoutConfig) -> Self {
        Self {
            root: root.into(),
            mapping_directory: config.mapping_directory.clone(),
            garbage_directory: config.garbage_directory.clone(),
        }
    }

    /// Resolve a user-supplied work root to an absolute path, creating it if needed.
    pub fn resolve(root: &Path, config: &LayoutConfig) -> Result<Self, ApiError> {
        std::fs::create_dir_all(root).map_err(|e| {
            ApiError::ConfigError(format!(
                "Failed to create work directory {}: {}",
                root.display(),
                e
            ))
        })?;
        let canonical = dunce::canonicalize(root).map_err(|e| {
            ApiError::ConfigError(format!("Failed to canonicalize work directory: {}", e))
        })?;
        Ok(Self::with_config(canonical, config))
    }

    /// Workspace root; build directories live directly beneath it.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn garbage_directory_name(&self) -> &str {
        &self.garbage_directory
    }

    pub fn mapping_root(&self) -> PathBuf {
        self.root.join(&self.mapping_directory)
    }

    pub fn garbage_root(&self) -> PathBuf {
        self.mapping_root().join(&self.garbage_directory)
    }

    pub fn top_level_file(&self) -> PathBuf {
        self.mapping_root().join(TOP_LEVEL_TRACKING_FILE_NAME)
    }

    pub fn build_directory(&self, number: DirectoryNumber) -> PathBuf {
        self.root.join(number.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_paths() {
        let layout = WorkspaceLayout::new("/agent/_work");
        assert_eq!(
            layout.mapping_root(),
            PathBuf::from("/agent/_work/SourceRootMapping")
        );
        assert_eq!(
            layout.garbage_root(),
            PathBuf::from("/agent/_work/SourceRootMapping/GC")
        );
        assert_eq!(
            layout.top_level_file(),
            PathBuf::from("/agent/_work/SourceRootMapping/TopLevelTracking.json")
        );
        assert_eq!(layout.build_directory(12), PathBuf::from("/agent/_work/12"));
    }

    #[test]
    fn test_resolve_creates_missing_root() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("nested").join("_work");
        let layout = WorkspaceLayout::resolve(&root, &LayoutConfig::default()).unwrap();
        assert!(root.is_dir());
        assert!(layout.root().is_absolute());
    }
}
