//! Core types for build directory tracking.

/// Ordinal of a build directory under the workspace root (`<root>/<number>`).
pub type DirectoryNumber = u32;

/// Name of the per-definition tracking file.
pub const TRACKING_FILE_NAME: &str = "trackingfile.json";

/// Name of the singleton counter file under the mapping root.
pub const TOP_LEVEL_TRACKING_FILE_NAME: &str = "TopLevelTracking.json";

/// Suffix of the sidecar a corrupt counter file is copied to.
pub const CORRUPTED_SUFFIX: &str = "corrupted";
