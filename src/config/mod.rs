//! Configuration
//!
//! Layered configuration for the tracking subsystem: built-in defaults, the global file,
//! the workspace file and `BUILDTRACK__*` environment overrides.

mod facade;
pub mod merge;
pub mod paths;
pub mod sources;
pub mod workspace;

pub use facade::ConfigLoader;
pub use workspace::layout::WorkspaceLayout;

use crate::logging::LoggingConfig;
use crate::types::DirectoryNumber;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAPPING_DIRECTORY: &str = "SourceRootMapping";
pub const DEFAULT_GARBAGE_DIRECTORY: &str = "GC";
pub const DEFAULT_EXPIRATION_DAYS: u64 = 30;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildTrackConfig {
    #[serde(default)]
    pub layout: LayoutConfig,

    #[serde(default)]
    pub gc: GcConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Well-known directory names under the work root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Directory holding tracking files, relative to the work root
    #[serde(default = "default_mapping_directory")]
    pub mapping_directory: String,

    /// Directory holding pending-deletion records, relative to the mapping directory
    #[serde(default = "default_garbage_directory")]
    pub garbage_directory: String,
}

fn default_mapping_directory() -> String {
    DEFAULT_MAPPING_DIRECTORY.to_string()
}

fn default_garbage_directory() -> String {
    DEFAULT_GARBAGE_DIRECTORY.to_string()
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            mapping_directory: default_mapping_directory(),
            garbage_directory: default_garbage_directory(),
        }
    }
}

/// Garbage collection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcConfig {
    /// Build directories unused for longer than this many days are collected
    #[serde(default = "default_expiration_days")]
    pub expiration_days: u64,
}

fn default_expiration_days() -> u64 {
    DEFAULT_EXPIRATION_DAYS
}

impl GcConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_days.saturating_mul(SECONDS_PER_DAY))
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            expiration_days: default_expiration_days(),
        }
    }
}

/// Agent settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent id, used as the forced build directory number on hosted pools
    #[serde(default)]
    pub agent_id: Option<DirectoryNumber>,
}

impl BuildTrackConfig {
    /// Check values the type system cannot.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("layout.mapping_directory", &self.layout.mapping_directory),
            ("layout.garbage_directory", &self.layout.garbage_directory),
        ] {
            if value.is_empty() {
                return Err(format!("{} must not be empty", name));
            }
            if value.contains(['/', '\\']) || value == "." || value == ".." {
                return Err(format!("{} must be a single directory name: {}", name, value));
            }
        }
        if value_is_numeric(&self.layout.mapping_directory) {
            return Err(format!(
                "layout.mapping_directory must not be numeric: {}",
                self.layout.mapping_directory
            ));
        }
        if self.agent.agent_id == Some(0) {
            return Err("agent.agent_id must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Numeric names under the work root are build directories.
fn value_is_numeric(name: &str) -> bool {
    name.parse::<DirectoryNumber>().is_ok()
}
