//! Build definition identity and repository layout hints.

use serde::{Deserialize, Serialize};

/// Default name of the sources directory inside a build directory.
pub const DEFAULT_SOURCES_DIRECTORY: &str = "s";

/// Identity of a recurring build definition
///
/// Everything except `collection_id` and `definition_id` is descriptive metadata that is
/// refreshed on every run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionIdentity {
    pub system: String,
    pub collection_id: String,
    pub collection_url: String,
    pub definition_id: String,
    pub definition_name: String,
    pub repository_url: String,
}

impl DefinitionIdentity {
    pub fn new(collection_id: impl Into<String>, definition_id: impl Into<String>) -> Self {
        Self {
            system: "build".to_string(),
            collection_id: collection_id.into(),
            definition_id: definition_id.into(),
            ..Self::default()
        }
    }

    pub fn with_definition_name(mut self, name: impl Into<String>) -> Self {
        self.definition_name = name.into();
        self
    }

    pub fn with_collection_url(mut self, url: impl Into<String>) -> Self {
        self.collection_url = url.into();
        self
    }

    pub fn with_repository_url(mut self, url: impl Into<String>) -> Self {
        self.repository_url = url.into();
        self
    }

    /// Stable hash key: blake3 over collection, definition and repository, hex encoded.
    ///
    /// Names and URLs of the collection and definition can be renamed without changing
    /// the key; a different repository gets a different key (and a different directory).
    pub fn hash_key(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.collection_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.definition_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.repository_url.as_bytes());
        hex::encode(hasher.finalize().as_bytes())
    }
}

/// Repository layout information recorded with a new build directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryHints {
    pub repository_type: String,
    pub sources_directory: String,
}

impl Default for RepositoryHints {
    fn default() -> Self {
        Self {
            repository_type: String::new(),
            sources_directory: DEFAULT_SOURCES_DIRECTORY.to_string(),
        }
    }
}
