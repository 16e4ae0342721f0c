//! Build directory tracking
//!
//! Maps build definitions to numbered build directories under a workspace root and keeps
//! one tracking file per definition describing the directory it owns.

pub mod allocator;
pub mod codec;
pub mod identity;
pub mod manager;
pub mod record;
pub mod store;

pub use allocator::{TopLevelAllocator, TopLevelConfig};
pub use codec::ConfigCodec;
pub use identity::{DefinitionIdentity, RepositoryHints};
pub use manager::{ListedRecord, MaintenanceReport, PreparedDirectory, TrackingManager};
pub use record::{LegacyTrackingRecord, TrackingRecord, TrackingRecordBase};
pub use store::TrackingStore;
