//! buildtrack: build directory tracking and garbage collection
//!
//! Allocates numbered build directories under a workspace root, records which build
//! definition owns each one, and reclaims directories whose definitions stopped running.

pub mod config;
pub mod context;
pub mod error;
pub mod gc;
pub mod logging;
pub mod tooling;
pub mod tracking;
pub mod types;

pub use context::{ExecutionContext, TracingContext};
pub use error::{ApiError, StorageError};
pub use tracking::TrackingManager;
