//! Cache Mirror Library
//!
//! Keeps a derived view of a mirrored game cache in sync with upstream by
//! diffing per-file checksum manifests and re-extracting only what changed.

pub mod checksum;
pub mod config;
pub mod extract;
pub mod fs;
pub mod game;
pub mod manifest;
pub mod progress;
pub mod store;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use sync::{PassOutcome, PassReport, Synchronizer};
pub use utils::errors::{Result, SyncError};
