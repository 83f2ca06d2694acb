//! Utility modules for the cache mirror.

pub mod errors;
pub mod logger;

pub use errors::{Result, SyncError};
