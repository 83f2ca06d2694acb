//! Custom error types for the cache mirror.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any upstream failure (identity lookup, download, unzip). Sub-causes are
    /// folded into the message.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Failed to open store at {path}: {message}")]
    StoreOpen { path: PathBuf, message: String },

    #[error("Failed to persist manifest to {path}: {source}")]
    ManifestPersist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction failed for {index}/{archive}/{file}: {message}")]
    Extraction {
        index: u32,
        archive: u32,
        file: u32,
        message: String,
    },

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SyncError {
    pub fn fetch(message: impl std::fmt::Display) -> Self {
        SyncError::Fetch(message.to_string())
    }

    pub fn extraction(index: u32, archive: u32, file: u32, message: impl std::fmt::Display) -> Self {
        SyncError::Extraction {
            index,
            archive,
            file,
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Fetch(e.to_string())
    }
}

impl From<zip::result::ZipError> for SyncError {
    fn from(e: zip::result::ZipError) -> Self {
        SyncError::Fetch(format!("archive extraction: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
