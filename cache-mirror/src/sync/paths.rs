//! On-disk layout of a mirrored cache revision.

use std::fs;
use std::path::{Path, PathBuf};

use crate::game::{Environment, GameType};

pub const CACHE_INFO_FILE: &str = "cache-info.json";
pub const DATA_CHECKSUM_FILE: &str = "data.checksum";
pub const MANIFEST_FILE: &str = "master-checksums.json";

/// Paths under `{root}/{game}/{environment}/{revision}/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    environment_dir: PathBuf,
    base: PathBuf,
    revision: u32,
}

impl CachePaths {
    pub fn new(root: &Path, game: GameType, environment: Environment, revision: u32) -> Self {
        let environment_dir = root.join(game.as_str()).join(environment.as_str());
        Self {
            base: environment_dir.join(revision.to_string()),
            environment_dir,
            revision,
        }
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Last known upstream identity
    pub fn cache_info(&self) -> PathBuf {
        self.base.join(CACHE_INFO_FILE)
    }

    /// CRC32 of the raw data directory, as decimal text
    pub fn data_checksum(&self) -> PathBuf {
        self.base.join(DATA_CHECKSUM_FILE)
    }

    pub fn manifest(&self) -> PathBuf {
        self.base.join(MANIFEST_FILE)
    }

    /// Raw store as extracted from the upstream archive
    pub fn data_dir(&self) -> PathBuf {
        self.base.join("data")
    }

    /// Downstream bundles built from extracted data; stale once content changes
    pub fn packaged_dir(&self) -> PathBuf {
        self.base.join("packaged")
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.base.join("extracted")
    }

    /// The newest earlier revision of the same game and environment that
    /// holds a manifest.
    pub fn previous_revision(&self) -> Option<CachePaths> {
        let entries = fs::read_dir(&self.environment_dir).ok()?;

        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter(|revision| *revision < self.revision)
            .map(|revision| CachePaths {
                environment_dir: self.environment_dir.clone(),
                base: self.environment_dir.join(revision.to_string()),
                revision,
            })
            .filter(|paths| paths.manifest().is_file())
            .max_by_key(|paths| paths.revision)
    }
}
