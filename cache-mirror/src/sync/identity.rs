//! Upstream cache identity and local freshness checks.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use super::paths::CachePaths;
use crate::checksum::verify_integrity;
use crate::game::{Environment, GameType};
use crate::utils::{Result, SyncError};

/// Identity of one upstream cache build, persisted as `cache-info.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheIdentity {
    /// Upstream cache id
    pub id: u64,
    pub scope: String,
    pub game: GameType,
    pub environment: Environment,
    pub revision: u32,
    /// When upstream first saw this build, if known
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl std::fmt::Display for CacheIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} revision {} (cache {} in {})",
            self.game, self.environment, self.revision, self.id, self.scope
        )
    }
}

/// Why a local copy has to be fetched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// No saved identity, or upstream moved on
    NewIdentity,
    MissingData,
    IntegrityMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale(StaleReason),
}

impl Freshness {
    pub fn is_stale(&self) -> bool {
        matches!(self, Freshness::Stale(_))
    }
}

pub fn load_cache_info(path: &Path) -> Option<CacheIdentity> {
    let content = std::fs::read(path).ok()?;
    match serde_json::from_slice(&content) {
        Ok(identity) => Some(identity),
        Err(e) => {
            warn!("Ignoring unreadable {}: {}", path.display(), e);
            None
        }
    }
}

pub fn save_cache_info(identity: &CacheIdentity, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(identity)?;
    std::fs::write(path, json).map_err(SyncError::Io)
}

/// Compare the upstream identity against what is on disk.
///
/// Checksums the whole data directory; call from a blocking context.
pub fn check_freshness(latest: &CacheIdentity, paths: &CachePaths) -> Freshness {
    match load_cache_info(&paths.cache_info()) {
        Some(saved) if saved == *latest => {}
        Some(saved) => {
            info!("Upstream moved from {} to {}", saved, latest);
            return Freshness::Stale(StaleReason::NewIdentity);
        }
        None => {
            info!("No local copy of {}", latest);
            return Freshness::Stale(StaleReason::NewIdentity);
        }
    }

    let data_dir = paths.data_dir();
    if !data_dir.is_dir() {
        warn!("Data directory {} is missing", data_dir.display());
        return Freshness::Stale(StaleReason::MissingData);
    }

    if !verify_integrity(&data_dir, &paths.data_checksum()) {
        warn!("Data directory {} failed its integrity check", data_dir.display());
        return Freshness::Stale(StaleReason::IntegrityMismatch);
    }

    debug!("Local copy of {} is fresh", latest);
    Freshness::Fresh
}
