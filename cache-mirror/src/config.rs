//! Configuration management for the cache mirror.
//!
//! Loads configuration from a TOML file. Every section has working defaults so
//! a partial file is enough.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::game::{Environment, GameType};
use crate::manifest::store::ManifestScope;
use crate::utils::{Result, SyncError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub scope: ScopeConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the mirrored caches (`{root}/{game}/{environment}/{revision}`)
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the cache archive
    #[serde(default = "default_upstream_url")]
    pub url: String,

    #[serde(default = "default_game")]
    pub game: GameType,

    #[serde(default = "default_environment")]
    pub environment: Environment,

    /// Language code used to pick between otherwise identical caches
    #[serde(default = "default_language")]
    pub language: String,

    /// Request timeout in seconds (applies to metadata requests only)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Overrides for the game's default manifest scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Indices to checksum (defaults to the game's list)
    #[serde(default)]
    pub indices: Option<Vec<u32>>,

    /// Indices never checksummed
    #[serde(default)]
    pub excluded_indices: Option<Vec<u32>>,

    /// Archive allow-lists keyed by index id
    #[serde(default)]
    pub archive_filters: Option<BTreeMap<String, Vec<u32>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Skip dispatching the indices in `skip_indices`
    #[serde(default)]
    pub test_mode: bool,

    /// Indices known to be good, ignored when `test_mode` is set
    #[serde(default)]
    pub skip_indices: Vec<u32>,

    /// Number of derived files written concurrently per batch
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Number of runtime worker threads (also caps the blocking pool)
    #[serde(default = "default_io_threads")]
    pub io_threads: usize,
}

// Default values
fn default_root() -> PathBuf {
    PathBuf::from("cache")
}

fn default_upstream_url() -> String {
    "https://archive.openrs2.org".to_string()
}

fn default_game() -> GameType {
    GameType::OldSchool
}

fn default_environment() -> Environment {
    Environment::Live
}

fn default_language() -> String {
    "en".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_write_batch_size() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_io_threads() -> usize {
    4
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self { root: default_root() }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            game: default_game(),
            environment: default_environment(),
            language: default_language(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            test_mode: false,
            skip_indices: Vec::new(),
            write_batch_size: default_write_batch_size(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            io_threads: default_io_threads(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            paths: PathsConfig::default(),
            upstream: UpstreamConfig::default(),
            scope: ScopeConfig::default(),
            sync: SyncConfig::default(),
            log: LogConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.write_batch_size == 0 {
            return Err(SyncError::Config("sync.write_batch_size must be at least 1".into()));
        }
        if self.performance.io_threads == 0 {
            return Err(SyncError::Config("performance.io_threads must be at least 1".into()));
        }
        self.manifest_scope().map(|_| ())
    }

    /// Resolve the manifest scope, falling back to the game's defaults.
    pub fn manifest_scope(&self) -> Result<ManifestScope> {
        let game = self.upstream.game;
        let indices = self
            .scope
            .indices
            .clone()
            .unwrap_or_else(|| game.default_indices());
        let excluded = self
            .scope
            .excluded_indices
            .clone()
            .unwrap_or_else(|| game.default_excluded_indices());
        let archive_filters = match &self.scope.archive_filters {
            Some(filters) => {
                let mut parsed = BTreeMap::new();
                for (key, archives) in filters {
                    let index = key.parse::<u32>().map_err(|_| {
                        SyncError::Config(format!("Invalid index id in scope.archive_filters: {}", key))
                    })?;
                    parsed.insert(index, archives.clone());
                }
                parsed
            }
            None => game.default_archive_filters(),
        };

        Ok(ManifestScope::new(indices, excluded, archive_filters))
    }

    /// Indices excluded from dispatch (empty unless test mode is on)
    pub fn dispatch_skip_list(&self) -> Vec<u32> {
        if self.sync.test_mode {
            self.sync.skip_indices.clone()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::index;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [upstream]
            environment = "beta"

            [sync]
            test_mode = true
            skip_indices = [8]
            "#,
        )
        .unwrap();

        assert_eq!(config.upstream.environment, Environment::Beta);
        assert_eq!(config.upstream.game, GameType::OldSchool);
        assert_eq!(config.sync.write_batch_size, 64);
        assert_eq!(config.dispatch_skip_list(), vec![8]);
        assert_eq!(config.paths.root, PathBuf::from("cache"));
    }

    #[test]
    fn test_skip_list_ignored_outside_test_mode() {
        let mut config = Config::default();
        config.sync.skip_indices = vec![index::SPRITES];
        assert!(config.dispatch_skip_list().is_empty());
    }

    #[test]
    fn test_scope_overrides() {
        let config: Config = toml::from_str(
            r#"
            [scope]
            indices = [2, 8]
            excluded_indices = []

            [scope.archive_filters]
            "2" = [10]
            "#,
        )
        .unwrap();

        let scope = config.manifest_scope().unwrap();
        assert!(scope.includes_index(index::CONFIGS));
        assert!(!scope.includes_index(index::TEXTURES));
        assert!(scope.includes_archive(index::CONFIGS, 10));
        assert!(!scope.includes_archive(index::CONFIGS, 6));
        assert!(scope.includes_archive(index::SPRITES, 1234));
    }

    #[test]
    fn test_invalid_archive_filter_key() {
        let mut config = Config::default();
        let mut filters = BTreeMap::new();
        filters.insert("configs".to_string(), vec![1]);
        config.scope.archive_filters = Some(filters);
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_default_scope_excludes_maps() {
        let scope = Config::default().manifest_scope().unwrap();
        assert!(!scope.includes_index(index::MAPS));
        assert!(scope.includes_index(index::GAMEVALS));
    }
}
