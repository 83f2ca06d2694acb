//! Upstream cache source.
//!
//! [`HttpUpstream`] talks to an openrs2-style archive: `caches.json` lists
//! every known cache, `caches/{scope}/{id}/disk.zip` holds the raw store and
//! `caches/{scope}/{id}/keys.json` the map decryption keys. Every failure
//! surfaces as [`SyncError::Fetch`].

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::identity::CacheIdentity;
use crate::config::UpstreamConfig;
use crate::game::{Environment, GameType};
use crate::progress::format::format_bytes;
use crate::progress::stream::ProgressStream;
use crate::progress::ProgressBar;
use crate::utils::{Result, SyncError};

pub const ARCHIVE_FILE: &str = "disk.zip";

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Identity of the newest cache for `game` and `environment`.
    async fn latest(&self, game: GameType, environment: Environment) -> Result<CacheIdentity>;

    /// Fetch the raw store archive (and companion files) into `target_dir`.
    async fn download_raw_store(
        &self,
        identity: &CacheIdentity,
        target_dir: &Path,
        progress: Arc<ProgressBar>,
    ) -> Result<()>;

    /// Unpack the archive downloaded into `target_dir` into `data_dir`.
    async fn extract_raw_archive(
        &self,
        target_dir: &Path,
        data_dir: &Path,
        progress: Arc<ProgressBar>,
    ) -> Result<()>;
}

/// One entry of `caches.json`; unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
struct ArchivedCache {
    id: u64,
    scope: String,
    game: String,
    environment: String,
    language: String,
    #[serde(default)]
    builds: Vec<Build>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Build {
    major: u32,
}

impl ArchivedCache {
    fn revision(&self) -> Option<u32> {
        self.builds.iter().map(|build| build.major).max()
    }
}

/// Pick the newest cache matching game, environment and language.
fn select_latest(
    caches: Vec<ArchivedCache>,
    game: GameType,
    environment: Environment,
    language: &str,
) -> Option<CacheIdentity> {
    caches
        .into_iter()
        .filter(|cache| {
            cache.game == game.as_str()
                && cache.environment == environment.as_str()
                && cache.language == language
        })
        .filter_map(|cache| cache.revision().map(|revision| (revision, cache)))
        // Same build archived twice: the later capture wins
        .max_by(|(a_rev, a), (b_rev, b)| a_rev.cmp(b_rev).then_with(|| a.timestamp.cmp(&b.timestamp)))
        .map(|(revision, cache)| CacheIdentity {
            id: cache.id,
            scope: cache.scope,
            game,
            environment,
            revision,
            timestamp: cache.timestamp,
        })
}

/// Collapse any error into a fetch failure.
fn into_fetch(e: SyncError) -> SyncError {
    match e {
        SyncError::Fetch(_) => e,
        other => SyncError::fetch(other),
    }
}

pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    language: String,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("cache-mirror/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn cache_url(&self, identity: &CacheIdentity, file: &str) -> String {
        format!("{}/caches/{}/{}/{}", self.base_url, identity.scope, identity.id, file)
    }

    async fn get(&self, url: &str, timeout: Option<Duration>) -> Result<reqwest::Response> {
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SyncError::fetch(format!("HTTP {}: {}", response.status(), url)));
        }
        Ok(response)
    }

    /// Stream `url` to `dest` through a temporary file.
    async fn download_to(&self, url: &str, dest: &Path, progress: Arc<ProgressBar>) -> Result<u64> {
        let response = self.get(url, None).await?;
        if let Some(length) = response.content_length() {
            progress.set_total(length);
        }

        let mut stream = ProgressStream::new(Box::pin(response.bytes_stream()), Arc::clone(&progress));

        let tmp_path = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        drop(file);

        let written = stream.bytes_transferred();
        tokio::fs::rename(&tmp_path, dest).await?;
        Ok(written)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn latest(&self, game: GameType, environment: Environment) -> Result<CacheIdentity> {
        let url = format!("{}/caches.json", self.base_url);
        let response = self.get(&url, Some(self.timeout)).await?;
        let caches: Vec<ArchivedCache> = response.json().await?;
        debug!("Upstream lists {} caches", caches.len());

        select_latest(caches, game, environment, &self.language).ok_or_else(|| {
            SyncError::fetch(format!(
                "no {} {} cache for language {}",
                game, environment, self.language
            ))
        })
    }

    async fn download_raw_store(
        &self,
        identity: &CacheIdentity,
        target_dir: &Path,
        progress: Arc<ProgressBar>,
    ) -> Result<()> {
        let result = async {
            tokio::fs::create_dir_all(target_dir).await?;

            progress.set_message(ARCHIVE_FILE);
            let archive_path = target_dir.join(ARCHIVE_FILE);
            let size = self
                .download_to(&self.cache_url(identity, ARCHIVE_FILE), &archive_path, Arc::clone(&progress))
                .await?;
            info!("Downloaded {} ({})", ARCHIVE_FILE, format_bytes(size));

            progress.set_message("keys.json");
            let keys = self
                .get(&self.cache_url(identity, "keys.json"), Some(self.timeout))
                .await?
                .bytes()
                .await?;
            tokio::fs::write(target_dir.join("keys.json"), &keys).await?;
            Ok::<(), SyncError>(())
        }
        .await;

        result.map_err(into_fetch)
    }

    async fn extract_raw_archive(
        &self,
        target_dir: &Path,
        data_dir: &Path,
        progress: Arc<ProgressBar>,
    ) -> Result<()> {
        let archive_path = target_dir.join(ARCHIVE_FILE);
        let data_dir = data_dir.to_path_buf();

        let extracted = tokio::task::spawn_blocking(move || unzip(&archive_path, &data_dir, &progress))
            .await
            .map_err(SyncError::fetch)?
            .map_err(into_fetch)?;

        // The archive is only needed until its contents are on disk
        let _ = tokio::fs::remove_file(target_dir.join(ARCHIVE_FILE)).await;
        info!("Unpacked {} entries", extracted);
        Ok(())
    }
}

/// Unpack a zip archive into `data_dir`, replacing anything already there.
///
/// Entries escaping the destination are skipped.
pub fn unzip(archive_path: &Path, data_dir: &Path, progress: &ProgressBar) -> Result<usize> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;

    if data_dir.exists() {
        fs::remove_dir_all(data_dir)?;
    }
    fs::create_dir_all(data_dir)?;
    progress.set_total(archive.len() as u64);

    let mut extracted = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let entry_path: PathBuf = match entry.enclosed_name() {
            Some(p) => p.to_path_buf(),
            None => {
                debug!("Skipping unsafe archive entry {}", entry.name());
                progress.inc(1);
                continue;
            }
        };

        progress.set_message(entry_path.display().to_string());
        let output_path = data_dir.join(&entry_path);

        if entry.is_dir() {
            fs::create_dir_all(&output_path)?;
        } else {
            if let Some(parent) = output_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&output_path)?;
            std::io::copy(&mut entry, &mut outfile)?;
            extracted += 1;
        }
        progress.inc(1);
    }
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Progress;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn cache(id: u64, game: &str, environment: &str, language: &str, major: Option<u32>) -> ArchivedCache {
        ArchivedCache {
            id,
            scope: "runescape".to_string(),
            game: game.to_string(),
            environment: environment.to_string(),
            language: language.to_string(),
            builds: major.map(|major| Build { major }).into_iter().collect(),
            timestamp: Some(format!("2026-01-{:02}T00:00:00Z", id % 28 + 1)),
        }
    }

    #[test]
    fn test_select_latest_filters_and_maximizes() {
        let caches = vec![
            cache(1, "oldschool", "live", "en", Some(220)),
            cache(2, "oldschool", "live", "en", Some(221)),
            cache(3, "oldschool", "beta", "en", Some(230)),
            cache(4, "runescape", "live", "en", Some(940)),
            cache(5, "oldschool", "live", "en", None),
            cache(6, "oldschool", "live", "pt", Some(225)),
        ];

        let latest = select_latest(caches, GameType::OldSchool, Environment::Live, "en").unwrap();
        assert_eq!(latest.id, 2);
        assert_eq!(latest.revision, 221);
        assert_eq!(latest.scope, "runescape");
    }

    #[test]
    fn test_select_latest_prefers_later_capture() {
        let caches = vec![
            cache(7, "oldschool", "live", "en", Some(221)),
            cache(9, "oldschool", "live", "en", Some(221)),
        ];
        let latest = select_latest(caches, GameType::OldSchool, Environment::Live, "en").unwrap();
        assert_eq!(latest.id, 9);
    }

    #[test]
    fn test_select_latest_without_match() {
        let caches = vec![cache(1, "oldschool", "live", "en", Some(220))];
        assert!(select_latest(caches, GameType::OldSchool, Environment::Beta, "en").is_none());
    }

    #[test]
    fn test_caches_json_shape() {
        let json = r#"[{"id": 1812, "scope": "runescape", "game": "oldschool",
            "environment": "live", "language": "en",
            "builds": [{"major": 221, "minor": null}],
            "timestamp": "2026-10-01T11:00:00Z", "size": 123, "disk_store_valid": true}]"#;
        let caches: Vec<ArchivedCache> = serde_json::from_str(json).unwrap();
        let latest = select_latest(caches, GameType::OldSchool, Environment::Live, "en").unwrap();
        assert_eq!(latest.revision, 221);
        assert_eq!(latest.timestamp.as_deref(), Some("2026-10-01T11:00:00Z"));
    }

    #[tokio::test]
    async fn test_unzip_replaces_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join(ARCHIVE_FILE);
        {
            let mut writer = zip::ZipWriter::new(File::create(&archive_path).unwrap());
            let options = SimpleFileOptions::default();
            writer.start_file("cache/main_file_cache.dat2", options).unwrap();
            writer.write_all(b"raw").unwrap();
            writer.start_file("cache/main_file_cache.idx255", options).unwrap();
            writer.write_all(b"index").unwrap();
            writer.finish().unwrap();
        }

        let data_dir = temp_dir.path().join("data");
        fs::create_dir_all(&data_dir).unwrap();
        fs::write(data_dir.join("stale.dat"), b"old").unwrap();

        let progress = Progress::disabled();
        let bar = progress.bar("unzip", 0);
        let extracted = unzip(&archive_path, &data_dir, &bar).unwrap();

        assert_eq!(extracted, 2);
        assert_eq!(fs::read(data_dir.join("cache/main_file_cache.dat2")).unwrap(), b"raw");
        assert!(!data_dir.join("stale.dat").exists());
    }

    #[test]
    fn test_unzip_corrupt_archive_is_a_fetch_error() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join(ARCHIVE_FILE);
        fs::write(&archive_path, b"definitely not a zip").unwrap();

        let progress = Progress::disabled();
        let bar = progress.bar("unzip", 0);
        let result = unzip(&archive_path, &temp_dir.path().join("data"), &bar);
        assert!(matches!(result, Err(SyncError::Fetch(_))));
    }
}
