//! Synchronization passes.
//!
//! One pass keeps the local mirror of a game cache in step with upstream:
//!
//! 1. ask upstream for its newest cache and compare it with what is on disk,
//!    downloading and unpacking the raw store when the local copy is stale
//! 2. open the store and checksum every in-scope file into a manifest
//! 3. diff against the previous manifest; an unchanged cache only refreshes
//!    the manifest timestamp
//! 4. persist the new manifest and dispatch the changeset to the extractors
//!
//! The store is closed whenever it was opened, whatever the outcome.

pub mod dispatch;
pub mod guard;
pub mod identity;
pub mod paths;
pub mod upstream;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::checksum::save_checksum;
use crate::config::Config;
use crate::extract::ExtractorContext;
use crate::fs::walker::{calculate_total_size, walk_files};
use crate::manifest::store::{build_manifest, load_manifest, save_manifest, ManifestScope};
use crate::manifest::{diff, FileDifferences, ManifestInfo};
use crate::progress::format::{format_bytes, format_duration};
use crate::progress::{Progress, ProgressReporter, ProgressSink, REPORT_INTERVAL};
use crate::store::{Cache, StoreOpener};
use crate::utils::Result;

pub use dispatch::{dispatch, DispatchSummary};
pub use guard::SyncGuard;
pub use identity::{check_freshness, save_cache_info, CacheIdentity, Freshness, StaleReason};
pub use paths::CachePaths;
pub use upstream::{HttpUpstream, Upstream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// No previous manifest; everything was extracted
    FirstRun,
    /// Content identical to the previous manifest
    Unchanged,
    Changed,
}

impl fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassOutcome::FirstRun => write!(f, "first run"),
            PassOutcome::Unchanged => write!(f, "unchanged"),
            PassOutcome::Changed => write!(f, "changed"),
        }
    }
}

/// Summary of a completed pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub identity: CacheIdentity,
    pub outcome: PassOutcome,
    /// Whether the raw store was fetched during this pass
    pub downloaded: bool,
    pub files: usize,
    pub added: usize,
    pub removed: usize,
    pub dispatch: DispatchSummary,
    pub duration: Duration,
}

impl PassReport {
    pub fn failed_entries(&self) -> usize {
        self.dispatch.failed
    }
}

/// Where a pass was when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassStage {
    CheckFreshness,
    Download,
    OpenStore,
    BuildManifest,
    Diff,
    PersistManifest,
    Dispatch,
}

impl PassStage {
    fn describe(&self) -> &'static str {
        match self {
            PassStage::CheckFreshness => "Checking for updates",
            PassStage::Download => "Downloading cache",
            PassStage::OpenStore => "Opening cache",
            PassStage::BuildManifest => "Building manifest",
            PassStage::Diff => "Comparing manifests",
            PassStage::PersistManifest => "Saving manifest",
            PassStage::Dispatch => "Extracting",
        }
    }
}

/// Closes the store when dropped, so early returns and panics still release it.
struct OpenStore(Arc<dyn Cache>);

impl Drop for OpenStore {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Per-pass state threaded through the stages.
struct Pass<'a> {
    id: Uuid,
    started: Instant,
    progress: &'a Progress,
    stage: PassStage,
    identity: Option<CacheIdentity>,
}

impl Pass<'_> {
    fn enter(&mut self, stage: PassStage) {
        self.stage = stage;
        self.progress.stage(stage.describe());
    }
}

/// Runs synchronization passes for the configured game and environment.
pub struct Synchronizer {
    config: Config,
    scope: ManifestScope,
    upstream: Arc<dyn Upstream>,
    opener: Arc<dyn StoreOpener>,
    sink: Arc<dyn ProgressSink>,
    guard: SyncGuard,
}

impl Synchronizer {
    pub fn new(
        config: Config,
        upstream: Arc<dyn Upstream>,
        opener: Arc<dyn StoreOpener>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scope: config.manifest_scope()?,
            config,
            upstream,
            opener,
            sink,
            guard: SyncGuard::new(),
        })
    }

    /// Share a guard with other synchronizers in the same process.
    pub fn with_guard(mut self, guard: SyncGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Run one pass. Only one pass per game and environment runs at a time.
    pub async fn run(&self) -> Result<PassReport> {
        let game = self.config.upstream.game;
        let environment = self.config.upstream.environment;
        let pass_id = Uuid::new_v4();
        let span = info_span!("pass", id = %pass_id, game = %game, env = %environment);

        async {
            let _running = self.guard.acquire(game, environment).await;
            let (progress, reporter) = ProgressReporter::spawn(Arc::clone(&self.sink), REPORT_INTERVAL);

            let mut pass = Pass {
                id: pass_id,
                started: Instant::now(),
                progress: &progress,
                stage: PassStage::CheckFreshness,
                identity: None,
            };
            let result = self.run_pass(&mut pass).await;

            match &result {
                Ok(report) => {
                    info!(
                        "Pass {} ({}): {} files, {} added, {} removed, {} failed in {}",
                        report.identity,
                        report.outcome,
                        report.files,
                        report.added,
                        report.removed,
                        report.failed_entries(),
                        format_duration(report.duration)
                    );
                    progress.idle("Ready");
                }
                Err(e) => {
                    let target = pass
                        .identity
                        .as_ref()
                        .map_or_else(|| format!("{}/{}", game, environment), |identity| identity.to_string());
                    error!("Pass failed while {} for {}: {}", pass.stage.describe().to_lowercase(), target, e);
                    progress.idle(format!("Failed: {}", e));
                }
            }

            progress.shutdown();
            drop(progress);
            if let Err(e) = reporter.await {
                warn!("Progress reporter ended abnormally: {}", e);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_pass(&self, pass: &mut Pass<'_>) -> Result<PassReport> {
        let game = self.config.upstream.game;
        let environment = self.config.upstream.environment;

        pass.enter(PassStage::CheckFreshness);
        let identity = self.upstream.latest(game, environment).await?;
        pass.identity = Some(identity.clone());
        let paths = CachePaths::new(&self.config.paths.root, game, environment, identity.revision);

        let freshness = {
            let identity = identity.clone();
            let paths = paths.clone();
            tokio::task::spawn_blocking(move || check_freshness(&identity, &paths)).await?
        };

        let downloaded = freshness.is_stale();
        if downloaded {
            pass.enter(PassStage::Download);
            self.refresh(&identity, &paths, pass.progress).await?;
        }

        pass.enter(PassStage::OpenStore);
        let store = OpenStore(self.opener.open(&paths.data_dir())?);

        pass.enter(PassStage::BuildManifest);
        let info = ManifestInfo {
            revision: identity.revision,
            game_type: game,
            environment,
        };
        let current = {
            let cache = Arc::clone(&store.0);
            let scope = self.scope.clone();
            tokio::task::spawn_blocking(move || build_manifest(cache.as_ref(), &scope, info)).await?
        };

        pass.enter(PassStage::Diff);
        if !paths.manifest().exists() {
            carry_forward(&paths).await?;
        }
        let (outcome, changes) = match load_manifest(&paths.manifest()).await {
            None => (PassOutcome::FirstRun, FileDifferences::all_added(&current)),
            Some(previous) => {
                let changes = diff(&previous, &current);
                if changes.is_empty() {
                    (PassOutcome::Unchanged, changes)
                } else {
                    (PassOutcome::Changed, changes)
                }
            }
        };

        pass.enter(PassStage::PersistManifest);
        if outcome == PassOutcome::Changed {
            remove_packaged(&paths).await?;
        }
        save_manifest(&current, &paths.manifest()).await?;

        let (added, removed) = (changes.added.len(), changes.removed.len());
        let summary = if outcome == PassOutcome::Unchanged {
            info!("No content changes since the last pass");
            DispatchSummary::default()
        } else {
            info!("{} entries added or changed, {} removed", added, removed);
            pass.enter(PassStage::Dispatch);
            let ctx = ExtractorContext::new(
                Arc::clone(&store.0),
                paths.extracted_dir(),
                self.config.sync.write_batch_size,
            );
            let skip = self.config.dispatch_skip_list();
            let progress = pass.progress.clone();
            tokio::task::spawn_blocking(move || dispatch(changes, &ctx, &skip, &progress)).await?
        };
        drop(store);

        Ok(PassReport {
            pass_id: pass.id,
            identity,
            outcome,
            downloaded,
            files: current.file_count(),
            added,
            removed,
            dispatch: summary,
            duration: pass.started.elapsed(),
        })
    }

    /// Fetch and unpack the raw store, then record its checksum and identity.
    async fn refresh(&self, identity: &CacheIdentity, paths: &CachePaths, progress: &Progress) -> Result<()> {
        info!("Fetching {}", identity);
        tokio::fs::create_dir_all(paths.base()).await?;

        let bar = Arc::new(progress.bar("Downloading", 0));
        self.upstream
            .download_raw_store(identity, paths.base(), Arc::clone(&bar))
            .await?;
        drop(bar);

        let bar = Arc::new(progress.bar("Unpacking", 0));
        self.upstream
            .extract_raw_archive(paths.base(), &paths.data_dir(), Arc::clone(&bar))
            .await?;
        drop(bar);

        let data_dir = paths.data_dir();
        let checksum_file = paths.data_checksum();
        let (checksum, size) = tokio::task::spawn_blocking(move || -> std::io::Result<(u64, u64)> {
            Ok((save_checksum(&data_dir, &checksum_file)?, calculate_total_size(&data_dir)?))
        })
        .await??;
        save_cache_info(identity, &paths.cache_info())?;

        info!("Stored {} ({}, data checksum {})", identity, format_bytes(size), checksum);
        Ok(())
    }
}

/// Seed a new revision with the newest earlier revision's manifest and
/// extracted data, so only the entries that changed between them are
/// extracted again.
async fn carry_forward(paths: &CachePaths) -> Result<()> {
    let Some(previous) = paths.previous_revision() else {
        return Ok(());
    };

    info!(
        "Carrying manifest and extracted data forward from revision {}",
        previous.revision()
    );
    let from = previous.extracted_dir();
    let to = paths.extracted_dir();
    let copied = tokio::task::spawn_blocking(move || copy_tree(&from, &to)).await??;
    tokio::fs::copy(previous.manifest(), paths.manifest()).await?;

    info!("Carried forward {} of extracted data", format_bytes(copied));
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<u64> {
    let mut copied = 0;
    for file in walk_files(from)? {
        let target = to.join(&file.relative_path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        copied += std::fs::copy(&file.path, &target)?;
    }
    Ok(copied)
}

/// Downstream bundles are built from extracted data and go stale with it.
async fn remove_packaged(paths: &CachePaths) -> Result<()> {
    let packaged = paths.packaged_dir();
    match tokio::fs::remove_dir_all(&packaged).await {
        Ok(()) => {
            info!("Removed stale packaged artifacts in {}", packaged.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::DualData;
    use crate::game::{config_archive, gameval_table, index, Environment, GameType};
    use crate::progress::ProgressBar;
    use crate::store::MemoryCache;
    use crate::utils::SyncError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Upstream serving a fixed identity and a one-file raw store.
    struct FakeUpstream {
        identity: Mutex<CacheIdentity>,
        downloads: AtomicUsize,
        fail: AtomicBool,
    }

    impl FakeUpstream {
        fn new(revision: u32) -> Arc<Self> {
            Arc::new(Self {
                identity: Mutex::new(identity(revision)),
                downloads: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }

        fn set_revision(&self, revision: u32) {
            *self.identity.lock().unwrap() = identity(revision);
        }

        fn downloads(&self) -> usize {
            self.downloads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for FakeUpstream {
        async fn latest(&self, _game: GameType, _environment: Environment) -> Result<CacheIdentity> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::fetch("upstream unavailable"));
            }
            Ok(self.identity.lock().unwrap().clone())
        }

        async fn download_raw_store(
            &self,
            identity: &CacheIdentity,
            target_dir: &Path,
            _progress: Arc<ProgressBar>,
        ) -> Result<()> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(target_dir.join("disk.zip"), identity.id.to_string()).await?;
            Ok(())
        }

        async fn extract_raw_archive(
            &self,
            target_dir: &Path,
            data_dir: &Path,
            _progress: Arc<ProgressBar>,
        ) -> Result<()> {
            tokio::fs::create_dir_all(data_dir).await?;
            tokio::fs::rename(target_dir.join("disk.zip"), data_dir.join("main_file_cache.dat2")).await?;
            Ok(())
        }
    }

    fn identity(revision: u32) -> CacheIdentity {
        CacheIdentity {
            id: 1000 + u64::from(revision),
            scope: "runescape".to_string(),
            game: GameType::OldSchool,
            environment: Environment::Live,
            revision,
            timestamp: None,
        }
    }

    struct Fixture {
        temp_dir: TempDir,
        cache: MemoryCache,
        upstream: Arc<FakeUpstream>,
        config: Config,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let mut config = Config::default();
            config.paths.root = temp_dir.path().to_path_buf();
            config.sync.write_batch_size = 2;

            let cache = MemoryCache::new();
            cache.insert(index::GAMEVALS, gameval_table::ITEMS, 4151, b"abyssal_whip".to_vec());
            cache.insert(index::GAMEVALS, gameval_table::ITEMS, 11802, b"armadyl_godsword".to_vec());
            cache.insert(index::CONFIGS, config_archive::ITEMS, 4151, vec![1, 2, 0]);
            cache.insert(index::CONFIGS, config_archive::ITEMS, 11802, vec![3, 4, 0]);
            cache.insert(index::TEXTURES, 0, 1, vec![0x12, 0x34, 1]);

            Self {
                temp_dir,
                cache,
                upstream: FakeUpstream::new(221),
                config,
            }
        }

        fn synchronizer(&self) -> Synchronizer {
            Synchronizer::new(
                self.config.clone(),
                Arc::clone(&self.upstream) as Arc<dyn Upstream>,
                Arc::new(self.cache.clone()),
                Arc::new(|_busy: bool, _percent: Option<f64>, _message: Option<String>| {}),
            )
            .unwrap()
        }

        fn paths(&self, revision: u32) -> CachePaths {
            CachePaths::new(self.temp_dir.path(), GameType::OldSchool, Environment::Live, revision)
        }

        fn items(&self, revision: u32) -> DualData {
            DualData::load(&self.paths(revision).extracted_dir(), "items")
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_first_run_extracts_everything() {
        let fixture = Fixture::new();
        let report = fixture.synchronizer().run().await.unwrap();

        assert_eq!(report.outcome, PassOutcome::FirstRun);
        assert!(report.downloaded);
        assert_eq!(report.files, 5);
        assert_eq!(report.added, 5);
        assert_eq!(report.dispatch.extracted, 5);
        assert_eq!(report.failed_entries(), 0);

        let paths = fixture.paths(221);
        assert!(paths.manifest().is_file());
        assert!(paths.cache_info().is_file());
        assert!(paths.data_checksum().is_file());
        assert_eq!(fixture.items(221).web()[&4151]["name"], "abyssal_whip");
        assert!(fixture.cache.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unchanged_pass_only_refreshes_timestamp() {
        let fixture = Fixture::new();
        let synchronizer = fixture.synchronizer();
        synchronizer.run().await.unwrap();
        let first = load_manifest(&fixture.paths(221).manifest()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let report = synchronizer.run().await.unwrap();
        let second = load_manifest(&fixture.paths(221).manifest()).await.unwrap();

        assert_eq!(report.outcome, PassOutcome::Unchanged);
        assert!(!report.downloaded);
        assert_eq!(fixture.upstream.downloads(), 1);
        assert_eq!(report.dispatch, DispatchSummary::default());
        assert!(first.same_content(&second));
        assert!(second.timestamp() > first.timestamp());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_changed_pass_updates_extracted_data() {
        let fixture = Fixture::new();
        let synchronizer = fixture.synchronizer();
        synchronizer.run().await.unwrap();

        let packaged = fixture.paths(221).packaged_dir();
        std::fs::create_dir_all(&packaged).unwrap();
        std::fs::write(packaged.join("items.bundle"), b"stale").unwrap();

        fixture.cache.insert(index::CONFIGS, config_archive::ITEMS, 4151, vec![9, 9, 9, 0]);
        fixture.cache.remove_file(index::CONFIGS, config_archive::ITEMS, 11802);

        let report = synchronizer.run().await.unwrap();
        assert_eq!(report.outcome, PassOutcome::Changed);
        assert_eq!((report.added, report.removed), (1, 1));
        assert!(!packaged.exists());

        let items = fixture.items(221);
        assert_eq!(items.cache()[&4151]["size"], 4);
        assert_eq!(items.web()[&4151]["name"], "abyssal_whip");
        assert!(!items.web().contains_key(&11802));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_entry_failures_do_not_abort_the_pass() {
        let fixture = Fixture::new();
        fixture.cache.insert(index::TEXTURES, 0, 2, vec![0x01]);
        fixture.cache.insert(index::CONFIGS, config_archive::ITEMS, 20, vec![5, 5]);

        let report = fixture.synchronizer().run().await.unwrap();
        assert_eq!(report.failed_entries(), 2);
        assert_eq!(report.dispatch.extracted, 5);
        assert!(fixture.paths(221).manifest().is_file());
        assert!(fixture.cache.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fetch_failure_never_opens_the_store() {
        let fixture = Fixture::new();
        fixture.upstream.fail.store(true, Ordering::SeqCst);

        let result = fixture.synchronizer().run().await;
        assert!(matches!(result, Err(SyncError::Fetch(_))));
        assert_eq!(fixture.cache.open_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_store_is_closed_when_the_pass_fails() {
        let fixture = Fixture::new();
        let synchronizer = fixture.synchronizer();
        synchronizer.run().await.unwrap();
        let manifest = fixture.paths(221).manifest();
        // A directory in place of the manifest makes the save fail
        std::fs::remove_file(&manifest).unwrap();
        std::fs::create_dir_all(manifest.join("blocked")).unwrap();

        let result = synchronizer.run().await;
        assert!(matches!(result, Err(SyncError::ManifestPersist { .. })));
        assert_eq!(fixture.cache.open_count(), 2);
        assert!(fixture.cache.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tampered_data_is_downloaded_again() {
        let fixture = Fixture::new();
        let synchronizer = fixture.synchronizer();
        synchronizer.run().await.unwrap();

        std::fs::write(fixture.paths(221).data_dir().join("main_file_cache.idx0"), b"junk").unwrap();
        let report = synchronizer.run().await.unwrap();

        assert!(report.downloaded);
        assert_eq!(fixture.upstream.downloads(), 2);
        assert_eq!(report.outcome, PassOutcome::Unchanged);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_test_mode_skips_dispatch_not_manifest() {
        let mut fixture = Fixture::new();
        fixture.config.sync.test_mode = true;
        fixture.config.sync.skip_indices = vec![index::TEXTURES];

        let report = fixture.synchronizer().run().await.unwrap();
        assert_eq!(report.files, 5);
        assert_eq!(report.dispatch.extracted, 4);
        assert!(!fixture.paths(221).extracted_dir().join("textures").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_new_revision_starts_from_the_previous_one() {
        let fixture = Fixture::new();
        let synchronizer = fixture.synchronizer();
        synchronizer.run().await.unwrap();

        fixture.upstream.set_revision(222);
        fixture.cache.insert(index::TEXTURES, 0, 2, vec![0x00, 0x10, 0]);

        let report = synchronizer.run().await.unwrap();
        assert!(report.downloaded);
        assert_eq!(report.outcome, PassOutcome::Changed);
        assert_eq!((report.added, report.removed), (1, 0));

        // Unchanged entries come along from revision 221
        assert_eq!(fixture.items(222).web()[&11802]["name"], "armadyl_godsword");
        let textures = DualData::load(&fixture.paths(222).extracted_dir(), "textures");
        assert_eq!(textures.web().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_passes_are_serialized() {
        let fixture = Fixture::new();
        let synchronizer = fixture.synchronizer();

        let (first, second) = tokio::join!(synchronizer.run(), synchronizer.run());
        let mut outcomes = vec![first.unwrap().outcome, second.unwrap().outcome];
        outcomes.sort_by_key(|outcome| *outcome != PassOutcome::FirstRun);

        assert_eq!(outcomes, vec![PassOutcome::FirstRun, PassOutcome::Unchanged]);
        assert_eq!(fixture.upstream.downloads(), 1);
    }
}
