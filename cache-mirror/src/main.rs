//! Cache Mirror - Main entry point
//!
//! Runs one synchronization pass against the configured upstream.

use anyhow::Result;
use cache_mirror::progress::format::format_duration;
use cache_mirror::progress::LogSink;
use cache_mirror::store::LooseFileOpener;
use cache_mirror::sync::{HttpUpstream, Synchronizer};
use cache_mirror::{config::Config, utils};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Root directory of the mirror (overrides config)
    #[arg(short, long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    if let Some(root) = args.root {
        config.paths.root = root;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.performance.io_threads)
        .max_blocking_threads(config.performance.io_threads)
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    tracing::info!(
        "Starting cache-mirror v{} ({} {} into {})",
        env!("CARGO_PKG_VERSION"),
        config.upstream.game,
        config.upstream.environment,
        config.paths.root.display()
    );

    let upstream = Arc::new(HttpUpstream::new(&config.upstream)?);
    let synchronizer = Synchronizer::new(config, upstream, Arc::new(LooseFileOpener), Arc::new(LogSink))?;

    let report = synchronizer.run().await?;
    tracing::info!(
        "Pass {} finished: {} at revision {}, {} entries extracted, {} failed, took {}",
        report.pass_id,
        report.outcome,
        report.identity.revision,
        report.dispatch.extracted,
        report.failed_entries(),
        format_duration(report.duration)
    );

    if report.dispatch.extractor_failures > 0 {
        tracing::warn!(
            "{} extractors failed to save their output",
            report.dispatch.extractor_failures
        );
    }

    Ok(())
}
