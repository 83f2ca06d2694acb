//! Routing a changeset through the extractors.
//!
//! Runs synchronously; the orchestrator calls [`dispatch`] on a blocking
//! thread. Per-entry failures are logged and counted, never fatal.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::extract::{build_extractors, sort_changeset, Extractor, ExtractorContext};
use crate::manifest::{FileChecksum, FileDifferences};
use crate::progress::Progress;

/// Outcome of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Added entries an extractor handled successfully
    pub extracted: usize,
    /// Removed entries an extractor dropped
    pub removed: usize,
    /// Entries that could not be read or extracted
    pub failed: usize,
    /// Entries in indices without an extractor
    pub unhandled: usize,
    /// Extractors whose end or cleanup failed
    pub extractor_failures: usize,
}

/// Drop entries of skipped indices and put the rest in processing order.
fn prepare_entries(mut entries: Vec<FileChecksum>, skip: &[u32]) -> Vec<FileChecksum> {
    entries.retain(|entry| !skip.contains(&entry.index));
    sort_changeset(&mut entries);
    entries
}

/// Dispatch `changes` to the extractors for every touched index, then end
/// and clear each of them.
pub fn dispatch(
    changes: FileDifferences,
    ctx: &ExtractorContext,
    skip: &[u32],
    progress: &Progress,
) -> DispatchSummary {
    let added = prepare_entries(changes.added, skip);
    let removed = prepare_entries(changes.removed, skip);
    if !skip.is_empty() {
        debug!("Skipping indices {:?}", skip);
    }

    let touched: BTreeSet<u32> = added.iter().chain(&removed).map(|entry| entry.index).collect();
    let mut extractors = build_extractors(&touched, ctx);
    let positions: HashMap<u32, usize> = extractors
        .iter()
        .enumerate()
        .map(|(position, (index, _))| (*index, position))
        .collect();

    for (index, extractor) in extractors.iter_mut() {
        let entries: Vec<FileChecksum> = added
            .iter()
            .chain(&removed)
            .filter(|entry| entry.index == *index)
            .copied()
            .collect();
        extractor.prepare(&entries, progress);
    }

    let mut summary = DispatchSummary::default();

    for entry in &removed {
        let Some(&position) = positions.get(&entry.index) else {
            summary.unhandled += 1;
            continue;
        };
        let extractor = &mut extractors[position].1;
        match extractor.remove(entry) {
            Ok(()) => summary.removed += 1,
            Err(e) => {
                warn!("{}: failed to remove {}/{}/{}: {}", extractor.name(), entry.index, entry.archive, entry.file, e);
                summary.failed += 1;
            }
        }
        extractor.advance(entry.archive);
    }

    for entry in &added {
        let Some(&position) = positions.get(&entry.index) else {
            summary.unhandled += 1;
            continue;
        };
        let extractor = &mut extractors[position].1;
        match ctx.cache.data(entry.index, entry.archive, Some(entry.file)) {
            Some(data) => match extractor.extract(entry.index, entry.archive, entry.file, &data) {
                Ok(()) => summary.extracted += 1,
                Err(e) => {
                    warn!("{}: {}", extractor.name(), e);
                    summary.failed += 1;
                }
            },
            None => {
                warn!("Failed to read entry {}/{}/{}", entry.index, entry.archive, entry.file);
                summary.failed += 1;
            }
        }
        extractor.advance(entry.archive);
    }

    summary.extractor_failures = finish(&mut extractors, progress);

    // Entries whose deferred output failed after extract returned
    let deferred: usize = extractors.iter_mut().map(|(_, extractor)| extractor.take_failures()).sum();
    summary.extracted = summary.extracted.saturating_sub(deferred);
    summary.failed += deferred;

    info!(
        "Dispatched {} added and {} removed entries to {} extractors ({} failed, {} without extractor)",
        added.len(),
        removed.len(),
        extractors.len(),
        summary.failed,
        summary.unhandled
    );
    summary
}

/// End every extractor under one shared flush bar, then release their state.
/// Returns the number of extractors that failed.
fn finish(extractors: &mut [(u32, Box<dyn Extractor>)], progress: &Progress) -> usize {
    let mut failures = 0;

    let pending: u64 = extractors.iter().map(|(_, extractor)| extractor.pending_writes()).sum();
    let flush = Arc::new(progress.bar("Saving extracted data", pending));
    for (_, extractor) in extractors.iter_mut() {
        extractor.set_flush_progress(Arc::clone(&flush));
    }

    for (_, extractor) in extractors.iter_mut() {
        if let Err(e) = extractor.end() {
            warn!("{}: failed to finish: {}", extractor.name(), e);
            failures += 1;
        }
    }
    drop(flush);

    for (_, extractor) in extractors.iter_mut() {
        if let Err(e) = extractor.clear_extraction_data() {
            warn!("{}: failed to clear extraction data: {}", extractor.name(), e);
            failures += 1;
        }
    }
    failures
}
