//! Progress reporting for synchronization passes.
//!
//! Workers push discrete [`ProgressEvent`]s into a channel through
//! [`Progress`] and [`ProgressBar`] handles. A single reporter task folds them
//! into an overall status and forwards it to a [`ProgressSink`], at most once
//! per tick for bar updates and immediately for stage changes.

pub mod format;
pub mod stream;

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Default interval between bar-driven sink updates (4 updates per second)
pub const REPORT_INTERVAL: Duration = Duration::from_millis(250);

/// Receives coarse pass status. Calls arrive at irregular intervals.
pub trait ProgressSink: Send + Sync {
    fn report(&self, busy: bool, percent: Option<f64>, message: Option<String>);
}

impl<F> ProgressSink for F
where
    F: Fn(bool, Option<f64>, Option<String>) + Send + Sync,
{
    fn report(&self, busy: bool, percent: Option<f64>, message: Option<String>) {
        (self)(busy, percent, message)
    }
}

/// Sink that writes status changes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn report(&self, busy: bool, percent: Option<f64>, message: Option<String>) {
        let message = message.unwrap_or_default();
        match (busy, percent) {
            (true, Some(percent)) => info!("[{:>5.1}%] {}", percent, message),
            (true, None) => info!("{}", message),
            (false, _) => info!("Idle: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A new pass stage; forwarded to the sink right away
    Stage { message: String },
    Started { id: u64, label: String, total: u64 },
    Advanced { id: u64, delta: u64 },
    Position { id: u64, position: u64 },
    Total { id: u64, total: u64 },
    Message { id: u64, message: String },
    Finished { id: u64 },
    /// The pass is over; the sink is told the mirror is ready
    Idle { message: String },
    Shutdown,
}

/// Producer side of the progress channel. Cheap to clone.
#[derive(Clone)]
pub struct Progress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
    next_id: Arc<AtomicU64>,
}

impl Progress {
    /// A handle whose events go nowhere.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn send(&self, event: ProgressEvent) {
        // The reporter may already be gone; progress is best-effort.
        let _ = self.tx.send(event);
    }

    pub fn stage(&self, message: impl Into<String>) {
        self.send(ProgressEvent::Stage {
            message: message.into(),
        });
    }

    pub fn bar(&self, label: impl Into<String>, total: u64) -> ProgressBar {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.send(ProgressEvent::Started {
            id,
            label: label.into(),
            total,
        });
        ProgressBar {
            id,
            tx: self.tx.clone(),
        }
    }

    pub fn idle(&self, message: impl Into<String>) {
        self.send(ProgressEvent::Idle {
            message: message.into(),
        });
    }

    /// Ask the reporter to flush and exit.
    pub fn shutdown(&self) {
        self.send(ProgressEvent::Shutdown);
    }
}

/// One tracked unit of work. Finishes itself when dropped.
///
/// Share a bar across owners by wrapping it in an `Arc`.
#[derive(Debug)]
pub struct ProgressBar {
    id: u64,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressBar {
    pub fn inc(&self, delta: u64) {
        let _ = self.tx.send(ProgressEvent::Advanced { id: self.id, delta });
    }

    pub fn set_position(&self, position: u64) {
        let _ = self.tx.send(ProgressEvent::Position { id: self.id, position });
    }

    pub fn set_total(&self, total: u64) {
        let _ = self.tx.send(ProgressEvent::Total { id: self.id, total });
    }

    pub fn set_message(&self, message: impl Into<String>) {
        let _ = self.tx.send(ProgressEvent::Message {
            id: self.id,
            message: message.into(),
        });
    }
}

impl Drop for ProgressBar {
    fn drop(&mut self) {
        let _ = self.tx.send(ProgressEvent::Finished { id: self.id });
    }
}

#[derive(Debug, Clone)]
struct BarState {
    label: String,
    message: Option<String>,
    position: u64,
    total: u64,
}

/// Aggregated view the reporter keeps between ticks.
#[derive(Debug, Default)]
struct ReporterState {
    stage: Option<String>,
    bars: BTreeMap<u64, BarState>,
    dirty: bool,
}

impl ReporterState {
    fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Stage { message } => self.stage = Some(message),
            ProgressEvent::Started { id, label, total } => {
                self.bars.insert(
                    id,
                    BarState {
                        label,
                        message: None,
                        position: 0,
                        total,
                    },
                );
            }
            ProgressEvent::Advanced { id, delta } => {
                if let Some(bar) = self.bars.get_mut(&id) {
                    bar.position = bar.position.saturating_add(delta);
                }
            }
            ProgressEvent::Position { id, position } => {
                if let Some(bar) = self.bars.get_mut(&id) {
                    bar.position = position;
                }
            }
            ProgressEvent::Total { id, total } => {
                if let Some(bar) = self.bars.get_mut(&id) {
                    bar.total = total;
                }
            }
            ProgressEvent::Message { id, message } => {
                if let Some(bar) = self.bars.get_mut(&id) {
                    bar.message = Some(message);
                }
            }
            ProgressEvent::Finished { id } => {
                self.bars.remove(&id);
            }
            ProgressEvent::Idle { .. } | ProgressEvent::Shutdown => {}
        }
        self.dirty = true;
    }

    /// Overall percent across active bars with a known total.
    fn percent(&self) -> Option<f64> {
        let (position, total) = self
            .bars
            .values()
            .filter(|bar| bar.total > 0)
            .fold((0u64, 0u64), |(p, t), bar| {
                (p + bar.position.min(bar.total), t + bar.total)
            });
        if total == 0 {
            None
        } else {
            Some((position as f64 / total as f64) * 100.0)
        }
    }

    /// The most recently started bar describes what is happening now.
    fn message(&self) -> Option<String> {
        let current = self.bars.values().next_back().map(|bar| match &bar.message {
            Some(message) => format!("{}: {}", bar.label, message),
            None => bar.label.clone(),
        });
        match (&self.stage, current) {
            (Some(stage), Some(current)) => Some(format!("{} ({})", stage, current)),
            (Some(stage), None) => Some(stage.clone()),
            (None, current) => current,
        }
    }
}

fn deliver(sink: &dyn ProgressSink, busy: bool, percent: Option<f64>, message: Option<String>) {
    let result = catch_unwind(AssertUnwindSafe(|| sink.report(busy, percent, message)));
    if result.is_err() {
        warn!("Progress sink panicked; update dropped");
    }
}

/// Consumer side: forwards channel events to a sink.
pub struct ProgressReporter;

impl ProgressReporter {
    /// Spawn the reporter task and return the producer handle.
    pub fn spawn(sink: Arc<dyn ProgressSink>, interval: Duration) -> (Progress, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let progress = Progress {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        let handle = tokio::spawn(Self::run(rx, sink, interval));
        (progress, handle)
    }

    async fn run(
        mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
        sink: Arc<dyn ProgressSink>,
        interval: Duration,
    ) {
        let mut state = ReporterState::default();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let event = match event {
                        Some(event) => event,
                        None => break,
                    };
                    match event {
                        ProgressEvent::Shutdown => break,
                        ProgressEvent::Idle { message } => {
                            state.stage = None;
                            state.dirty = false;
                            deliver(sink.as_ref(), false, None, Some(message));
                        }
                        event @ ProgressEvent::Stage { .. } => {
                            state.apply(event);
                            state.dirty = false;
                            deliver(sink.as_ref(), true, state.percent(), state.message());
                        }
                        event => state.apply(event),
                    }
                }
                _ = ticker.tick() => {
                    if state.dirty {
                        state.dirty = false;
                        deliver(sink.as_ref(), true, state.percent(), state.message());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<(bool, Option<f64>, Option<String>)>>>;

    fn recording_sink() -> (Arc<dyn ProgressSink>, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        let sink = move |busy: bool, percent: Option<f64>, message: Option<String>| {
            recorded.lock().unwrap().push((busy, percent, message));
        };
        (Arc::new(sink), calls)
    }

    #[test]
    fn test_percent_across_bars() {
        let mut state = ReporterState::default();
        state.apply(ProgressEvent::Started { id: 1, label: "sprites".into(), total: 10 });
        state.apply(ProgressEvent::Started { id: 2, label: "items".into(), total: 30 });
        state.apply(ProgressEvent::Advanced { id: 1, delta: 10 });
        state.apply(ProgressEvent::Position { id: 2, position: 10 });

        assert_eq!(state.percent(), Some(50.0));
        assert_eq!(state.message().as_deref(), Some("items"));

        state.apply(ProgressEvent::Finished { id: 2 });
        assert_eq!(state.percent(), Some(100.0));
    }

    #[test]
    fn test_no_known_total_means_no_percent() {
        let mut state = ReporterState::default();
        state.apply(ProgressEvent::Stage { message: "Checking freshness".into() });
        state.apply(ProgressEvent::Started { id: 1, label: "download".into(), total: 0 });
        state.apply(ProgressEvent::Message { id: 1, message: "disk.zip".into() });

        assert_eq!(state.percent(), None);
        assert_eq!(
            state.message().as_deref(),
            Some("Checking freshness (download: disk.zip)")
        );
    }

    #[tokio::test]
    async fn test_reporter_forwards_stages_and_idle() {
        let (sink, calls) = recording_sink();
        let (progress, handle) = ProgressReporter::spawn(sink, Duration::from_millis(10));

        progress.stage("Building manifest");
        {
            let bar = progress.bar("configs", 4);
            bar.inc(2);
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        progress.idle("Ready");
        progress.shutdown();
        handle.await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.first().unwrap().2.as_deref(), Some("Building manifest"));
        assert!(calls.iter().any(|(busy, percent, _)| *busy && *percent == Some(50.0)));
        let last = calls.last().unwrap();
        assert!(!last.0);
        assert_eq!(last.2.as_deref(), Some("Ready"));
    }

    #[tokio::test]
    async fn test_panicking_sink_does_not_stop_reporter() {
        let sink = |_busy: bool, _percent: Option<f64>, message: Option<String>| {
            if message.as_deref() == Some("boom") {
                panic!("sink failure");
            }
        };
        let (progress, handle) = ProgressReporter::spawn(Arc::new(sink), REPORT_INTERVAL);

        progress.stage("boom");
        progress.stage("after");
        progress.shutdown();
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_progress_ignores_events() {
        let progress = Progress::disabled();
        let bar = progress.bar("nothing", 1);
        bar.inc(1);
        progress.stage("ignored");
        progress.shutdown();
    }
}
