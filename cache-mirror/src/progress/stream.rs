//! Byte-counting stream wrapper for download progress.

use bytes::Bytes;
use futures_util::{ready, Stream};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::{Duration, Instant};

use super::{ProgressBar, REPORT_INTERVAL};

/// Passes chunks through unchanged and moves a [`ProgressBar`] to the number
/// of bytes seen so far, at most once per interval and once more at the end.
pub struct ProgressStream<S> {
    inner: S,
    bar: Arc<ProgressBar>,
    bytes_transferred: u64,
    last_update: Instant,
    update_interval: Duration,
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, bar: Arc<ProgressBar>) -> Self {
        Self {
            inner,
            bar,
            bytes_transferred: 0,
            last_update: Instant::now(),
            update_interval: REPORT_INTERVAL,
        }
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }
}

impl<S, E> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = ready!(Pin::new(&mut self.inner).poll_next(cx));

        match &item {
            Some(Ok(chunk)) => {
                self.bytes_transferred += chunk.len() as u64;
                let now = Instant::now();
                if now.duration_since(self.last_update) >= self.update_interval {
                    self.bar.set_position(self.bytes_transferred);
                    self.last_update = now;
                }
            }
            Some(Err(_)) => {}
            None => self.bar.set_position(self.bytes_transferred),
        }
        Poll::Ready(item)
    }
}
