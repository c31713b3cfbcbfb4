// SPDX-License-Identifier: AGPL-3.0-only

//! Frame statistics
//!
//! The pipeline owns [`SystemStats`] and is its only writer. Readers get
//! immutable [`StatsSnapshot`]s over a channel, so a report can be stale but
//! never torn.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Running counters for the host pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemStats {
    frame_count: u64,
    failed_count: u64,
    avg_latency_ms: f64,
    last_frame_at: Option<Duration>,
}

impl SystemStats {
    /// Fold a completed frame into the running average.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_complete(&mut self, latency: Duration, at: Duration) {
        self.frame_count += 1;
        let n = self.frame_count as f64;
        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.avg_latency_ms = (self.avg_latency_ms * (n - 1.0) + latency_ms) / n;
        self.last_frame_at = Some(at);
    }

    /// Count a frame that did not complete. Latency is not affected.
    pub fn record_failure(&mut self) {
        self.failed_count += 1;
    }

    /// Immutable copy of the current values.
    pub const fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frame_count: self.frame_count,
            failed_count: self.failed_count,
            avg_latency_ms: self.avg_latency_ms,
            last_frame_at: self.last_frame_at,
        }
    }
}

/// Point-in-time copy of [`SystemStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    /// Frames completed.
    pub frame_count: u64,
    /// Frames abandoned (timeout, busy or bus error).
    pub failed_count: u64,
    /// Average latency of completed frames in milliseconds.
    pub avg_latency_ms: f64,
    /// Clock time of the last completed frame.
    pub last_frame_at: Option<Duration>,
}

impl StatsSnapshot {
    /// Frames per second implied by the average latency, 0 before the first
    /// frame.
    pub fn fps(&self) -> f64 {
        if self.frame_count == 0 || self.avg_latency_ms <= 0.0 {
            0.0
        } else {
            1000.0 / self.avg_latency_ms
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frames={} failed={} avg_latency={:.2}ms fps={:.2}",
            self.frame_count,
            self.failed_count,
            self.avg_latency_ms,
            self.fps()
        )
    }
}

/// Pipeline end of the stats channel.
#[derive(Debug, Clone)]
pub struct StatsPublisher {
    tx: Sender<StatsSnapshot>,
}

impl StatsPublisher {
    /// Send a snapshot. A dropped reporter is not an error.
    pub fn publish(&self, snapshot: StatsSnapshot) {
        if self.tx.send(snapshot).is_err() {
            tracing::trace!("Stats reporter gone, snapshot discarded");
        }
    }
}

/// Reader end of the stats channel. Keeps the most recent snapshot.
#[derive(Debug)]
pub struct StatsReporter {
    rx: Receiver<StatsSnapshot>,
    latest: StatsSnapshot,
}

/// Connected publisher/reporter pair.
pub fn stats_channel() -> (StatsPublisher, StatsReporter) {
    let (tx, rx) = mpsc::channel();
    (
        StatsPublisher { tx },
        StatsReporter {
            rx,
            latest: StatsSnapshot::default(),
        },
    )
}

impl StatsReporter {
    /// Drain pending snapshots and return the latest one seen.
    ///
    /// The second value is false once every publisher has been dropped.
    pub fn drain(&mut self) -> (StatsSnapshot, bool) {
        loop {
            match self.rx.try_recv() {
                Ok(snapshot) => self.latest = snapshot,
                Err(TryRecvError::Empty) => return (self.latest, true),
                Err(TryRecvError::Disconnected) => return (self.latest, false),
            }
        }
    }

    /// Wait up to `period` for publishers to go away, then drain.
    ///
    /// Used by a reporting thread that wakes every `period`; returns the
    /// latest snapshot and whether the pipeline is still publishing.
    pub fn tick(&mut self, period: Duration) -> (StatsSnapshot, bool) {
        let deadline = std::time::Instant::now() + period;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(snapshot) => self.latest = snapshot,
                Err(RecvTimeoutError::Timeout) => return (self.latest, true),
                Err(RecvTimeoutError::Disconnected) => return (self.latest, false),
            }
        }
    }

    /// Latest snapshot received so far.
    pub const fn latest(&self) -> StatsSnapshot {
        self.latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_average() {
        let mut stats = SystemStats::default();
        stats.record_complete(Duration::from_millis(10), Duration::from_secs(1));
        stats.record_complete(Duration::from_millis(20), Duration::from_secs(2));
        stats.record_complete(Duration::from_millis(30), Duration::from_secs(3));
        stats.record_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.frame_count, 3);
        assert_eq!(snap.failed_count, 1);
        assert!((snap.avg_latency_ms - 20.0).abs() < 1e-9);
        assert!((snap.fps() - 50.0).abs() < 1e-9);
        assert_eq!(snap.last_frame_at, Some(Duration::from_secs(3)));
    }

    #[test]
    fn fps_is_zero_before_first_frame() {
        assert_eq!(StatsSnapshot::default().fps(), 0.0);
    }

    #[test]
    fn reporter_keeps_latest() {
        let (publisher, mut reporter) = stats_channel();
        let mut stats = SystemStats::default();
        for ms in [5, 15] {
            stats.record_complete(Duration::from_millis(ms), Duration::ZERO);
            publisher.publish(stats.snapshot());
        }

        let (latest, live) = reporter.drain();
        assert!(live);
        assert_eq!(latest.frame_count, 2);

        drop(publisher);
        let (latest, live) = reporter.tick(Duration::from_millis(50));
        assert!(!live);
        assert_eq!(latest, reporter.latest());
    }

    #[test]
    fn publishing_without_reporter_is_silent() {
        let (publisher, reporter) = stats_channel();
        drop(reporter);
        publisher.publish(StatsSnapshot::default());
    }
}
