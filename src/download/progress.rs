//! Per-request byte progress with change suppression.

use std::time::Instant;

/// Byte step used when the total size is unknown.
const UNKNOWN_SIZE_STEP: u64 = 1024 * 1024;

/// Progress sample reported to event consumers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// Bytes of the file present so far, including a resumed prefix.
    pub current: u64,
    /// Full size of the file, zero when unknown.
    pub total: u64,
    /// Transfer rate of this request in KiB/s.
    pub speed_kib: f64,
}

/// Tracks one request and reports only when the percentage changes.
///
/// Sizes include the bytes already on disk so a resumed file continues from
/// where it stopped instead of starting over at zero.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    base: u64,
    expected: Option<u64>,
    received: u64,
    last_mark: Option<u64>,
    started: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(base: u64, expected: Option<u64>) -> Self {
        Self {
            base,
            expected,
            received: 0,
            last_mark: None,
            started: Instant::now(),
        }
    }

    pub(crate) fn received(&self) -> u64 {
        self.received
    }

    /// Records a chunk; returns a sample when it moves the displayed value.
    pub(crate) fn record(&mut self, chunk_len: usize) -> Option<ProgressSample> {
        self.received += chunk_len as u64;
        let current = self.base + self.received;
        let total = self.expected.map_or(0, |expected| self.base + expected);

        let mark = if total > 0 {
            current.saturating_mul(100) / total
        } else {
            self.received / UNKNOWN_SIZE_STEP
        };
        if self.last_mark == Some(mark) {
            return None;
        }
        self.last_mark = Some(mark);

        Some(ProgressSample {
            current,
            total,
            speed_kib: self.speed_kib(),
        })
    }

    #[allow(clippy::cast_precision_loss)]
    fn speed_kib(&self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs <= f64::EPSILON {
            return 0.0;
        }
        self.received as f64 / secs / 1024.0
    }
}
