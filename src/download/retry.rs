//! Bounded retries with exponential backoff for transient failures.
//!
//! A failed request is classified into a [`FailureType`]. Transient failures
//! (timeouts, dropped connections) keep the entry at the front of the queue
//! and are retried after a growing delay until [`RetryPolicy`] runs out of
//! attempts. Everything else is final for the entry, and a few failures are
//! final for the whole queue.
//!
//! # Example
//!
//! ```
//! use batch_downloader::download::{
//!     DownloadError, FailureType, RetryDecision, RetryPolicy, classify_error,
//! };
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::stalled("https://example.com/file.iso", 300);
//! assert_eq!(classify_error(&error), FailureType::Transient);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => println!("Giving up: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Default maximum attempts per entry, the first one included.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

const MAX_JITTER: Duration = Duration::from_millis(500);

/// How a failure affects the entry and the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed if the same entry is issued again.
    ///
    /// Examples: connection or stall timeout, reset connection.
    Transient,

    /// Final for this entry; the queue moves on unless its stop policy says otherwise.
    ///
    /// Examples: unexpected status, size mismatch, write error.
    Permanent,

    /// Final for the whole queue: draining stops.
    ///
    /// Example: not enough disk space.
    QueueFatal,
}

/// Decision on whether to retry a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Issue the entry again after `delay`.
    Retry {
        /// How long to wait first.
        delay: Duration,
        /// Attempt number of the retry (the first retry is attempt 2).
        attempt: u32,
    },

    /// Give up on the entry.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Retry budget and backoff curve.
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay) + jitter
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings. `max_attempts` is at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter: true,
        }
    }

    /// Default curve with a custom attempt budget.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Retries immediately, without delay or jitter.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Maximum number of attempts.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether attempt number `attempt` (1-indexed) gets a successor.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::QueueFatal => {
                return RetryDecision::DoNotRetry {
                    reason: "queue cannot continue".to_string(),
                };
            }
            FailureType::Transient => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        let jitter = if self.jitter {
            let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
            Duration::from_millis(jitter_ms)
        } else {
            Duration::ZERO
        };
        Duration::from_millis(capped_ms as u64) + jitter
    }
}

/// Classifies a download error for retry and stop decisions.
///
/// | Error | Type |
/// |-------|------|
/// | ConnectTimeout, Stalled, Transport | Transient |
/// | InsufficientDiskSpace | QueueFatal |
/// | everything else | Permanent |
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::ConnectTimeout { .. }
        | DownloadError::Stalled { .. }
        | DownloadError::Transport { .. } => FailureType::Transient,
        DownloadError::InsufficientDiskSpace { .. } => FailureType::QueueFatal,
        DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::SizeMismatch { .. }
        | DownloadError::UnexpectedStatus { .. }
        | DownloadError::TooManyRedirects { .. }
        | DownloadError::NoDestination { .. }
        | DownloadError::Decode { .. } => FailureType::Permanent,
    }
}
