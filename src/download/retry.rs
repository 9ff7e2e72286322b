//! Retry decisions with exponential backoff for transient transfer failures.
//!
//! When an attempt fails, its [`ErrorKind`] decides whether another attempt
//! can help (see [`ErrorKind::is_transient`]). The [`RetryPolicy`] then
//! decides whether the retry budget allows it and how long to wait.
//!
//! # Example
//!
//! ```
//! use msr_core::download::{RetryDecision, RetryPolicy};
//! use msr_core::ErrorKind;
//!
//! let policy = RetryPolicy::default();
//! match policy.should_retry(ErrorKind::ServerError { status: 503 }, 0) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("retry #{attempt} in {delay:?}");
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("giving up: {reason}");
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use crate::job::ErrorKind;

/// Default maximum number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Decision on whether to retry a failed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the transfer after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Retry number this will be (1 for the first retry).
        attempt: u32,
    },

    /// Do not retry the transfer.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Retry budget and backoff shape.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^retries_so_far, max_delay) + rand(0, base_delay)
/// ```
///
/// With defaults, delays are approximately 1s, 2s, 4s plus up to 1s of jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    max_retries: u32,

    /// Base delay for the first retry, also the jitter ceiling.
    base_delay: Duration,

    /// Maximum delay cap (before jitter).
    max_delay: Duration,

    /// Multiplier applied each retry (typically 2.0 for doubling).
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// # Arguments
    ///
    /// * `max_retries` - Retries allowed after the first attempt (0 disables retry)
    /// * `base_delay` - Base delay for the first retry
    /// * `max_delay` - Maximum delay cap
    /// * `backoff_multiplier` - Multiplier for exponential increase
    #[must_use]
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
            backoff_multiplier,
        }
    }

    /// Creates a policy with a custom retry budget, using defaults for other settings.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Replaces the base delay, keeping the cap at least as large.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = self.max_delay.max(base_delay);
        self
    }

    /// Returns the configured retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the configured base delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Determines whether to retry a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `kind` - Classification of the failure
    /// * `retries_so_far` - Retries already made for this job (0 after the first attempt)
    #[instrument(level = "debug", skip(self), fields(max_retries = self.max_retries))]
    pub fn should_retry(&self, kind: ErrorKind, retries_so_far: u32) -> RetryDecision {
        if !kind.is_transient() {
            return RetryDecision::DoNotRetry {
                reason: format!("permanent failure ({kind}) - retry would not help"),
            };
        }

        if retries_so_far >= self.max_retries {
            debug!(retries_so_far, "retry budget exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("max retries ({}) exhausted", self.max_retries),
            };
        }

        let delay = self.backoff(retries_so_far);

        debug!(
            next_attempt = retries_so_far + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: retries_so_far + 1,
        }
    }

    /// Delay before the retry following `retries_so_far` earlier retries.
    ///
    /// Formula: `min(base_delay * multiplier^retries_so_far, max_delay) + jitter`
    #[must_use]
    pub fn backoff(&self, retries_so_far: u32) -> Duration {
        self.exponential_delay(retries_so_far) + self.calculate_jitter()
    }

    fn exponential_delay(&self, retries_so_far: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);
        let delay_ms = base_ms * multiplier.powf(f64::from(retries_so_far));
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Random jitter in `0..=base_delay`.
    ///
    /// Spreads out retries of jobs that failed together.
    fn calculate_jitter(&self) -> Duration {
        let ceiling = self.base_delay.as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=ceiling);
        Duration::from_millis(jitter_ms)
    }
}
