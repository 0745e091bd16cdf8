//! Retry and backoff policy for provider attempts.
//!
//! Backoff delays grow exponentially per attempt with a deterministic
//! addend, so the total wait for a given attempt sequence is reproducible
//! in tests.

use std::time::Duration;

/// Default number of attempts against a single provider before advancing.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff between attempts.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(15);

/// Default cap on a single backoff delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(90);

/// Default timeout for one provider call (generation runs take minutes).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Retry behavior for a generation call, applied per provider.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per provider; at least 1.
    pub max_attempts: u32,
    /// Base delay for the backoff curve.
    pub backoff_base: Duration,
    /// Cap applied to every delay, including Retry-After hints.
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (0-based).
    ///
    /// A provider-supplied Retry-After hint takes precedence over the
    /// backoff curve, capped at `backoff_max`.
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        match retry_after_secs {
            Some(secs) => Duration::from_secs(secs).min(self.backoff_max),
            None => calculate_backoff(attempt, self.backoff_base, self.backoff_max),
        }
    }
}

/// Exponential backoff: `min(base * 2^attempt + addend, max)`.
///
/// The addend is half the base (capped at 500ms) and is deterministic, so
/// a fixed attempt sequence always waits the same total time.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponential = base.saturating_mul(2u32.saturating_pow(attempt));
    let addend_ms = (base.as_millis() as u64).min(1000);
    let addend = Duration::from_millis(addend_ms / 2);
    exponential.saturating_add(addend).min(max)
}

/// Parse a Retry-After header value into seconds.
///
/// Only the integer-seconds form is handled; HTTP-date values and missing
/// headers yield `None`.
pub fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}
