//! Retry with exponential backoff and jitter for single remote calls

use std::fmt;
use std::time::Duration;

use rand::Rng;

use crate::context::JobContext;
use crate::error::{ErrorKind, RemoteError, RetryDecision};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempt budget per call, the first attempt included
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    fn attempt_budget(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Exponential backoff before retry `n` (1-based): `base * 2^(n-1)`, capped.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff plus uniform jitter in `[0, base)`, capped at `max_delay`.
    pub fn jittered_delay(&self, retry: u32, rng: &mut impl Rng) -> Duration {
        let base_nanos = self.base_delay.as_nanos() as u64;
        let jitter = if base_nanos > 0 {
            Duration::from_nanos(rng.gen_range(0..base_nanos))
        } else {
            Duration::ZERO
        };
        (self.backoff_delay(retry) + jitter).min(self.max_delay)
    }
}

/// Terminal failure of a wrapped call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
}

impl CallFailure {
    fn new(kind: ErrorKind, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts,
        }
    }

    /// Whether this failure should stop the whole job
    pub fn aborts_job(&self) -> bool {
        crate::error::decision_for(self.kind) == RetryDecision::AbortJob
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CallFailure {}

/// Run `attempt_fn` until it succeeds, fails fatally, exhausts the attempt
/// budget, or the job is cancelled.
///
/// Before each attempt, waits out the pool-wide throttle cooldown if it is
/// raised. Throttling errors raise the signal; every other outcome counts
/// toward its decay. `attempt_fn` receives the 1-based attempt number.
pub fn retry_with_backoff<T>(
    label: &str,
    policy: &RetryPolicy,
    ctx: &JobContext,
    mut attempt_fn: impl FnMut(u32) -> Result<T, RemoteError>,
) -> Result<T, CallFailure> {
    let budget = policy.attempt_budget();
    let cancel = ctx.cancel_token();
    let throttle = ctx.throttle();
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(CallFailure::new(ErrorKind::Cancelled, "job cancelled", attempt));
        }
        if let Some(cooldown) = throttle.cooldown() {
            if !cancel.sleep(cooldown) {
                return Err(CallFailure::new(ErrorKind::Cancelled, "job cancelled", attempt));
            }
        }

        attempt += 1;
        let err = match attempt_fn(attempt) {
            Ok(v) => {
                throttle.record_calm();
                return Ok(v);
            }
            Err(e) => e,
        };

        if err.kind == ErrorKind::Throttling {
            throttle.raise();
        } else {
            throttle.record_calm();
        }

        match err.decision() {
            RetryDecision::Retry if attempt < budget => {
                let delay = policy.jittered_delay(attempt, &mut rand::thread_rng());
                log::debug!(
                    "{label}: attempt {attempt}/{budget} failed: {err}, retrying in {}ms",
                    delay.as_millis()
                );
                if !cancel.sleep(delay) {
                    return Err(CallFailure::new(ErrorKind::Cancelled, "job cancelled", attempt));
                }
            }
            RetryDecision::Retry => {
                log::warn!("{label}: giving up after {attempt} attempts: {err}");
                return Err(CallFailure::new(
                    ErrorKind::RetriesExhausted,
                    format!("gave up after {attempt} attempts, last error: {err}"),
                    attempt,
                ));
            }
            RetryDecision::FailRecord | RetryDecision::AbortJob => {
                log::debug!("{label}: failed permanently: {err}");
                return Err(CallFailure::new(err.kind, err.message, attempt));
            }
        }
    }
}
