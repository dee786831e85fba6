//! Job-scoped cancellation via a shared atomic flag

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity of cancellable sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// Cancellation flag shared by every worker of one job.
///
/// Cloning shares the flag. The CLI hands [`flag()`](CancelToken::flag) to
/// `signal_hook::flag::register` so SIGINT/SIGTERM cancel the running job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Underlying flag, for signal handler registration
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `false` if the job was cancelled before the sleep finished.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}
