//! Pool-wide backpressure signal raised by rate-limit responses

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(500);
pub const DEFAULT_DECAY_AFTER: u32 = 10;

/// Shared throttle flag.
///
/// Raised when any worker sees a throttling error; while raised, every
/// worker waits [`cooldown`](ThrottleSignal::cooldown) before its next call.
/// Lowered again after `decay_after` consecutive non-throttled calls.
#[derive(Debug)]
pub struct ThrottleSignal {
    raised: AtomicBool,
    calm_streak: AtomicU32,
    cooldown: Duration,
    decay_after: u32,
}

impl ThrottleSignal {
    pub fn new(cooldown: Duration, decay_after: u32) -> Self {
        Self {
            raised: AtomicBool::new(false),
            calm_streak: AtomicU32::new(0),
            cooldown,
            decay_after: decay_after.max(1),
        }
    }

    /// A call was throttled
    pub fn raise(&self) {
        self.calm_streak.store(0, Ordering::Relaxed);
        if !self.raised.swap(true, Ordering::AcqRel) {
            log::warn!(
                "Remote is throttling; adding {}ms cooldown between calls",
                self.cooldown.as_millis()
            );
        }
    }

    /// A call completed without throttling
    pub fn record_calm(&self) {
        if !self.raised.load(Ordering::Acquire) {
            return;
        }
        let streak = self.calm_streak.fetch_add(1, Ordering::AcqRel) + 1;
        if streak >= self.decay_after && self.raised.swap(false, Ordering::AcqRel) {
            self.calm_streak.store(0, Ordering::Relaxed);
            log::info!("Throttle lifted after {streak} calm calls");
        }
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Extra delay to insert before the next call, if raised
    pub fn cooldown(&self) -> Option<Duration> {
        self.is_raised().then_some(self.cooldown)
    }
}

impl Default for ThrottleSignal {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN, DEFAULT_DECAY_AFTER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_lowered() {
        let t = ThrottleSignal::default();
        assert!(!t.is_raised());
        assert_eq!(t.cooldown(), None);
    }

    #[test]
    fn raise_sets_cooldown() {
        let t = ThrottleSignal::new(Duration::from_millis(7), 3);
        t.raise();
        assert_eq!(t.cooldown(), Some(Duration::from_millis(7)));
    }

    #[test]
    fn decays_after_consecutive_calm_calls() {
        let t = ThrottleSignal::new(Duration::from_millis(1), 3);
        t.raise();
        t.record_calm();
        t.record_calm();
        assert!(t.is_raised());
        t.record_calm();
        assert!(!t.is_raised());
    }

    #[test]
    fn throttle_resets_streak() {
        let t = ThrottleSignal::new(Duration::from_millis(1), 2);
        t.raise();
        t.record_calm();
        t.raise();
        t.record_calm();
        assert!(t.is_raised());
        t.record_calm();
        assert!(!t.is_raised());
    }

    #[test]
    fn calm_while_lowered_is_noop() {
        let t = ThrottleSignal::new(Duration::from_millis(1), 1);
        t.record_calm();
        t.raise();
        assert!(t.is_raised());
    }
}
