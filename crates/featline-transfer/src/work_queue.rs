//! Lock-free work queue for distributing batch members across workers

use std::sync::atomic::{AtomicUsize, Ordering};

/// Borrowing queue over a slice; workers call [`next()`](WorkQueue::next) to
/// atomically claim the next item. Each item is handed out at most once.
pub struct WorkQueue<'a, S> {
    items: &'a [S],
    cursor: AtomicUsize,
}

impl<'a, S> WorkQueue<'a, S> {
    pub fn new(items: &'a [S]) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Claim the next item (lock-free)
    pub fn next(&self) -> Option<&'a S> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i)
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Number of items handed out so far
    pub fn claimed(&self) -> usize {
        self.cursor.load(Ordering::Relaxed).min(self.items.len())
    }
}
