//! Lock-free work queue for distributing batches across parallel workers

use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free queue handing out batches to workers.
///
/// Workers call [`next()`](WorkQueue::next) to atomically claim the next
/// batch. Claimed batches are never handed out twice, so a worker that stops
/// early (shutdown) simply leaves the rest unclaimed.
pub struct WorkQueue<S> {
    items: Vec<S>,
    cursor: AtomicUsize,
}

impl<S> WorkQueue<S> {
    /// Create queue from all items (no filtering)
    pub fn new(items: Vec<S>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Create queue, keeping only items that still need work (resume support)
    pub fn filtered(items: Vec<S>, keep: impl Fn(&S) -> bool) -> Self {
        let before = items.len();
        let filtered: Vec<S> = items.into_iter().filter(|s| keep(s)).collect();
        log::debug!(
            "{} of {before} batches in work queue ({} already done)",
            filtered.len(),
            before - filtered.len()
        );
        Self::new(filtered)
    }

    /// Claim next batch (lock-free)
    pub fn next(&self) -> Option<&S> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i)
    }

    /// Total batches in queue
    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Batches not yet claimed
    pub fn remaining(&self) -> usize {
        self.items
            .len()
            .saturating_sub(self.cursor.load(Ordering::Relaxed))
    }
}
