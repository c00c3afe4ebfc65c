//! Non-reentrant section guarding navigation fixup

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Counters describing how fixup bodies were entered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixupStats {
    /// Fixup bodies that ran
    pub entered: u64,
    /// Triggers dropped because a fixup was already running
    pub dropped: u64,
    /// Highest number of fixup bodies active at once
    pub max_depth: u32,
}

/// Held while a fixup body runs; the section is released when it drops,
/// including on unwind
#[must_use = "the section is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SectionGuard {
    depth: Arc<AtomicU32>,
}

impl Drop for SectionGuard {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::Release);
    }
}

/// Latch scoped to one tracking context
///
/// A trigger raised while the latch is held is dropped rather than queued.
/// The guard owns its share of the depth counter, so the context stays
/// mutably borrowable while a body runs.
#[derive(Debug, Default)]
pub struct CriticalSection {
    depth: Arc<AtomicU32>,
    stats: FixupStats,
}

impl CriticalSection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter, or `None` if a fixup is already running
    pub fn try_enter(&mut self) -> Option<SectionGuard> {
        if self
            .depth
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.stats.dropped += 1;
            return None;
        }
        self.stats.entered += 1;
        self.stats.max_depth = self.stats.max_depth.max(1);
        Some(SectionGuard {
            depth: Arc::clone(&self.depth),
        })
    }

    pub fn is_active(&self) -> bool {
        self.depth.load(Ordering::Acquire) > 0
    }

    pub fn stats(&self) -> FixupStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = FixupStats::default();
    }
}
