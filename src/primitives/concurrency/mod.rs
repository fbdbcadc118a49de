//! Lock-free invalidation clock and scoped reentrancy tracking.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

/// Process-wide counter bumped whenever an enforced plan mode may have changed.
///
/// Sessions compare their [`SessionGeneration`] against it before planning and
/// resync lazily, so no notification channel is needed.
#[derive(Debug)]
pub struct GenerationClock {
    current: AtomicU64,
}

impl Default for GenerationClock {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationClock {
    /// Starts at generation 1; sessions start at 0 and therefore sync once.
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(1),
        }
    }

    /// Reads the current generation.
    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Advances the generation and returns the new value.
    pub fn bump(&self) -> u64 {
        let next = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(generation = next, "generation bumped");
        next
    }
}

/// Last generation a session synchronized against.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionGeneration {
    last_seen: u64,
}

impl SessionGeneration {
    /// A session that never synced.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation observed by the last completed resync (0 = never).
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Returns the clock value to sync against if this session is behind.
    pub fn pending(&self, clock: &GenerationClock) -> Option<u64> {
        let observed = clock.current();
        (observed != self.last_seen).then_some(observed)
    }

    /// Records that a resync against `observed` completed. Never moves backwards.
    pub fn advance(&mut self, observed: u64) {
        if observed > self.last_seen {
            self.last_seen = observed;
        }
    }
}

/// Depth of planner/executor calls currently on this session's stack.
///
/// Only top-level (depth 0) events are metered; statements run from inside
/// another statement are ignored. Clones share the same counter, so engine
/// wrappers can hold one while the session keeps handling events.
#[derive(Debug, Default, Clone)]
pub struct NestingLevel {
    depth: Arc<AtomicU32>,
}

impl NestingLevel {
    /// Starts at depth 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current depth.
    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Relaxed)
    }

    /// True outside any wrapped call.
    pub fn is_top_level(&self) -> bool {
        self.depth() == 0
    }

    /// Increments the depth until the returned guard drops.
    pub fn enter(&self) -> NestingGuard<'_> {
        self.depth.fetch_add(1, Ordering::Relaxed);
        NestingGuard { level: self }
    }
}

/// Restores the nesting depth on every exit path, unwinding included.
#[must_use = "the depth is restored as soon as the guard is dropped"]
pub struct NestingGuard<'a> {
    level: &'a NestingLevel,
}

impl Drop for NestingGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .level
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)));
    }
}
