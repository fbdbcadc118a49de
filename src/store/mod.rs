//! Shared statistics store.
//!
//! One [`SharedEntry`] per fingerprint, visible to every session attached to
//! the same [`MentorContext`](crate::context::MentorContext). The table is a
//! `DashMap` of per-entry `parking_lot` mutexes: lookups clone the entry's
//! `Arc` out of the map before locking it, so the map shard is never held
//! while an entry lock is awaited and entry-lock holders never touch the map.

pub mod ring;

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};
use time::OffsetDateTime;
use tracing::{debug, trace};

use crate::config::MentorSettings;
use crate::types::{ExecSample, Fingerprint, MentorError, PlanMode, Result};

pub use ring::{RingSnapshot, RingStats};

/// Exclusive access to one entry; the lock is released on drop.
pub type EntryGuard = ArcMutexGuard<RawMutex, SharedEntry>;

type Slot = Arc<Mutex<SharedEntry>>;

/// Durable decision state and rolling statistics for one fingerprint.
#[derive(Debug, Clone)]
pub struct SharedEntry {
    /// Key of the entry.
    pub fingerprint: Fingerprint,
    /// Currently enforced decision.
    pub mode: PlanMode,
    /// Operator lock; reconsideration leaves `mode` alone while set.
    pub fixed: bool,
    /// Live prepared-statement handles across all sessions.
    pub refcount: u32,
    /// Creation time of the entry.
    pub since: OffsetDateTime,
    /// Recent execution samples.
    pub ring: RingStats,
    /// Execution time baseline captured at the last mode change.
    pub ref_exec_time_ms: Option<f64>,
    /// I/O cost baseline captured at the last mode change.
    pub ref_io_cost: Option<f64>,
    /// Most recent planning duration.
    pub last_plan_time_ms: Option<f64>,
    retired: bool,
}

impl SharedEntry {
    /// Fresh entry in `AUTO` mode with an empty window and no references.
    pub fn new(fingerprint: Fingerprint, ring_capacity: usize) -> Self {
        Self {
            fingerprint,
            mode: PlanMode::Auto,
            fixed: false,
            refcount: 0,
            since: OffsetDateTime::now_utc(),
            ring: RingStats::new(ring_capacity),
            ref_exec_time_ms: None,
            ref_io_cost: None,
            last_plan_time_ms: None,
            retired: false,
        }
    }

    /// Appends one execution sample to the rolling window.
    pub fn record(&mut self, sample: ExecSample) {
        self.ring.push(sample);
        trace!(
            fingerprint = %self.fingerprint,
            io_cost = sample.io_cost,
            exec_time_ms = sample.exec_time_ms,
            avg_io_cost = self.ring.avg_io_cost(),
            "recorded execution sample"
        );
    }

    /// True once any execution was recorded into the current window.
    pub fn has_executed(&self) -> bool {
        !self.ring.is_empty()
    }

    /// Stores new baselines; missing or non-positive inputs fall back to the
    /// current window averages, and stay unset if those are not positive either.
    pub fn capture_reference(&mut self, ref_exec_time_ms: Option<f64>, ref_io_cost: Option<f64>) {
        let has_samples = self.has_executed();
        let pick = |given: Option<f64>, avg: f64| -> Option<f64> {
            match given {
                Some(v) if v > 0.0 => Some(v),
                _ if has_samples && avg > 0.0 => Some(avg),
                _ => None,
            }
        };
        self.ref_exec_time_ms = pick(ref_exec_time_ms, self.ring.avg_exec_time_ms());
        self.ref_io_cost = pick(ref_io_cost, self.ring.avg_io_cost());
    }

    /// Returns the entry to `AUTO`, unfixed, with cleared statistics.
    pub fn reset(&mut self, ring_capacity: usize) {
        self.mode = PlanMode::Auto;
        self.fixed = false;
        self.ring.clear(ring_capacity);
        self.ref_exec_time_ms = None;
        self.ref_io_cost = None;
        self.last_plan_time_ms = None;
    }

    /// Adds `count` handles to the shared refcount.
    pub fn retain(&mut self, count: u32) -> u32 {
        self.refcount = self.refcount.saturating_add(count);
        self.refcount
    }

    /// Drops `count` handles, clamping at zero.
    ///
    /// Underflow is reported as [`MentorError::InconsistentState`] after the
    /// counter has been clamped.
    pub fn release(&mut self, count: u32) -> Result<u32> {
        match self.refcount.checked_sub(count) {
            Some(left) => {
                self.refcount = left;
                Ok(left)
            }
            None => {
                let had = self.refcount;
                self.refcount = 0;
                Err(MentorError::InconsistentState(format!(
                    "refcount of {} would drop below zero ({had} - {count})",
                    self.fingerprint
                )))
            }
        }
    }
}

/// Capacity limits applied when entries are created.
#[derive(Debug, Clone, Copy)]
pub struct EntryLimits {
    /// Maximum number of entries in the store.
    pub max_entries: usize,
    /// Window size for newly created entries.
    pub ring_capacity: usize,
}

impl From<&MentorSettings> for EntryLimits {
    fn from(settings: &MentorSettings) -> Self {
        Self {
            max_entries: settings.max_entries,
            ring_capacity: settings.ring_capacity,
        }
    }
}

/// Concurrent fingerprint-keyed table of [`SharedEntry`] values.
#[derive(Debug, Default)]
pub struct SharedStore {
    entries: DashMap<Fingerprint, Slot>,
}

impl SharedStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entry exists.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Locks the entry for `fp`, creating it first if needed.
    ///
    /// Returns the guard and whether this call created the entry.
    pub fn get_or_create(&self, fp: Fingerprint, limits: EntryLimits) -> Result<(EntryGuard, bool)> {
        loop {
            let (slot, created) = self.slot_or_insert(fp, limits)?;
            let guard = slot.lock_arc();
            if !guard.retired {
                return Ok((guard, created));
            }
        }
    }

    /// Like [`get_or_create`](Self::get_or_create) but never waits for the
    /// entry lock. `Ok(None)` means another holder has the entry right now.
    pub fn try_get_or_create(
        &self,
        fp: Fingerprint,
        limits: EntryLimits,
    ) -> Result<Option<(EntryGuard, bool)>> {
        loop {
            let (slot, created) = self.slot_or_insert(fp, limits)?;
            let Some(guard) = slot.try_lock_arc() else {
                return Ok(None);
            };
            if !guard.retired {
                return Ok(Some((guard, created)));
            }
        }
    }

    /// Locks an existing entry.
    pub fn find_exclusive(&self, fp: Fingerprint) -> Option<EntryGuard> {
        let slot = self.slot(fp)?;
        let guard = slot.lock_arc();
        (!guard.retired).then_some(guard)
    }

    /// Copies every entry matching `predicate`, locking one entry at a time.
    pub fn scan<F>(&self, mut predicate: F) -> Vec<SharedEntry>
    where
        F: FnMut(&SharedEntry) -> bool,
    {
        let mut out = Vec::new();
        for slot in self.slots() {
            let guard = slot.lock();
            if !guard.retired && predicate(&*guard) {
                out.push(guard.clone());
            }
        }
        out
    }

    /// Visits every entry under its own lock and returns how many were visited.
    pub fn for_each_exclusive<F>(&self, mut visit: F) -> usize
    where
        F: FnMut(&mut SharedEntry),
    {
        let mut visited = 0;
        for slot in self.slots() {
            let mut guard = slot.lock();
            if guard.retired {
                continue;
            }
            visit(&mut *guard);
            visited += 1;
        }
        visited
    }

    /// Removes the entry for `fp` unconditionally.
    pub fn remove(&self, fp: Fingerprint) -> bool {
        match self.entries.remove(&fp) {
            Some((_, slot)) => {
                slot.lock().retired = true;
                debug!(fingerprint = %fp, "removed shared entry");
                true
            }
            None => false,
        }
    }

    /// Removes the entry for `fp` if it has no live handles and no operator lock.
    ///
    /// Must not be called while holding a guard for `fp`.
    pub fn remove_if_released(&self, fp: Fingerprint) -> bool {
        let removed = self
            .entries
            .remove_if(&fp, |_, slot| {
                let mut entry = slot.lock();
                let idle = entry.refcount == 0 && !entry.fixed;
                if idle {
                    entry.retired = true;
                }
                idle
            })
            .is_some();
        if removed {
            debug!(fingerprint = %fp, "dropped released shared entry");
        }
        removed
    }

    fn slot(&self, fp: Fingerprint) -> Option<Slot> {
        self.entries.get(&fp).map(|slot| Arc::clone(slot.value()))
    }

    fn slot_or_insert(&self, fp: Fingerprint, limits: EntryLimits) -> Result<(Slot, bool)> {
        if !fp.is_trackable() {
            return Err(MentorError::InvalidArgument(
                "fingerprint 0 cannot be stored".into(),
            ));
        }
        if let Some(slot) = self.slot(fp) {
            return Ok((slot, false));
        }
        if self.entries.len() >= limits.max_entries {
            return Err(MentorError::ResourceExhausted {
                capacity: limits.max_entries,
            });
        }
        let mut created = false;
        let slot = Arc::clone(
            self.entries
                .entry(fp)
                .or_insert_with(|| {
                    created = true;
                    Arc::new(Mutex::new(SharedEntry::new(fp, limits.ring_capacity)))
                })
                .value(),
        );
        if created {
            debug!(fingerprint = %fp, "created shared entry");
        }
        Ok((slot, created))
    }

    fn slots(&self) -> Vec<Slot> {
        self.entries
            .iter()
            .map(|slot| Arc::clone(slot.value()))
            .collect()
    }
}
