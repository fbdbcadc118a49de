//! Per-session count of prepared handles by fingerprint.

use std::collections::HashMap;

use crate::types::Fingerprint;

/// Handles this session holds for each fingerprint.
///
/// The sum of these counts across live sessions never exceeds the shared
/// entry's refcount.
#[derive(Debug, Default)]
pub struct LocalRegistry {
    counts: HashMap<Fingerprint, u32>,
}

impl LocalRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles held for `fp`.
    pub fn count(&self, fp: Fingerprint) -> u32 {
        self.counts.get(&fp).copied().unwrap_or(0)
    }

    /// True if `fp` is prepared in this session.
    pub fn contains(&self, fp: Fingerprint) -> bool {
        self.counts.contains_key(&fp)
    }

    /// Distinct fingerprints held.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// True when nothing is held.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Adds one handle and returns the new local count.
    pub fn increment(&mut self, fp: Fingerprint) -> u32 {
        let count = self.counts.entry(fp).or_insert(0);
        *count += 1;
        *count
    }

    /// Removes one handle. Returns the remaining count, or `None` if `fp` was
    /// not registered. The entry disappears when it reaches zero.
    pub fn decrement(&mut self, fp: Fingerprint) -> Option<u32> {
        let count = self.counts.get_mut(&fp)?;
        *count -= 1;
        let left = *count;
        if left == 0 {
            self.counts.remove(&fp);
        }
        Some(left)
    }

    /// Empties the registry, returning each fingerprint with its count.
    pub fn drain(&mut self) -> Vec<(Fingerprint, u32)> {
        let mut out: Vec<_> = self.counts.drain().collect();
        out.sort_unstable_by_key(|(fp, _)| *fp);
        out
    }
}
