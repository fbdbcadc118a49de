use serde::Serialize;
use time::format_description::well_known::Rfc3339;

use crate::context::MentorContext;
use crate::store::{RingSnapshot, SharedEntry};
use crate::types::{Fingerprint, PlanMode};

/// One row of [`show_entries`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryRow {
    /// Query fingerprint.
    pub fingerprint: Fingerprint,
    /// Live prepared handles across all sessions.
    pub refcount: u32,
    /// Enforced plan mode.
    pub mode: PlanMode,
    /// Operator lock against reconsideration.
    pub fixed: bool,
    /// Creation time, RFC 3339.
    pub since: String,
    /// Populated ring-buffer slots.
    pub sample_count: usize,
    /// Raw window contents in slot order.
    pub ring: RingSnapshot,
    /// Mean I/O cost over the window.
    pub avg_io_cost: f64,
    /// Mean execution time over the window.
    pub avg_exec_time_ms: f64,
    /// I/O baseline from the last mode change.
    pub ref_io_cost: Option<f64>,
    /// Execution time baseline from the last mode change.
    pub ref_exec_time_ms: Option<f64>,
    /// Most recent planning duration.
    pub last_plan_time_ms: Option<f64>,
}

impl From<&SharedEntry> for EntryRow {
    fn from(entry: &SharedEntry) -> Self {
        Self {
            fingerprint: entry.fingerprint,
            refcount: entry.refcount,
            mode: entry.mode,
            fixed: entry.fixed,
            since: entry
                .since
                .format(&Rfc3339)
                .unwrap_or_else(|_| entry.since.to_string()),
            sample_count: entry.ring.len(),
            ring: entry.ring.snapshot(),
            avg_io_cost: entry.ring.avg_io_cost(),
            avg_exec_time_ms: entry.ring.avg_exec_time_ms(),
            ref_io_cost: entry.ref_io_cost,
            ref_exec_time_ms: entry.ref_exec_time_ms,
            last_plan_time_ms: entry.last_plan_time_ms,
        }
    }
}

/// Lists shared entries ordered by fingerprint, optionally only those in `mode`.
pub fn show_entries(ctx: &MentorContext, mode: Option<PlanMode>) -> Vec<EntryRow> {
    ctx.policy()
        .entries(mode)
        .iter()
        .map(EntryRow::from)
        .collect()
}
