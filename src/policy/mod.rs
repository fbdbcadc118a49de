//! Shared policy engine.
//!
//! Stateless logic over the [`SharedStore`]: execution samples flow into the
//! per-fingerprint ring buffers, and the reconsideration pass promotes or
//! demotes enforced plan modes from those statistics. Every operation that can
//! change a mode bumps the [`GenerationClock`] once, after all entry locks are
//! released.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{MentorSettings, PolicyThresholds, SettingsHandle};
use crate::primitives::concurrency::GenerationClock;
use crate::store::{EntryLimits, SharedEntry, SharedStore};
use crate::types::{ExecSample, Fingerprint, MentorError, PlanMode, Result};

/// Reconsideration rule that fired for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// `AUTO`, stable I/O, execution cheaper than planning: use the generic plan.
    StableAuto,
    /// `FORCE_GENERIC` whose I/O grew past the baseline: go custom.
    GenericRegressed,
    /// `AUTO`, skewed I/O, execution dearer than planning: go custom.
    SkewedAuto,
    /// `FORCE_CUSTOM` that no longer pays for its planning: go generic.
    CustomNoLongerPays,
}

impl Rule {
    /// Mode the rule switches to.
    pub fn target(self) -> PlanMode {
        match self {
            Rule::StableAuto | Rule::CustomNoLongerPays => PlanMode::ForceGeneric,
            Rule::GenericRegressed | Rule::SkewedAuto => PlanMode::ForceCustom,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rule::StableAuto => "stable_auto",
            Rule::GenericRegressed => "generic_regressed",
            Rule::SkewedAuto => "skewed_auto",
            Rule::CustomNoLongerPays => "custom_no_longer_pays",
        };
        f.write_str(name)
    }
}

/// Picks the first matching reconsideration rule for `entry`, if any.
///
/// Entries that are fixed, have fewer than two samples, a non-positive mean
/// I/O cost, or no recorded planning time are never eligible.
pub fn evaluate(entry: &SharedEntry, t: &PolicyThresholds) -> Option<Rule> {
    if entry.fixed || entry.ring.len() < 2 {
        return None;
    }
    let avg_io = entry.ring.avg_io_cost();
    let cv = entry.ring.io_cost_cv()?;
    let plan_ms = entry.last_plan_time_ms?;
    let exec_ms = entry.ring.avg_exec_time_ms();
    let stable = cv <= t.generic_cv_max;

    match (entry.mode, entry.ref_exec_time_ms) {
        (PlanMode::Auto, None) if exec_ms < plan_ms && stable => Some(Rule::StableAuto),
        (PlanMode::ForceGeneric, Some(_))
            if exec_ms < plan_ms * t.plan_time_factor
                && entry
                    .ref_io_cost
                    .is_some_and(|r| avg_io / r > t.io_regression_ratio) =>
        {
            Some(Rule::GenericRegressed)
        }
        (PlanMode::Auto, None) if exec_ms > plan_ms && cv > t.custom_cv_min => Some(Rule::SkewedAuto),
        (PlanMode::ForceCustom, Some(_))
            if stable
                && (exec_ms < plan_ms * t.plan_time_factor
                    || entry
                        .ref_io_cost
                        .map_or(true, |r| r / avg_io < t.io_recovery_ratio)) =>
        {
            Some(Rule::CustomNoLongerPays)
        }
        _ => None,
    }
}

/// Totals of one reconsideration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconsiderReport {
    /// Entries switched to `FORCE_GENERIC`.
    pub promoted_generic: usize,
    /// Entries switched to `FORCE_CUSTOM`.
    pub promoted_custom: usize,
    /// Every other visited entry, skipped ones included.
    pub unchanged: usize,
    /// Generation published by the pass, if it changed anything.
    pub generation: Option<u64>,
}

impl ReconsiderReport {
    /// Entries whose mode changed.
    pub fn changed(&self) -> usize {
        self.promoted_generic + self.promoted_custom
    }
}

/// Borrowed view over the shared state that implements the global engine.
#[derive(Clone, Copy)]
pub struct PolicyEngine<'a> {
    store: &'a SharedStore,
    clock: &'a GenerationClock,
    settings: &'a SettingsHandle,
}

impl<'a> PolicyEngine<'a> {
    /// Binds the engine to a store, clock and settings.
    pub fn new(store: &'a SharedStore, clock: &'a GenerationClock, settings: &'a SettingsHandle) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    fn limits(&self) -> (MentorSettings, EntryLimits) {
        let settings = self.settings.snapshot();
        let limits = EntryLimits::from(&settings);
        (settings, limits)
    }

    /// Appends a sample to the ring buffer of an existing entry.
    ///
    /// Returns false when `fp` is untracked or has no shared entry.
    pub fn record_execution(&self, fp: Fingerprint, sample: ExecSample) -> bool {
        if !fp.is_trackable() {
            return false;
        }
        match self.store.find_exclusive(fp) {
            Some(mut entry) => {
                entry.record(sample);
                true
            }
            None => {
                debug!(fingerprint = %fp, "no shared entry, execution sample dropped");
                false
            }
        }
    }

    /// Stores the latest planning duration of an existing entry.
    pub fn record_plan_time(&self, fp: Fingerprint, duration_ms: f64) -> bool {
        if !fp.is_trackable() {
            return false;
        }
        match self.store.find_exclusive(fp) {
            Some(mut entry) => {
                entry.last_plan_time_ms = Some(duration_ms);
                true
            }
            None => false,
        }
    }

    /// Current enforced mode of `fp`.
    pub fn mode_of(&self, fp: Fingerprint) -> Option<PlanMode> {
        self.store.find_exclusive(fp).map(|entry| entry.mode)
    }

    /// Runs the reconsideration heuristic over every entry.
    pub fn reconsider(&self) -> ReconsiderReport {
        let thresholds = self.settings.snapshot().thresholds;
        let mut report = ReconsiderReport::default();
        let visited = self.store.for_each_exclusive(|entry| {
            let Some(rule) = evaluate(entry, &thresholds) else {
                return;
            };
            let from = entry.mode;
            entry.mode = rule.target();
            entry.capture_reference(None, None);
            match entry.mode {
                PlanMode::ForceGeneric => report.promoted_generic += 1,
                _ => report.promoted_custom += 1,
            }
            info!(
                fingerprint = %entry.fingerprint,
                rule = %rule,
                from = %from,
                to = %entry.mode,
                ref_io_cost = entry.ref_io_cost,
                "plan mode reconsidered"
            );
        });
        report.unchanged = visited - report.changed();
        if report.changed() > 0 {
            report.generation = Some(self.clock.bump());
        }
        info!(
            promoted_generic = report.promoted_generic,
            promoted_custom = report.promoted_custom,
            unchanged = report.unchanged,
            "reconsideration finished"
        );
        report
    }

    /// Forces the mode of `fp`, creating the entry if needed.
    ///
    /// Missing or non-positive references fall back to the current averages.
    /// Returns `Ok(false)` without waiting if another holder has the entry.
    pub fn set_mode(
        &self,
        fp: Fingerprint,
        mode: PlanMode,
        ref_exec_time_ms: Option<f64>,
        ref_io_cost: Option<f64>,
        fixed: bool,
    ) -> Result<bool> {
        let (_, limits) = self.limits();
        let Some((mut entry, created)) = self.store.try_get_or_create(fp, limits)? else {
            debug!(fingerprint = %fp, "entry busy, mode change not applied");
            return Ok(false);
        };
        let given = |v: Option<f64>| v.is_some_and(|v| v > 0.0);
        if fixed && !entry.has_executed() && !(given(ref_exec_time_ms) && given(ref_io_cost)) {
            drop(entry);
            if created {
                // a rejected call leaves no entry behind
                self.store.remove_if_released(fp);
            }
            return Err(MentorError::InvalidArgument(format!(
                "reference data is required to fix the mode of never executed fingerprint {fp}"
            )));
        }
        let from = entry.mode;
        entry.mode = mode;
        entry.fixed = fixed;
        entry.capture_reference(ref_exec_time_ms, ref_io_cost);
        info!(
            fingerprint = %fp,
            from = %from,
            to = %mode,
            fixed,
            created,
            "plan mode set"
        );
        drop(entry);
        self.clock.bump();
        Ok(true)
    }

    /// Returns every entry to `AUTO`, unfixed, with cleared statistics.
    pub fn reset(&self) -> usize {
        let (settings, _) = self.limits();
        let mut mode_changed = false;
        let count = self.store.for_each_exclusive(|entry| {
            mode_changed |= entry.mode != PlanMode::Auto;
            entry.reset(settings.ring_capacity);
        });
        if mode_changed {
            self.clock.bump();
        }
        info!(entries = count, "shared entries reset");
        count
    }

    /// Copies entries, optionally only those in `mode`, ordered by fingerprint.
    pub fn entries(&self, mode: Option<PlanMode>) -> Vec<SharedEntry> {
        let mut rows = self
            .store
            .scan(|entry| mode.map_or(true, |m| entry.mode == m));
        rows.sort_by_key(|entry| entry.fingerprint);
        rows
    }
}
