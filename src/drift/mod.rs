//! Per-session drift corrector.
//!
//! Watches how generic and custom executions of a locally prepared fingerprint
//! actually perform and compares that with the planner's own cost estimates.
//! When the estimates point the wrong way the planner's cost accumulators are
//! zeroed so the next plans rebuild them from fresh evidence. The enforced
//! plan mode is never touched here.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, trace};

use crate::config::{MentorSettings, PolicyThresholds};
use crate::hooks::PlanSources;
use crate::types::{ExecSample, Fingerprint, StatementHandle};

/// Local metering state for one fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriftEntry {
    /// Executions that used the cached generic plan.
    pub generic_samples: u32,
    /// Executions that used a custom plan.
    pub custom_samples: u32,
    /// Planning calls measured.
    pub plan_samples: u32,
    /// Sum of generic-plan I/O costs.
    pub total_generic_io_cost: f64,
    /// Sum of generic-plan execution times.
    pub total_generic_exec_time_ms: f64,
    /// Sum of custom-plan I/O costs.
    pub total_custom_io_cost: f64,
    /// Sum of custom-plan execution times.
    pub total_custom_exec_time_ms: f64,
    /// Sum of planning times.
    pub total_plan_time_ms: f64,
    /// Number of cost-model resets triggered for this fingerprint.
    pub attempts: i32,
    handles: BTreeSet<StatementHandle>,
}

/// Averages derived from a [`DriftEntry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftAverages {
    /// Mean generic-plan I/O cost.
    pub generic_io: f64,
    /// Mean custom-plan I/O cost.
    pub custom_io: f64,
    /// Mean generic-plan execution time.
    pub generic_exec_ms: f64,
    /// Mean custom-plan execution time.
    pub custom_exec_ms: f64,
    /// Mean planning time, zero before any plan was measured.
    pub plan_ms: f64,
}

impl DriftAverages {
    /// `plan_ms / custom_exec_ms`; zero if custom executions took no time.
    pub fn plan_weight(&self) -> f64 {
        if self.custom_exec_ms > 0.0 {
            self.plan_ms / self.custom_exec_ms
        } else {
            0.0
        }
    }

    /// Generic plans are cheaper in I/O (with planning overhead folded in) and faster.
    pub fn generic_dominates(&self, t: &PolicyThresholds) -> bool {
        let scale = t.plan_weight_base + self.plan_weight();
        self.generic_io < self.custom_io * scale && self.generic_exec_ms < self.custom_exec_ms
    }

    /// Custom plans are cheaper in I/O (with planning overhead folded in) and faster.
    pub fn custom_dominates(&self, t: &PolicyThresholds) -> bool {
        let scale = t.plan_weight_base + self.plan_weight();
        self.generic_io > self.custom_io * scale && self.generic_exec_ms > self.custom_exec_ms
    }
}

impl DriftEntry {
    fn new() -> Self {
        Self::default()
    }

    /// Statement handles sharing this fingerprint in the session.
    pub fn handles(&self) -> impl Iterator<Item = StatementHandle> + '_ {
        self.handles.iter().copied()
    }

    /// Combined sample count, counted only once both kinds were observed.
    pub fn meterings(&self) -> u32 {
        if self.generic_samples > 0 && self.custom_samples > 0 {
            self.generic_samples + self.custom_samples
        } else {
            0
        }
    }

    /// Averages of the accumulators, once both plan kinds were observed.
    pub fn averages(&self) -> Option<DriftAverages> {
        if self.generic_samples == 0 || self.custom_samples == 0 {
            return None;
        }
        let g = f64::from(self.generic_samples);
        let c = f64::from(self.custom_samples);
        let plan_ms = if self.plan_samples > 0 {
            self.total_plan_time_ms / f64::from(self.plan_samples)
        } else {
            0.0
        };
        Some(DriftAverages {
            generic_io: self.total_generic_io_cost / g,
            custom_io: self.total_custom_io_cost / c,
            generic_exec_ms: self.total_generic_exec_time_ms / g,
            custom_exec_ms: self.total_custom_exec_time_ms / c,
            plan_ms,
        })
    }

    fn reset_meterings(&mut self) {
        self.generic_samples = 0;
        self.custom_samples = 0;
        self.plan_samples = 0;
        self.total_generic_io_cost = 0.0;
        self.total_generic_exec_time_ms = 0.0;
        self.total_custom_io_cost = 0.0;
        self.total_custom_exec_time_ms = 0.0;
        self.total_plan_time_ms = 0.0;
    }
}

/// Outcome of a drift decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftVerdict {
    /// Correction is switched off.
    Disabled,
    /// The fingerprint is not prepared in this session.
    Untracked,
    /// Not enough samples yet.
    Warming {
        /// Combined samples so far.
        samples: u32,
    },
    /// Estimates agree with observations (or no cached plan qualified).
    Consistent,
    /// The planner's cost accumulators were reset for these handles.
    CostsReset {
        /// Handles whose costs were zeroed.
        handles: Vec<StatementHandle>,
    },
}

/// Drift corrector state of one session.
#[derive(Debug, Default)]
pub struct DriftCorrector {
    entries: HashMap<Fingerprint, DriftEntry>,
}

impl DriftCorrector {
    /// No fingerprints tracked.
    pub fn new() -> Self {
        Self::default()
    }

    /// Local state for `fp`.
    pub fn entry(&self, fp: Fingerprint) -> Option<&DriftEntry> {
        self.entries.get(&fp)
    }

    /// True if `fp` is prepared in this session.
    pub fn contains(&self, fp: Fingerprint) -> bool {
        self.entries.contains_key(&fp)
    }

    /// Fingerprints tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Starts tracking `handle` under `fp`.
    pub fn on_prepare(&mut self, fp: Fingerprint, handle: StatementHandle) {
        if !fp.is_trackable() {
            return;
        }
        self.entries
            .entry(fp)
            .or_insert_with(DriftEntry::new)
            .handles
            .insert(handle);
    }

    /// Stops tracking `handle`. The entry goes away with its last handle.
    /// Returns false if `fp` was not tracked.
    pub fn on_deallocate(&mut self, fp: Fingerprint, handle: StatementHandle) -> bool {
        let Some(entry) = self.entries.get_mut(&fp) else {
            return false;
        };
        entry.handles.remove(&handle);
        if entry.handles.is_empty() {
            self.entries.remove(&fp);
        }
        true
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Accumulates one planning duration.
    pub fn record_plan(&mut self, fp: Fingerprint, duration_ms: f64, settings: &MentorSettings) -> bool {
        if !settings.drift_enabled {
            return false;
        }
        let Some(entry) = self.entries.get_mut(&fp) else {
            return false;
        };
        entry.total_plan_time_ms += duration_ms;
        entry.plan_samples += 1;
        true
    }

    /// Accumulates one execution. Accumulators restart first once the combined
    /// count has reached `max_samples`.
    pub fn record_execution(
        &mut self,
        fp: Fingerprint,
        sample: ExecSample,
        was_generic: bool,
        settings: &MentorSettings,
    ) -> bool {
        if !settings.drift_enabled {
            return false;
        }
        let Some(entry) = self.entries.get_mut(&fp) else {
            return false;
        };
        if entry.meterings() >= settings.max_samples {
            debug!(fingerprint = %fp, samples = entry.meterings(), "drift meterings restarted");
            entry.reset_meterings();
        }
        let io = sample.io_cost as f64;
        if was_generic {
            entry.total_generic_io_cost += io;
            entry.total_generic_exec_time_ms += sample.exec_time_ms;
            entry.generic_samples += 1;
        } else {
            entry.total_custom_io_cost += io;
            entry.total_custom_exec_time_ms += sample.exec_time_ms;
            entry.custom_samples += 1;
        }
        true
    }

    /// Compares the planner's estimates for every cached plan of `fp` with the
    /// observed trend and resets the ones that disagree.
    pub fn decide(
        &mut self,
        fp: Fingerprint,
        sources: &mut dyn PlanSources,
        settings: &MentorSettings,
    ) -> DriftVerdict {
        if !settings.drift_enabled {
            return DriftVerdict::Disabled;
        }
        let Some(entry) = self.entries.get_mut(&fp) else {
            return DriftVerdict::Untracked;
        };
        let samples = entry.meterings();
        if samples < settings.min_samples.max(1)
            || entry.generic_samples <= settings.min_samples_per_kind
            || entry.custom_samples <= settings.min_samples_per_kind
        {
            return DriftVerdict::Warming { samples };
        }
        let Some(avgs) = entry.averages() else {
            return DriftVerdict::Warming { samples };
        };
        let t = &settings.thresholds;
        let generic_dominates = avgs.generic_dominates(t);
        let custom_dominates = avgs.custom_dominates(t);

        let handles: Vec<_> = entry.handles.iter().copied().collect();
        let mut reset = Vec::new();
        for handle in handles {
            let Some(costs) = sources.cached_costs(handle) else {
                continue;
            };
            if costs.mode.is_forced()
                || costs.num_custom_plans <= settings.min_custom_plans
                || costs.generic_cost <= 0.0
            {
                continue;
            }
            let Some(avg_custom_cost) = costs.avg_custom_cost() else {
                continue;
            };
            let disagrees = (costs.generic_cost > avg_custom_cost && generic_dominates)
                || (costs.generic_cost < avg_custom_cost && custom_dominates);
            if !disagrees {
                trace!(fingerprint = %fp, handle = %handle, "cost estimates consistent");
                continue;
            }
            entry.attempts += 1;
            if sources.reset_costs(handle) {
                debug!(
                    fingerprint = %fp,
                    handle = %handle,
                    generic_cost = costs.generic_cost,
                    avg_custom_cost,
                    attempts = entry.attempts,
                    "planner cost estimates reset"
                );
                reset.push(handle);
            }
        }
        if reset.is_empty() {
            DriftVerdict::Consistent
        } else {
            DriftVerdict::CostsReset { handles: reset }
        }
    }
}
