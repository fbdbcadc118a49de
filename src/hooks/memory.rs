//! In-memory prepared-statement table.

use std::collections::BTreeMap;

use crate::types::{Fingerprint, PlanMode, StatementHandle};

use super::{CachedCosts, PlanSources};

#[derive(Debug, Clone)]
struct Prepared {
    name: String,
    fingerprint: Fingerprint,
    costs: CachedCosts,
}

/// Prepared statements of one simulated session.
///
/// Stands in for the engine's plan cache in the replay tool and in tests: it
/// hands out statement handles, keeps the planner's cost bookkeeping, and
/// records the cache mode pushed back by a session resync.
#[derive(Debug, Default, Clone)]
pub struct MemoryPlanSources {
    next_handle: u64,
    by_handle: BTreeMap<StatementHandle, Prepared>,
    by_name: BTreeMap<String, StatementHandle>,
}

impl MemoryPlanSources {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of prepared statements.
    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    /// True when nothing is prepared.
    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    /// Prepares `name` for `fingerprint`, replacing any statement of the same
    /// name. Returns the new handle and, if one was replaced, the old one.
    pub fn prepare(
        &mut self,
        name: impl Into<String>,
        fingerprint: Fingerprint,
    ) -> (StatementHandle, Option<(StatementHandle, Fingerprint)>) {
        let name = name.into();
        let replaced = self.deallocate(&name);
        self.next_handle += 1;
        let handle = StatementHandle(self.next_handle);
        self.by_name.insert(name.clone(), handle);
        self.by_handle.insert(
            handle,
            Prepared {
                name,
                fingerprint,
                costs: CachedCosts::default(),
            },
        );
        (handle, replaced)
    }

    /// Handle and fingerprint of a prepared statement.
    pub fn lookup(&self, name: &str) -> Option<(StatementHandle, Fingerprint)> {
        let handle = *self.by_name.get(name)?;
        self.by_handle.get(&handle).map(|p| (handle, p.fingerprint))
    }

    /// Name a handle was prepared under.
    pub fn name_of(&self, handle: StatementHandle) -> Option<&str> {
        self.by_handle.get(&handle).map(|p| p.name.as_str())
    }

    /// Drops one statement.
    pub fn deallocate(&mut self, name: &str) -> Option<(StatementHandle, Fingerprint)> {
        let handle = self.by_name.remove(name)?;
        self.by_handle.remove(&handle).map(|p| (handle, p.fingerprint))
    }

    /// Drops every statement.
    pub fn deallocate_all(&mut self) -> Vec<(StatementHandle, Fingerprint)> {
        self.by_name.clear();
        std::mem::take(&mut self.by_handle)
            .into_iter()
            .map(|(handle, p)| (handle, p.fingerprint))
            .collect()
    }

    /// Overwrites the planner bookkeeping of `handle`, keeping its cache mode.
    pub fn set_costs(&mut self, handle: StatementHandle, costs: CachedCosts) -> bool {
        match self.by_handle.get_mut(&handle) {
            Some(p) => {
                let mode = p.costs.mode;
                p.costs = CachedCosts { mode, ..costs };
                true
            }
            None => false,
        }
    }

    /// Records that the planner built a custom plan of estimated `cost`.
    pub fn note_custom_plan(&mut self, handle: StatementHandle, cost: f64) -> bool {
        self.with_costs(handle, |c| {
            c.total_custom_cost += cost;
            c.num_custom_plans += 1;
        })
    }

    /// Records that the planner used the generic plan of estimated `cost`.
    pub fn note_generic_plan(&mut self, handle: StatementHandle, cost: f64) -> bool {
        self.with_costs(handle, |c| {
            c.generic_cost = cost;
            c.num_generic_plans += 1;
        })
    }

    /// Cache mode currently applied to `handle`.
    pub fn mode(&self, handle: StatementHandle) -> Option<PlanMode> {
        self.by_handle.get(&handle).map(|p| p.costs.mode)
    }

    fn with_costs(&mut self, handle: StatementHandle, edit: impl FnOnce(&mut CachedCosts)) -> bool {
        match self.by_handle.get_mut(&handle) {
            Some(p) => {
                edit(&mut p.costs);
                true
            }
            None => false,
        }
    }
}

impl PlanSources for MemoryPlanSources {
    fn handles(&self) -> Vec<(StatementHandle, Fingerprint)> {
        self.by_handle
            .iter()
            .map(|(handle, p)| (*handle, p.fingerprint))
            .collect()
    }

    fn cached_costs(&self, handle: StatementHandle) -> Option<CachedCosts> {
        self.by_handle.get(&handle).map(|p| p.costs)
    }

    fn reset_costs(&mut self, handle: StatementHandle) -> bool {
        self.with_costs(handle, |c| {
            c.generic_cost = 0.0;
            c.total_custom_cost = 0.0;
            c.num_custom_plans = 0;
            c.num_generic_plans = 0;
        })
    }

    fn apply_mode(&mut self, handle: StatementHandle, mode: PlanMode) -> bool {
        self.with_costs(handle, |c| c.mode = mode)
    }
}
