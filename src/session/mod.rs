//! Per-session facade over planmentor.
//!
//! A [`Session`] receives the engine's lifecycle, planning and execution
//! events for one client connection and routes them to the session-local
//! registry and drift corrector, to the shared policy engine, and through the
//! generation clock's lazy resync.

pub mod registry;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::context::MentorContext;
use crate::drift::{DriftCorrector, DriftVerdict};
use crate::hooks::{PlanChain, PlanInterceptor, PlanNext, PlanRequest, PlanSources, Planner};
use crate::primitives::concurrency::{NestingLevel, SessionGeneration};
use crate::store::EntryLimits;
use crate::types::{ExecSample, Fingerprint, MentorError, Result, StatementHandle};

pub use registry::LocalRegistry;

/// What a deallocate event releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deallocate {
    /// One prepared handle.
    One {
        /// Fingerprint the handle was prepared for.
        fingerprint: Fingerprint,
        /// Released handle.
        handle: StatementHandle,
    },
    /// Every handle of the session.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    Unarmed,
    Armed,
    Done,
}

/// Event sink for one client session.
///
/// Dropping the session runs its teardown (deallocate all) if [`close`]
/// has not done so already.
///
/// [`close`]: Session::close
pub struct Session {
    ctx: Arc<MentorContext>,
    registry: LocalRegistry,
    drift: DriftCorrector,
    generation: SessionGeneration,
    nesting: NestingLevel,
    teardown: Teardown,
}

impl Session {
    /// Attaches a new session to `ctx`.
    pub fn new(ctx: Arc<MentorContext>) -> Self {
        Self {
            ctx,
            registry: LocalRegistry::new(),
            drift: DriftCorrector::new(),
            generation: SessionGeneration::new(),
            nesting: NestingLevel::new(),
            teardown: Teardown::Unarmed,
        }
    }

    /// Shared context of the session.
    pub fn context(&self) -> &Arc<MentorContext> {
        &self.ctx
    }

    /// Handles held per fingerprint.
    pub fn registry(&self) -> &LocalRegistry {
        &self.registry
    }

    /// Drift corrector state.
    pub fn drift(&self) -> &DriftCorrector {
        &self.drift
    }

    /// Generation of the last completed resync (0 = never synced).
    pub fn last_seen_generation(&self) -> u64 {
        self.generation.last_seen()
    }

    /// Planner/executor nesting depth.
    pub fn nesting(&self) -> &NestingLevel {
        &self.nesting
    }

    /// True once teardown ran.
    pub fn is_closed(&self) -> bool {
        self.teardown == Teardown::Done
    }

    /// Registers a new prepared handle and returns the shared refcount.
    ///
    /// Untracked fingerprints are ignored. If the shared store cannot hold the
    /// fingerprint the error is returned and nothing is registered locally.
    pub fn on_prepare(&mut self, fp: Fingerprint, handle: StatementHandle) -> Result<u32> {
        if !fp.is_trackable() {
            return Ok(0);
        }
        let limits = EntryLimits::from(&self.ctx.settings().snapshot());
        let refcount = match self.ctx.store().get_or_create(fp, limits) {
            Ok((mut entry, _)) => entry.retain(1),
            Err(err) => {
                warn!(fingerprint = %fp, error = %err, "prepare not tracked");
                return Err(err);
            }
        };
        let local = self.registry.increment(fp);
        self.drift.on_prepare(fp, handle);
        if self.teardown != Teardown::Armed {
            self.teardown = Teardown::Armed;
            debug!("session teardown armed");
        }
        debug!(fingerprint = %fp, handle = %handle, refcount, local, "statement prepared");
        Ok(refcount)
    }

    /// Releases one handle or every handle of the session.
    ///
    /// Returns how many shared references were dropped. Bookkeeping mismatches
    /// are logged and skipped.
    pub fn on_deallocate(&mut self, target: Deallocate) -> u32 {
        match target {
            Deallocate::All => self.deallocate_all(),
            Deallocate::One { fingerprint, handle } => {
                if !fingerprint.is_trackable() {
                    return 0;
                }
                self.drift.on_deallocate(fingerprint, handle);
                match self.registry.decrement(fingerprint) {
                    Some(_) => {
                        self.release_shared(fingerprint, 1);
                        1
                    }
                    None => {
                        let err = MentorError::InconsistentState(format!(
                            "fingerprint {fingerprint} is not prepared in this session"
                        ));
                        warn!(error = %err, handle = %handle, "deallocate ignored");
                        0
                    }
                }
            }
        }
    }

    fn deallocate_all(&mut self) -> u32 {
        let mut released = 0;
        for (fp, count) in self.registry.drain() {
            self.release_shared(fp, count);
            released += count;
        }
        self.drift.clear();
        debug!(released, "all statements deallocated");
        released
    }

    fn release_shared(&self, fp: Fingerprint, count: u32) {
        let settings = self.ctx.settings().snapshot();
        let Some(mut entry) = self.ctx.store().find_exclusive(fp) else {
            let err = MentorError::InconsistentState(format!(
                "no shared entry for locally prepared fingerprint {fp}"
            ));
            warn!(error = %err, "release skipped");
            return;
        };
        let left = match entry.release(count) {
            Ok(left) => left,
            Err(err) => {
                warn!(error = %err, "refcount clamped");
                0
            }
        };
        drop(entry);
        if left == 0 && !settings.retain_released_entries {
            self.ctx.store().remove_if_released(fp);
        }
    }

    /// Pushes the shared modes onto this session's plans if the generation
    /// moved since the last sync. Returns the number of handles updated.
    pub fn resync(&mut self, sources: &mut dyn PlanSources) -> usize {
        let Some(observed) = self.generation.pending(self.ctx.clock()) else {
            return 0;
        };
        let policy = self.ctx.policy();
        let mut applied = 0;
        for (handle, fp) in sources.handles() {
            if !fp.is_trackable() {
                continue;
            }
            let Some(mode) = policy.mode_of(fp) else {
                continue;
            };
            let current = sources.cached_costs(handle).map(|c| c.mode);
            if current != Some(mode) && sources.apply_mode(handle, mode) {
                applied += 1;
            }
        }
        self.generation.advance(observed);
        debug!(generation = observed, applied, "session resynced");
        applied
    }

    /// Top-level planning is about to start: resync, then let the drift
    /// corrector check the cost estimates. `None` when nested.
    pub fn on_plan_start(&mut self, fp: Fingerprint, sources: &mut dyn PlanSources) -> Option<DriftVerdict> {
        if !self.nesting.is_top_level() {
            return None;
        }
        self.resync(sources);
        if !fp.is_trackable() {
            return Some(DriftVerdict::Untracked);
        }
        let settings = self.ctx.settings().snapshot();
        Some(self.drift.decide(fp, sources, &settings))
    }

    /// Top-level planning of a locally prepared fingerprint finished.
    pub fn on_plan_end(&mut self, fp: Fingerprint, duration_ms: f64) -> bool {
        if !self.nesting.is_top_level() || !self.registry.contains(fp) {
            return false;
        }
        let settings = self.ctx.settings().snapshot();
        self.ctx.policy().record_plan_time(fp, duration_ms);
        self.drift.record_plan(fp, duration_ms, &settings);
        true
    }

    /// A top-level execution of a locally prepared fingerprint finished.
    pub fn on_execute_end(&mut self, fp: Fingerprint, sample: ExecSample, was_generic: bool) -> bool {
        if !self.nesting.is_top_level() || !self.registry.contains(fp) {
            return false;
        }
        let settings = self.ctx.settings().snapshot();
        let shared = self.ctx.policy().record_execution(fp, sample);
        let local = self.drift.record_execution(fp, sample, was_generic, &settings);
        shared || local
    }

    /// Runs `f` one nesting level deeper, e.g. the executor's run and finish
    /// phases, so statements it issues are not metered.
    pub fn run_nested<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.nesting.enter();
        f()
    }

    /// Plans through `chain` with this session as the outermost interceptor.
    pub fn plan<P: Planner>(
        &mut self,
        chain: &mut PlanChain<P>,
        req: &mut PlanRequest<'_>,
    ) -> std::result::Result<P::Plan, P::Error> {
        chain.run_with(self, req)
    }

    /// Runs teardown (deallocate all). Later calls return 0 unless new
    /// statements were prepared since.
    pub fn close(&mut self) -> u32 {
        if self.teardown != Teardown::Armed {
            self.teardown = Teardown::Done;
            return 0;
        }
        self.teardown = Teardown::Done;
        self.deallocate_all()
    }
}

impl<P: Planner> PlanInterceptor<P> for Session {
    fn plan(
        &mut self,
        req: &mut PlanRequest<'_>,
        next: PlanNext<'_, P>,
    ) -> std::result::Result<P::Plan, P::Error> {
        let fp = req.fingerprint;
        let top_level = self.nesting.is_top_level();
        if top_level {
            self.on_plan_start(fp, &mut *req.sources);
        }
        let started = Instant::now();
        let result = {
            let _guard = self.nesting.enter();
            next.run(req)
        };
        if top_level && result.is_ok() {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            self.on_plan_end(fp, elapsed_ms);
        }
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
