//! Boundary with the host query engine.
//!
//! The engine owns prepared statements and their cached plans. planmentor only
//! ever refers to them by [`StatementHandle`], reading the planner's cost
//! bookkeeping and pushing cache-mode flags back through [`PlanSources`].
//!
//! Planning calls run through an ordered interceptor chain: each
//! [`PlanInterceptor`] receives a [`PlanNext`] it may invoke to continue with
//! the rest of the chain, ending in the engine's terminal [`Planner`].

pub mod memory;

use crate::types::{Fingerprint, PlanMode, StatementHandle};

pub use memory::MemoryPlanSources;

/// Planner-side cost bookkeeping of one cached plan source.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CachedCosts {
    /// Estimated cost of the generic plan, `<= 0` if none was built yet.
    pub generic_cost: f64,
    /// Sum of estimated costs of every custom plan built so far.
    pub total_custom_cost: f64,
    /// Custom plans built so far.
    pub num_custom_plans: u32,
    /// Generic plans used so far.
    pub num_generic_plans: u32,
    /// Cache mode currently applied to the plan source.
    pub mode: PlanMode,
}

impl CachedCosts {
    /// `total_custom_cost / num_custom_plans`, or `None` before any custom plan.
    pub fn avg_custom_cost(&self) -> Option<f64> {
        (self.num_custom_plans > 0).then(|| self.total_custom_cost / f64::from(self.num_custom_plans))
    }
}

/// Prepared statements of one session, as seen by the engine.
pub trait PlanSources {
    /// Every prepared handle of the session with its fingerprint.
    fn handles(&self) -> Vec<(StatementHandle, Fingerprint)>;

    /// Planner bookkeeping for `handle`, if it is still prepared.
    fn cached_costs(&self, handle: StatementHandle) -> Option<CachedCosts>;

    /// Zeroes the planner's cost accumulators so they are rebuilt from fresh
    /// plans. Returns false if the handle is gone.
    fn reset_costs(&mut self, handle: StatementHandle) -> bool;

    /// Applies a cache mode to the plan source. Returns false if the handle is gone.
    fn apply_mode(&mut self, handle: StatementHandle, mode: PlanMode) -> bool;
}

/// One planning call travelling down the chain.
pub struct PlanRequest<'a> {
    /// Fingerprint of the statement being planned; zero if untracked.
    pub fingerprint: Fingerprint,
    /// Prepared statements of the calling session.
    pub sources: &'a mut dyn PlanSources,
}

impl<'a> PlanRequest<'a> {
    /// Builds a request.
    pub fn new(fingerprint: Fingerprint, sources: &'a mut dyn PlanSources) -> Self {
        Self {
            fingerprint,
            sources,
        }
    }
}

/// Terminal handler of the chain: the engine's own planner.
pub trait Planner {
    /// Plan produced by the engine.
    type Plan;
    /// Planning failure, passed through unmodified.
    type Error;

    /// Builds a plan.
    fn plan(&mut self, req: &mut PlanRequest<'_>) -> Result<Self::Plan, Self::Error>;
}

/// Middleware around planning.
pub trait PlanInterceptor<P: Planner> {
    /// Handles `req`, usually by calling `next.run(req)` somewhere inside.
    fn plan(&mut self, req: &mut PlanRequest<'_>, next: PlanNext<'_, P>) -> Result<P::Plan, P::Error>;
}

/// Remainder of the chain after the current interceptor.
pub struct PlanNext<'c, P: Planner> {
    rest: &'c mut [Box<dyn PlanInterceptor<P>>],
    terminal: &'c mut P,
}

impl<'c, P: Planner> PlanNext<'c, P> {
    /// Continues with the next interceptor, or the terminal planner.
    pub fn run(self, req: &mut PlanRequest<'_>) -> Result<P::Plan, P::Error> {
        let PlanNext { rest, terminal } = self;
        match rest.split_first_mut() {
            Some((head, tail)) => head.plan(req, PlanNext { rest: tail, terminal }),
            None => terminal.plan(req),
        }
    }
}

/// Ordered interceptors in front of a terminal planner.
pub struct PlanChain<P: Planner> {
    interceptors: Vec<Box<dyn PlanInterceptor<P>>>,
    terminal: P,
}

impl<P: Planner> PlanChain<P> {
    /// A chain that goes straight to `terminal`.
    pub fn new(terminal: P) -> Self {
        Self {
            interceptors: Vec::new(),
            terminal,
        }
    }

    /// Appends an interceptor; earlier ones run first.
    pub fn with(mut self, interceptor: Box<dyn PlanInterceptor<P>>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Number of interceptors.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// True when planning goes straight to the terminal planner.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Terminal planner.
    pub fn terminal(&self) -> &P {
        &self.terminal
    }

    /// Runs the whole chain.
    pub fn run(&mut self, req: &mut PlanRequest<'_>) -> Result<P::Plan, P::Error> {
        self.next().run(req)
    }

    /// Runs `head` in front of the chain. Used for interceptors that the
    /// caller owns elsewhere, such as a [`Session`](crate::session::Session).
    pub fn run_with(
        &mut self,
        head: &mut dyn PlanInterceptor<P>,
        req: &mut PlanRequest<'_>,
    ) -> Result<P::Plan, P::Error> {
        head.plan(req, self.next())
    }

    fn next(&mut self) -> PlanNext<'_, P> {
        PlanNext {
            rest: self.interceptors.as_mut_slice(),
            terminal: &mut self.terminal,
        }
    }
}
