#![allow(missing_docs)]

use std::sync::Arc;

use planmentor::admin::{self, SetModeOptions};
use planmentor::hooks::{MemoryPlanSources, PlanChain, PlanRequest, Planner};
use planmentor::{
    Deallocate, ExecSample, Fingerprint, MentorContext, MentorSettings, PlanMode, Session,
};

const F: Fingerprint = Fingerprint(0xF00D);

struct EnginePlanner {
    calls: u32,
    fail: bool,
}

impl Planner for EnginePlanner {
    type Plan = Fingerprint;
    type Error = String;

    fn plan(&mut self, req: &mut PlanRequest<'_>) -> Result<Fingerprint, String> {
        self.calls += 1;
        if self.fail {
            return Err(format!("cannot plan {}", req.fingerprint));
        }
        Ok(req.fingerprint)
    }
}

fn context() -> Arc<MentorContext> {
    Arc::new(MentorContext::new(MentorSettings::default()).unwrap())
}

fn refcount(ctx: &MentorContext, fp: Fingerprint) -> u32 {
    ctx.store().find_exclusive(fp).map(|e| e.refcount).unwrap_or(0)
}

fn prepare(session: &mut Session, sources: &mut MemoryPlanSources, name: &str, fp: Fingerprint) {
    let (handle, _) = sources.prepare(name, fp);
    session.on_prepare(fp, handle).unwrap();
}

fn deallocate(session: &mut Session, sources: &mut MemoryPlanSources, name: &str) {
    let (handle, fingerprint) = sources.deallocate(name).unwrap();
    session.on_deallocate(Deallocate::One { fingerprint, handle });
}

#[test]
fn two_statement_names_share_one_entry() {
    let ctx = context();
    let mut session = ctx.open_session();
    let mut sources = MemoryPlanSources::new();
    prepare(&mut session, &mut sources, "q1", F);
    prepare(&mut session, &mut sources, "q2", F);
    assert_eq!(refcount(&ctx, F), 2);

    deallocate(&mut session, &mut sources, "q1");
    assert_eq!(refcount(&ctx, F), 1);
    let drift = session.drift().entry(F).expect("drift entry survives");
    assert_eq!(drift.handles().count(), 1);
}

#[test]
fn deallocate_all_releases_exactly_the_local_count() {
    let ctx = context();
    let mut other = ctx.open_session();
    let mut other_sources = MemoryPlanSources::new();
    prepare(&mut other, &mut other_sources, "q", F);

    let mut session = ctx.open_session();
    let mut sources = MemoryPlanSources::new();
    prepare(&mut session, &mut sources, "a", F);
    prepare(&mut session, &mut sources, "b", F);
    assert_eq!(refcount(&ctx, F), 3);

    sources.deallocate_all();
    assert_eq!(session.on_deallocate(Deallocate::All), 2);
    assert!(session.registry().is_empty());
    assert_eq!(refcount(&ctx, F), 1);
}

#[test]
fn abrupt_disconnect_still_releases() {
    let ctx = context();
    {
        let mut session = ctx.open_session();
        let mut sources = MemoryPlanSources::new();
        prepare(&mut session, &mut sources, "q", F);
        prepare(&mut session, &mut sources, "r", Fingerprint(2));
    }
    assert_eq!(refcount(&ctx, F), 0);
    assert_eq!(refcount(&ctx, Fingerprint(2)), 0);
    // learned history is retained by default
    assert_eq!(ctx.store().len(), 2);
}

#[test]
fn planning_resyncs_and_records_plan_time() {
    let ctx = context();
    let mut session = ctx.open_session();
    let mut sources = MemoryPlanSources::new();
    prepare(&mut session, &mut sources, "q", F);
    admin::set_mode(&ctx, F, PlanMode::ForceGeneric, &SetModeOptions::default()).unwrap();

    let mut chain = PlanChain::new(EnginePlanner { calls: 0, fail: false });
    let mut req = PlanRequest::new(F, &mut sources);
    assert_eq!(session.plan(&mut chain, &mut req), Ok(F));
    assert_eq!(chain.terminal().calls, 1);
    assert_eq!(session.last_seen_generation(), ctx.clock().current());

    let (handle, _) = sources.lookup("q").unwrap();
    assert_eq!(sources.mode(handle), Some(PlanMode::ForceGeneric));
    let entry = ctx.store().find_exclusive(F).unwrap();
    assert!(entry.last_plan_time_ms.is_some());
    drop(entry);
    assert_eq!(session.drift().entry(F).unwrap().plan_samples, 1);
}

#[test]
fn planner_errors_pass_through_and_restore_nesting() {
    let ctx = context();
    let mut session = ctx.open_session();
    let mut sources = MemoryPlanSources::new();
    prepare(&mut session, &mut sources, "q", F);

    let mut chain = PlanChain::new(EnginePlanner { calls: 0, fail: true });
    let mut req = PlanRequest::new(F, &mut sources);
    let err = session.plan(&mut chain, &mut req).unwrap_err();
    assert!(err.contains("cannot plan"));
    assert!(session.nesting().is_top_level());
    assert_eq!(ctx.store().find_exclusive(F).unwrap().last_plan_time_ms, None);

    // the session keeps metering after the failure
    assert!(session.on_execute_end(F, ExecSample::new(5, 0.5), false));
}

#[test]
fn executions_of_unprepared_fingerprints_are_dropped() {
    let ctx = context();
    let mut session = ctx.open_session();
    assert!(!session.on_execute_end(Fingerprint(404), ExecSample::new(1, 1.0), true));
    assert!(ctx.store().is_empty());
}

#[test]
fn executions_from_sessions_that_never_prepared_are_dropped() {
    let ctx = context();
    let fp = Fingerprint(9);
    let mut owner = ctx.open_session();
    let mut owner_sources = MemoryPlanSources::new();
    prepare(&mut owner, &mut owner_sources, "q", fp);

    let mut stranger = ctx.open_session();
    assert!(!stranger.on_execute_end(fp, ExecSample::new(1_000_000, 90.0), false));
    assert_eq!(ctx.store().find_exclusive(fp).unwrap().ring.len(), 0);

    assert!(owner.on_execute_end(fp, ExecSample::new(10, 1.0), false));
    let entry = ctx.store().find_exclusive(fp).unwrap();
    assert_eq!(entry.ring.len(), 1);
    assert_eq!(entry.ring.avg_io_cost(), 10.0);
}

#[test]
fn store_capacity_is_reported_to_the_caller() {
    let ctx = Arc::new(
        MentorContext::new(MentorSettings {
            max_entries: 1,
            ..MentorSettings::default()
        })
        .unwrap(),
    );
    let mut session = ctx.open_session();
    let mut sources = MemoryPlanSources::new();
    prepare(&mut session, &mut sources, "a", Fingerprint(1));
    let (handle, _) = sources.prepare("b", Fingerprint(2));
    let err = session.on_prepare(Fingerprint(2), handle).unwrap_err();
    assert!(matches!(err, planmentor::MentorError::ResourceExhausted { capacity: 1 }));
    assert!(!session.registry().contains(Fingerprint(2)));
    // the session carries on with what it has
    assert!(session.on_execute_end(Fingerprint(1), ExecSample::new(3, 0.3), true));
}

#[test]
fn ring_capacity_change_applies_to_new_and_reset_entries() {
    let ctx = context();
    let mut session = ctx.open_session();
    let mut sources = MemoryPlanSources::new();
    prepare(&mut session, &mut sources, "old", Fingerprint(1));
    ctx.settings().update(|s| s.ring_capacity = 3).unwrap();
    prepare(&mut session, &mut sources, "new", Fingerprint(2));

    assert_eq!(ctx.store().find_exclusive(Fingerprint(1)).unwrap().ring.capacity(), 10);
    assert_eq!(ctx.store().find_exclusive(Fingerprint(2)).unwrap().ring.capacity(), 3);
    admin::reset(&ctx);
    assert_eq!(ctx.store().find_exclusive(Fingerprint(1)).unwrap().ring.capacity(), 3);
}
