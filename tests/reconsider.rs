#![allow(missing_docs)]

use std::sync::Arc;

use planmentor::admin::{self, SetModeOptions};
use planmentor::hooks::MemoryPlanSources;
use planmentor::policy::{evaluate, Rule};
use planmentor::{ExecSample, Fingerprint, MentorContext, PlanMode, PolicyThresholds, Session};

const F: Fingerprint = Fingerprint(4242);

fn feed(session: &mut Session, fp: Fingerprint, io: &[i64], exec_ms: f64, plan_ms: f64) {
    session.on_plan_end(fp, plan_ms);
    for &cost in io {
        assert!(session.on_execute_end(fp, ExecSample::new(cost, exec_ms), true));
    }
}

fn prepared(ctx: &Arc<MentorContext>, fps: &[Fingerprint]) -> (Session, MemoryPlanSources) {
    let mut session = ctx.open_session();
    let mut sources = MemoryPlanSources::new();
    for (idx, fp) in fps.iter().enumerate() {
        let (handle, _) = sources.prepare(format!("s{idx}"), *fp);
        session.on_prepare(*fp, handle).unwrap();
    }
    (session, sources)
}

const STABLE: [i64; 10] = [80, 120, 80, 120, 80, 120, 80, 120, 80, 120];

#[test]
fn stable_cheap_query_is_promoted_to_generic() {
    let ctx = Arc::new(MentorContext::default());
    let (mut session, _sources) = prepared(&ctx, &[F]);
    feed(&mut session, F, &STABLE, 5.0, 8.0);

    let before = ctx.clock().current();
    let report = admin::reconsider(&ctx);
    assert_eq!(report.promoted_generic, 1);
    assert_eq!(report.promoted_custom, 0);
    assert_eq!(report.unchanged, 0);
    assert_eq!(ctx.clock().current(), before + 1);

    let row = &admin::show_entries(&ctx, None)[0];
    assert_eq!(row.mode, PlanMode::ForceGeneric);
    assert_eq!(row.ref_io_cost, Some(100.0));
    assert_eq!(row.ref_exec_time_ms, Some(5.0));
}

#[test]
fn one_bump_per_pass_however_many_changes() {
    let ctx = Arc::new(MentorContext::default());
    let fps = [Fingerprint(1), Fingerprint(2), Fingerprint(3), Fingerprint(4)];
    let (mut session, _sources) = prepared(&ctx, &fps);
    feed(&mut session, fps[0], &STABLE, 5.0, 8.0);
    feed(&mut session, fps[1], &STABLE, 5.0, 8.0);
    feed(&mut session, fps[2], &[10, 10, 10, 370], 9.0, 1.0);
    feed(&mut session, fps[3], &[100], 1.0, 1.0);

    let before = ctx.clock().current();
    let report = admin::reconsider(&ctx);
    assert_eq!(report.promoted_generic, 2);
    assert_eq!(report.promoted_custom, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.generation, Some(before + 1));
    assert_eq!(ctx.clock().current(), before + 1);

    let again = admin::reconsider(&ctx);
    assert_eq!(again.changed(), 0);
    assert_eq!(again.unchanged, 4);
    assert_eq!(again.generation, None);
    assert_eq!(ctx.clock().current(), before + 1);
}

#[test]
fn fixed_entries_are_never_reconsidered() {
    let ctx = Arc::new(MentorContext::default());
    let (mut session, _sources) = prepared(&ctx, &[F]);
    feed(&mut session, F, &STABLE, 5.0, 8.0);
    admin::set_mode(&ctx, F, PlanMode::ForceCustom, &SetModeOptions {
        fixed: true,
        ..SetModeOptions::default()
    })
    .unwrap();
    let report = admin::reconsider(&ctx);
    assert_eq!(report.changed(), 0);
    assert_eq!(admin::show_entries(&ctx, None)[0].mode, PlanMode::ForceCustom);
}

#[test]
fn generic_regression_flips_to_custom_then_back() {
    let ctx = Arc::new(MentorContext::default());
    let (mut session, _sources) = prepared(&ctx, &[F]);
    admin::set_mode(&ctx, F, PlanMode::ForceGeneric, &SetModeOptions {
        ref_exec_time_ms: Some(5.0),
        ref_io_cost: Some(50.0),
        fixed: false,
    })
    .unwrap();
    feed(&mut session, F, &STABLE, 5.0, 8.0);
    let report = admin::reconsider(&ctx);
    assert_eq!(report.promoted_custom, 1);
    let row = &admin::show_entries(&ctx, None)[0];
    assert_eq!(row.mode, PlanMode::ForceCustom);
    assert_eq!(row.ref_io_cost, Some(100.0));

    // custom plans cost as much I/O as the baseline: back to generic
    let report = admin::reconsider(&ctx);
    assert_eq!(report.promoted_generic, 1);
}

#[test]
fn reconsideration_is_deterministic() {
    let run = || {
        let ctx = Arc::new(MentorContext::default());
        let fps = [Fingerprint(10), Fingerprint(11), Fingerprint(12)];
        let (mut session, _sources) = prepared(&ctx, &fps);
        feed(&mut session, fps[0], &STABLE, 5.0, 8.0);
        feed(&mut session, fps[1], &[10, 10, 10, 370], 9.0, 1.0);
        feed(&mut session, fps[2], &STABLE, 50.0, 8.0);
        let report = admin::reconsider(&ctx);
        let modes: Vec<_> = admin::show_entries(&ctx, None).iter().map(|r| r.mode).collect();
        (report.promoted_generic, report.promoted_custom, report.unchanged, modes)
    };
    let first = run();
    for _ in 0..5 {
        assert_eq!(run(), first);
    }
    assert_eq!(
        first.3,
        vec![PlanMode::ForceGeneric, PlanMode::ForceCustom, PlanMode::Auto]
    );
}

#[test]
fn at_most_one_rule_matches_each_entry() {
    let ctx = Arc::new(MentorContext::default());
    let (mut session, _sources) = prepared(&ctx, &[F]);
    feed(&mut session, F, &STABLE, 5.0, 8.0);
    let t = PolicyThresholds::default();
    let entry = ctx.store().find_exclusive(F).unwrap().clone();
    assert_eq!(evaluate(&entry, &t), Some(Rule::StableAuto));
    for mode in [PlanMode::Auto, PlanMode::ForceGeneric, PlanMode::ForceCustom] {
        let mut variant = entry.clone();
        variant.mode = mode;
        let fired = evaluate(&variant, &t);
        if let Some(rule) = fired {
            assert_ne!(rule.target(), mode);
        }
    }
}

#[test]
fn reset_clears_decisions_and_statistics() {
    let ctx = Arc::new(MentorContext::default());
    let (mut session, _sources) = prepared(&ctx, &[F, Fingerprint(7)]);
    feed(&mut session, F, &STABLE, 5.0, 8.0);
    admin::reconsider(&ctx);
    let before = ctx.clock().current();

    assert_eq!(admin::reset(&ctx), 2);
    assert_eq!(ctx.clock().current(), before + 1);
    for row in admin::show_entries(&ctx, None) {
        assert_eq!(row.mode, PlanMode::Auto);
        assert!(!row.fixed);
        assert_eq!(row.sample_count, 0);
        assert_eq!(row.ref_io_cost, None);
        assert_eq!(row.last_plan_time_ms, None);
        assert_eq!(row.refcount, 1);
    }
}
