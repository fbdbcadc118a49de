#![allow(missing_docs)]

use std::sync::{Arc, Barrier};
use std::thread;

use planmentor::admin::{self, SetModeOptions};
use planmentor::hooks::MemoryPlanSources;
use planmentor::{Deallocate, ExecSample, Fingerprint, MentorContext, PlanMode, Result};

const NUM_THREADS: usize = 8;
const OPERATIONS_PER_THREAD: usize = 200;
const SHARED: Fingerprint = Fingerprint(31337);

#[test]
fn concurrent_prepare_and_deallocate_conserve_refcount() -> Result<()> {
    let ctx = Arc::new(MentorContext::default());
    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let mut handles = vec![];

    for thread_id in 0..NUM_THREADS {
        let ctx = Arc::clone(&ctx);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<()> {
            let mut session = ctx.open_session();
            let mut sources = MemoryPlanSources::new();
            barrier.wait();
            for i in 0..OPERATIONS_PER_THREAD {
                let (handle, _) = sources.prepare(format!("q{i}"), SHARED);
                session.on_prepare(SHARED, handle)?;
                session.on_execute_end(SHARED, ExecSample::new((thread_id * 10 + i) as i64, 1.0), i % 2 == 0);
                if i % 3 == 0 {
                    let (handle, fingerprint) = sources.deallocate(&format!("q{i}")).unwrap();
                    session.on_deallocate(Deallocate::One { fingerprint, handle });
                }
            }
            // the rest goes with the session
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().unwrap()?;
    }

    let entry = ctx.store().find_exclusive(SHARED).unwrap();
    assert_eq!(entry.refcount, 0);
    assert_eq!(entry.ring.len(), entry.ring.capacity());
    Ok(())
}

#[test]
fn generation_is_monotonic_under_concurrent_mode_changes() {
    let ctx = Arc::new(MentorContext::default());
    let barrier = Arc::new(Barrier::new(NUM_THREADS + 1));
    let mut writers = vec![];

    for thread_id in 0..NUM_THREADS {
        let ctx = Arc::clone(&ctx);
        let barrier = Arc::clone(&barrier);
        writers.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..OPERATIONS_PER_THREAD {
                let fp = Fingerprint(1 + ((thread_id + i) % 4) as u64);
                let mode = if i % 2 == 0 { PlanMode::ForceGeneric } else { PlanMode::ForceCustom };
                // busy entries are skipped, not waited on
                let _ = admin::set_mode(&ctx, fp, mode, &SetModeOptions::default());
                if i % 50 == 0 {
                    admin::reconsider(&ctx);
                }
            }
        }));
    }

    let observer = {
        let ctx = Arc::clone(&ctx);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let mut session = ctx.open_session();
            let mut sources = MemoryPlanSources::new();
            let (handle, _) = sources.prepare("q", Fingerprint(1));
            session.on_prepare(Fingerprint(1), handle).unwrap();
            barrier.wait();
            let mut last_clock = 0;
            let mut last_seen = 0;
            for _ in 0..(NUM_THREADS * OPERATIONS_PER_THREAD) {
                let now = ctx.clock().current();
                assert!(now >= last_clock);
                last_clock = now;
                session.resync(&mut sources);
                let seen = session.last_seen_generation();
                assert!(seen >= last_seen);
                assert!(seen <= ctx.clock().current());
                last_seen = seen;
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    observer.join().unwrap();
    assert!(ctx.clock().current() > 1);
}

#[test]
fn reconsider_runs_alongside_sample_recording() {
    let ctx = Arc::new(MentorContext::default());
    let barrier = Arc::new(Barrier::new(NUM_THREADS + 1));
    let mut workers = vec![];

    for thread_id in 0..NUM_THREADS {
        let ctx = Arc::clone(&ctx);
        let barrier = Arc::clone(&barrier);
        workers.push(thread::spawn(move || {
            let mut session = ctx.open_session();
            let mut sources = MemoryPlanSources::new();
            let fps: Vec<_> = (1..=16).map(Fingerprint).collect();
            for fp in &fps {
                let (handle, _) = sources.prepare(format!("q{}", fp.0), *fp);
                session.on_prepare(*fp, handle).unwrap();
            }
            barrier.wait();
            for i in 0..OPERATIONS_PER_THREAD {
                let fp = fps[(thread_id + i) % fps.len()];
                session.on_plan_end(fp, 2.0);
                session.on_execute_end(fp, ExecSample::new(100, 1.0), true);
            }
            session.close()
        }));
    }

    barrier.wait();
    let mut passes = 0;
    for _ in 0..20 {
        admin::reconsider(&ctx);
        passes += 1;
    }
    let mut released = 0;
    for worker in workers {
        released += worker.join().unwrap();
    }
    assert_eq!(passes, 20);
    assert_eq!(released as usize, NUM_THREADS * 16);
    assert!(admin::show_entries(&ctx, None).iter().all(|row| row.refcount == 0));
}
