//! Integration tests for the control plane.
//!
//! - program names are unique until removed
//! - registers round-trip and default to zero
//! - bound programs cannot be removed until every binding is released
//! - reloading identical text is tolerated
//! - concurrent loads, binds and register writes leave consistent state
//! - a removal never slips in between a bind's lookup and its reference

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use mpsched_core::{EngineConfig, R1, R2, R3, R4, R5, R6, RegisterIndex, Subflow};
use mpsched_scheduler::{ControlError, SchedulerRuntime, StaticPathState};

fn runtime() -> SchedulerRuntime {
    SchedulerRuntime::new(EngineConfig::default(), Arc::new(StaticPathState::new())).unwrap()
}

// ── Registry names ──────────────────────────────────────────────────

#[test]
fn duplicate_name_rejected_until_removed() {
    let rt = runtime();
    let first = rt.load_scheduler("SCHEDULER dup; FALLBACK;").unwrap();
    assert_eq!(first.name, "dup");

    let err = rt
        .load_scheduler("SCHEDULER dup; EMIT SUBFLOW[0];")
        .unwrap_err();
    assert_eq!(err, ControlError::DuplicateSchedulerName("dup".into()));

    rt.remove_scheduler("dup").unwrap();
    let second = rt.load_scheduler("SCHEDULER dup; EMIT SUBFLOW[0];").unwrap();
    assert_ne!(first.digest, second.digest);
    assert!(second.version > first.version);
}

#[test]
fn identical_text_reloads_without_error() {
    let rt = runtime();
    let conn = rt.open_connection(true);
    let first = rt.load_scheduler("SCHEDULER again; FALLBACK;").unwrap();
    rt.set_scheduler(conn, "again").unwrap();

    let second = rt.load_scheduler("SCHEDULER again; FALLBACK;").unwrap();
    assert_eq!(second, first);
    assert_eq!(rt.registry().bound_count("again"), Some(1));
    assert_eq!(rt.schedulers(), vec!["again".to_string()]);
}

#[test]
fn removing_unknown_program_fails() {
    let rt = runtime();
    assert_eq!(
        rt.remove_scheduler("ghost"),
        Err(ControlError::SchedulerNotFound("ghost".into()))
    );
}

// ── Registers ───────────────────────────────────────────────────────

#[test]
fn registers_round_trip_and_default_to_zero() {
    let rt = runtime();
    let conn = rt.open_connection(true);

    for r in [R1, R2, R3, R4, R5, R6] {
        assert_eq!(rt.get_register(conn, r), Ok(0), "{r} should start at zero");
    }

    rt.set_register(conn, R3, 1_500_000).unwrap();
    rt.set_register(conn, R5, -1).unwrap();
    assert_eq!(rt.get_register(conn, R3), Ok(1_500_000));
    assert_eq!(rt.get_register(conn, R5), Ok(-1));

    let other = rt.open_connection(true);
    assert_eq!(rt.get_register(other, R3), Ok(0), "registers are per connection");
}

#[test]
fn register_index_outside_configured_range() {
    let rt = runtime();
    let conn = rt.open_connection(true);
    for bad in [0u8, 7, 16, 255] {
        assert_eq!(
            rt.set_register(conn, RegisterIndex(bad), 1),
            Err(ControlError::InvalidRegisterIndex {
                index: RegisterIndex(bad),
                count: 6
            })
        );
    }
}

// ── Binding lifetime ────────────────────────────────────────────────

#[test]
fn remove_while_bound_then_after_close() {
    let rt = runtime();
    rt.load_scheduler("SCHEDULER shared; FALLBACK;").unwrap();
    let a = rt.open_connection(true);
    let b = rt.open_connection(true);
    rt.set_scheduler(a, "shared").unwrap();
    rt.set_scheduler(b, "shared").unwrap();

    assert_eq!(
        rt.remove_scheduler("shared"),
        Err(ControlError::SchedulerInUse {
            name: "shared".into(),
            bound: 2
        })
    );

    rt.close_connection(a).unwrap();
    assert_eq!(
        rt.remove_scheduler("shared"),
        Err(ControlError::SchedulerInUse {
            name: "shared".into(),
            bound: 1
        })
    );

    rt.close_connection(b).unwrap();
    rt.remove_scheduler("shared").unwrap();
    assert!(rt.schedulers().is_empty());
}

#[test]
fn rebinding_moves_the_reference() {
    let rt = runtime();
    rt.load_scheduler("SCHEDULER a; FALLBACK;").unwrap();
    rt.load_scheduler("SCHEDULER b; FALLBACK;").unwrap();
    let conn = rt.open_connection(true);

    rt.set_scheduler(conn, "a").unwrap();
    rt.set_scheduler(conn, "b").unwrap();
    rt.remove_scheduler("a").unwrap();
    assert_eq!(
        rt.remove_scheduler("b"),
        Err(ControlError::SchedulerInUse {
            name: "b".into(),
            bound: 1
        })
    );
}

// ── Concurrency ─────────────────────────────────────────────────────

#[test]
fn concurrent_control_plane_is_consistent() {
    let rt = Arc::new(runtime());
    rt.load_scheduler("SCHEDULER common; FALLBACK;").unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let rt = rt.clone();
            thread::spawn(move || {
                rt.load_scheduler(&format!("SCHEDULER own{t}; FALLBACK;"))
                    .unwrap();
                let mut conns = Vec::new();
                for i in 0..50 {
                    let conn = rt.open_connection(true);
                    rt.set_scheduler(conn, "common").unwrap();
                    rt.set_register(conn, R1, i).unwrap();
                    assert_eq!(rt.get_register(conn, R1), Ok(i));
                    conns.push(conn);
                }
                // Close half; the rest stay bound.
                for conn in conns.iter().step_by(2) {
                    rt.close_connection(*conn).unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(rt.connection_count(), 100);
    assert_eq!(rt.registry().bound_count("common"), Some(100));
    assert_eq!(rt.schedulers().len(), 5);

    rt.shutdown();
    assert_eq!(rt.connection_count(), 0);
    assert!(rt.schedulers().is_empty());
}

#[test]
fn bind_and_remove_never_interleave() {
    let paths = Arc::new(StaticPathState::new());
    let rt = Arc::new(SchedulerRuntime::new(EngineConfig::default(), paths.clone()).unwrap());
    const SOURCE: &str = "SCHEDULER racy; EMIT SUBFLOW[0];";
    rt.load_scheduler(SOURCE).unwrap();
    let conn = rt.open_connection(true);
    paths.update(conn, vec![Subflow::new(1, 10_000, 10, 1_000_000)]);

    let done = Arc::new(AtomicBool::new(false));
    let binder = {
        let rt = rt.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut bound_runs = 0;
            for _ in 0..2_000 {
                match rt.set_scheduler(conn, "racy") {
                    Ok(()) => {
                        // Bound: the program must still be registered.
                        assert!(rt.schedulers().contains(&"racy".to_string()));
                        assert!(rt.registry().bound_count("racy").unwrap_or(0) >= 1);
                        bound_runs += 1;
                    }
                    Err(err) => {
                        assert_eq!(err, ControlError::SchedulerNotFound("racy".into()));
                    }
                }
                let ticket = rt.evaluate(conn).expect("one active subflow");
                assert_eq!(ticket.decision.subflow_ids(), vec![1]);
                rt.clear_scheduler(conn).unwrap();
            }
            done.store(true, Ordering::Release);
            bound_runs
        })
    };

    let remover = {
        let rt = rt.clone();
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                match rt.remove_scheduler("racy") {
                    Ok(()) => {
                        assert_eq!(rt.registry().bound_count("racy"), None);
                        rt.load_scheduler(SOURCE).unwrap();
                    }
                    Err(ControlError::SchedulerInUse { bound, .. }) => assert!(bound >= 1),
                    Err(other) => panic!("unexpected removal error: {other:?}"),
                }
            }
        })
    };

    let bound_runs = binder.join().unwrap();
    remover.join().unwrap();
    assert!(bound_runs > 0);

    assert_eq!(rt.scheduler_of(conn), Ok(None));
    assert_eq!(rt.registry().bound_count("racy"), Some(0));
    rt.remove_scheduler("racy").unwrap();
}
