use super::*;
use crate::resource::ResourceAccess;
use crate::test_utils::init_tracing;
use parking_lot::Mutex;
use rstest::rstest;
use static_assertions::assert_impl_all;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

assert_impl_all!(Runtime: Send);
assert_impl_all!(RuntimeHandle: Send, Sync, Clone);
assert_impl_all!(crate::TaskFuture<i32>: Send);
assert_impl_all!(Shared: Send, Sync);

#[test]
fn builder_rejects_bad_configs() {
    init_tracing();
    assert!(Builder::new()
        .worker_threads(1)
        .scheduler_pool(SchedulerTag::DEFAULT, 1)
        .try_build()
        .is_err());
    assert!(Builder::new()
        .worker_threads(1)
        .scheduler_pool(SchedulerTag(1), 0)
        .try_build()
        .is_err());
}

#[test]
fn empty_runtime_tears_down() {
    init_tracing();
    let rt = init(2);
    rt.barrier();
    drop(rt);
}

#[test]
fn task_without_resources_runs() {
    init_tracing();
    let rt = init(1);
    let got = rt.emplace_task(|| 2 + 2).label("arith").submit().get();
    assert_eq!(got, 4);
}

#[rstest]
#[case::one_worker(1)]
#[case::four_workers(4)]
fn flood_of_independent_tasks(#[case] workers: usize) {
    init_tracing();
    let rt = init(workers);
    let hits = Arc::new(AtomicUsize::new(0));

    for _ in 0..1000 {
        let hits = Arc::clone(&hits);
        rt.emplace_task(move || {
            hits.fetch_add(1, Ordering::Relaxed);
        })
        .submit();
    }

    rt.barrier();
    assert_eq!(hits.load(Ordering::Relaxed), 1000);
}

/// Two readers of the same resource are not serial and may overlap.
/// Each task waits (bounded) for the other inside its closure; only a
/// truly concurrent schedule lets both observe the rendezvous.
#[test]
fn read_read_parallelism() {
    init_tracing();
    let rt = init(2);
    let a = rt.create_io_resource(5u32);

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let guard = a.read();
        let access = guard.access();
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        rt.emplace_task(move || {
            assert_eq!(guard.get(), 5);
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);

            let deadline = Instant::now() + Duration::from_secs(2);
            while in_flight.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
                std::hint::spin_loop();
            }
            peak.fetch_max(in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
            in_flight.fetch_sub(1, Ordering::SeqCst);
        })
        .resource(access)
        .submit();
    }

    rt.barrier();
    assert_eq!(peak.load(Ordering::SeqCst), 2, "readers never overlapped");
}

/// Writers retire in emplacement order regardless of worker count.
#[rstest]
#[case::one_worker(1)]
#[case::four_workers(4)]
fn write_write_serialization(#[case] workers: usize) {
    init_tracing();
    let rt = init(workers);
    let a = rt.create_io_resource(0u32);

    for i in 1..=100u32 {
        let w = a.write();
        let access = w.access();
        rt.emplace_task(move || w.with_mut(|v| *v = i)).resource(access).submit();
    }

    rt.barrier();
    assert_eq!(a.read().get(), 100);
}

/// Writes are ordered, and every write sees its predecessor's value.
#[test]
fn writers_observe_program_order() {
    init_tracing();
    let rt = init(4);
    let a = rt.create_io_resource(0u64);
    let in_order = Arc::new(AtomicBool::new(true));

    for i in 0..64u64 {
        let w = a.write();
        let access = w.access();
        let in_order = Arc::clone(&in_order);
        rt.emplace_task(move || {
            w.with_mut(|v| {
                if *v != i {
                    in_order.store(false, Ordering::Relaxed);
                }
                *v = i + 1;
            })
        })
        .resource(access)
        .submit();
    }

    rt.barrier();
    assert!(in_order.load(Ordering::Relaxed));
    assert_eq!(a.read().get(), 64);
}

/// Disjoint range writers commute; a spanning writer waits for both.
#[test]
fn range_writers_fence_on_overlap() {
    init_tracing();
    let rt = init(4);
    let field = rt.create_field([20usize], 0u8);

    let writes: [(std::ops::Range<usize>, u8); 3] = [(0..10, 1), (10..20, 2), (5..15, 3)];
    for (range, value) in writes {
        let w = field.write([range.clone()]).unwrap();
        let access = w.access();
        rt.emplace_task(move || {
            for i in w.region()[0].clone() {
                w.set([i], value);
            }
        })
        .resource(access)
        .submit();
    }

    rt.barrier();
    let r = field.read([0..20]).unwrap();
    for i in 0..20 {
        let expect = match i {
            0..=4 => 1,
            5..=14 => 3,
            _ => 2,
        };
        assert_eq!(r.get([i]), expect, "cell {i}");
    }
}

/// A parent's post-event waits for its children; an observer emplaced
/// after the parent sees the last child's write.
#[test]
fn child_tasks_retire_before_parent() {
    init_tracing();
    let rt = init(4);
    let handle = rt.handle();
    let a = rt.create_io_resource(0u32);

    let w = a.write();
    let access = w.access();
    let child_target = a.clone();
    rt.emplace_task(move || {
        w.with_mut(|v| *v = 1);
        for value in [3u32, 4] {
            let cw = child_target.write();
            let caccess = cw.access();
            handle
                .emplace_task(move || cw.with_mut(|v| *v = value))
                .resource(caccess)
                .submit();
        }
    })
    .resource(access)
    .submit();

    let r = a.read();
    let raccess = r.access();
    let seen = rt.emplace_task(move || r.get()).resource(raccess).submit().get();
    assert_eq!(seen, 4);
    rt.barrier();
}

/// Atomic-add accesses commute among themselves but fence against reads.
#[test]
fn atomic_adds_accumulate() {
    init_tracing();
    let rt = init(4);
    let a = rt.create_io_resource(0i64);

    let add1 = a.atomic_add();
    let add2 = a.atomic_add();
    assert!(!ResourceAccess::is_serial(&add1.access(), &add2.access()));

    for (guard, delta) in [(add1, 10), (add2, 32)] {
        let access = guard.access();
        rt.emplace_task(move || guard.update(|v| *v += delta))
            .resource(access)
            .submit();
    }

    let r = a.read();
    let access = r.access();
    let sum = rt.emplace_task(move || r.get()).resource(access).submit().get();
    assert_eq!(sum, 42);
}

/// A stack-switching task blocking on its child's future does not block
/// the worker: with a single worker the child can only run if the parent
/// transfers to it.
#[test]
fn stack_switching_child_chain() {
    init_tracing();
    let rt = init(1);
    let handle = rt.handle();

    let got = rt
        .emplace_task(move || {
            let child = handle.emplace_task(|| 21).submit();
            child.get() * 2
        })
        .enable_stack_switching()
        .get();

    assert_eq!(got, 42);
}

#[test]
fn nested_stack_switching_scope_depths() {
    init_tracing();
    let rt = init(1);
    let handle = rt.handle();
    assert_eq!(rt.scope_depth(), 0);

    let inner_handle = handle.clone();
    let (outer_depth, inner_depth) = rt
        .emplace_task(move || {
            let own = inner_handle.scope_depth();
            let deeper_handle = inner_handle.clone();
            let deeper = inner_handle
                .emplace_task(move || deeper_handle.scope_depth())
                .submit()
                .get();
            (own, deeper)
        })
        .enable_stack_switching()
        .get();

    assert_eq!(outer_depth, 1);
    assert_eq!(inner_depth, 2);
}

#[test]
#[should_panic(expected = "enable_stack_switching")]
fn blocking_get_without_stack_switching_is_an_error() {
    init_tracing();
    let rt = init(2);
    let handle = rt.handle();

    rt.emplace_task(move || {
        let child = handle.emplace_task(|| 1).submit();
        child.get()
    })
    .submit()
    .get();
}

/// A panicking closure fails its future but not its followers.
#[test]
fn panics_flow_through_futures_only() {
    init_tracing();
    let rt = init(2);
    let a = rt.create_io_resource(7u32);

    let w = a.write();
    let access = w.access();
    let failing = rt
        .emplace_task(move || -> () {
            let _ = &w;
            panic!("boom")
        })
        .resource(access)
        .submit();

    let r = a.read();
    let access = r.access();
    let follower = rt.emplace_task(move || r.get()).resource(access).submit();

    // The follower is ordered behind the failed writer and still runs.
    assert_eq!(follower.get(), 7);

    let payload = catch_unwind(AssertUnwindSafe(|| failing.get())).unwrap_err();
    let msg = payload.downcast_ref::<&str>().copied().unwrap_or_default();
    assert_eq!(msg, "boom");

    rt.barrier();
}

#[test]
fn dropped_future_still_retires_the_task() {
    init_tracing();
    let rt = init(1);
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);

    let fut = rt.emplace_task(move || flag.store(true, Ordering::Release)).submit();
    drop(fut);

    rt.barrier();
    assert!(ran.load(Ordering::Acquire));
}

#[test]
fn future_reports_readiness() {
    init_tracing();
    let rt = init(1);
    let fut = rt.emplace_task(|| 9).submit();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !fut.is_ready() && Instant::now() < deadline {
        std::thread::yield_now();
    }
    assert!(fut.is_ready());
    assert_eq!(fut.get(), 9);
}

#[test]
fn patch_with_covered_additions_is_accepted() {
    init_tracing();
    let rt = init(1);
    let handle = rt.handle();
    let field = rt.create_field([20usize], 0u8);

    let w = field.write([0..20]).unwrap();
    let access = w.access();
    let narrower = field.read([5..10]).unwrap().access();
    rt.emplace_task(move || {
        let _ = &w;
        handle.update_properties(AccessPatch::new().add(narrower.clone()));
    })
    .resource(access)
    .submit()
    .get();
}

#[test]
#[should_panic(expected = "exceeds the initially declared accesses")]
fn patch_enlarging_the_access_set_is_rejected() {
    init_tracing();
    let rt = init(1);
    let handle = rt.handle();
    let a = rt.create_io_resource(0u32);

    let r = a.read();
    let access = r.access();
    let wider = a.write().access();
    rt.emplace_task(move || {
        let _ = &r;
        handle.update_properties(AccessPatch::new().add(wider.clone()));
    })
    .resource(access)
    .submit()
    .get();
}

#[test]
#[should_panic(expected = "removing accesses")]
fn patch_removals_are_rejected() {
    init_tracing();
    let rt = init(1);
    let handle = rt.handle();
    let a = rt.create_io_resource(0u32);

    let r = a.read();
    let access = r.access();
    let removed = access.clone();
    rt.emplace_task(move || {
        let _ = &r;
        handle.update_properties(AccessPatch::new().remove(removed.clone()));
    })
    .resource(access)
    .submit()
    .get();
}

#[test]
#[should_panic(expected = "inside a running task")]
fn patch_outside_a_task_is_an_error() {
    init_tracing();
    let rt = init(1);
    rt.update_properties(AccessPatch::new());
}

#[test]
fn tagged_scheduler_routes_to_its_own_workers() {
    init_tracing();
    const TRANSPORT: SchedulerTag = SchedulerTag(1);
    let rt = Builder::new()
        .worker_threads(2)
        .scheduler_pool(TRANSPORT, 1)
        .try_build()
        .unwrap();

    let sched = rt.scheduler(TRANSPORT).expect("tagged scheduler");
    assert_eq!(sched.worker_range(), 2..3);
    assert!(rt.scheduler(SchedulerTag(9)).is_none());

    let name = rt
        .emplace_task(|| std::thread::current().name().unwrap().to_string())
        .scheduler_tag(TRANSPORT)
        .submit()
        .get();
    assert_eq!(name, "trellis-worker-2");
}

/// Child tasks emplaced from a worker are biased onto that worker; the
/// second worker has to steal to participate. Seeing both thread names
/// proves the steal path moved real work.
#[test]
fn sibling_tasks_get_stolen() {
    init_tracing();
    let rt = init(2);
    let handle = rt.handle();
    let names: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    let spawner_names = Arc::clone(&names);
    rt.emplace_task(move || {
        for _ in 0..64 {
            let names = Arc::clone(&spawner_names);
            handle
                .emplace_task(move || {
                    names
                        .lock()
                        .insert(std::thread::current().name().unwrap().to_string());
                    let start = Instant::now();
                    while start.elapsed() < Duration::from_micros(500) {
                        std::hint::spin_loop();
                    }
                })
                .submit();
        }
    })
    .submit();

    rt.barrier();
    assert!(
        names.lock().len() >= 2,
        "all 64 sibling tasks ran on one worker; stealing never engaged"
    );
}

/// External events gate the owning task's retirement but not its result.
#[test]
fn external_event_defers_retirement() {
    init_tracing();
    let rt = init(2);
    let handle = rt.handle();
    let slot: Arc<Mutex<Option<EventHandle>>> = Arc::new(Mutex::new(None));

    let stash = Arc::clone(&slot);
    let fut = rt
        .emplace_task(move || {
            let event = handle.create_event().expect("inside a task");
            *stash.lock() = Some(event);
            11
        })
        .submit();

    assert_eq!(fut.get(), 11);
    assert_eq!(
        rt.inner.root_space.len(),
        1,
        "task retired before its external event was reached"
    );

    let event = slot.lock().take().expect("task stored its event handle");
    event.reach();
    rt.barrier();
    assert!(rt.inner.root_space.is_empty());
}

#[test]
fn create_event_outside_a_task_is_none() {
    init_tracing();
    let rt = init(1);
    assert!(rt.create_event().is_none());
}

#[test]
#[should_panic(expected = "after runtime shutdown")]
fn submitting_after_shutdown_is_an_error() {
    init_tracing();
    let rt = init(1);
    let handle = rt.handle();
    drop(rt);
    handle.emplace_task(|| ()).submit();
}

#[test]
fn workers_sleep_and_wake_across_bursts() {
    init_tracing();
    let rt = init(2);

    for burst in 0..3 {
        // Give the workers time to park between bursts.
        std::thread::sleep(Duration::from_millis(20));
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let hits = Arc::clone(&hits);
            rt.emplace_task(move || {
                hits.fetch_add(1, Ordering::Relaxed);
            })
            .submit();
        }
        rt.barrier();
        assert_eq!(hits.load(Ordering::Relaxed), 8, "burst {burst}");
    }
}
