//! Worker loop behaviour against a recording engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use turnstile_core::{
    args, Controller, EngineError, EngineRef, EventBus, MethodKind, MethodSig, Owner, Receiver,
    Registry, ReturnType, Runtime, RuntimeConfig, RuntimeHandle, SyncError, SyncEventKind,
    TableBuilder, Topic, WorkerLoop, WorkerPool,
};
use turnstile_testing::{EngineCall, Probe, RecordingEngine};

const WAIT: Duration = Duration::from_secs(5);

/// Task `meet()` blocks until every meeter sharing the barrier has arrived.
struct Meeter {
    barrier: Arc<Barrier>,
    met: Arc<AtomicUsize>,
}

impl Controller for Meeter {
    fn describe(m: &mut TableBuilder<Self>) {
        m.task("meet", &[], |meeter, _| {
            meeter.barrier.wait();
            meeter.met.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
}

/// Task `work()` whose guard provider `sane` always fails.
struct Unsure;

impl Controller for Unsure {
    fn describe(m: &mut TableBuilder<Self>) {
        m.task("work", &[], |_, _| Ok(())).method(
            MethodSig::new("sane", Receiver::Instance, MethodKind::Guard("sane".into()))
                .returning(ReturnType::Bool),
            |_, _| anyhow::bail!("sensor offline"),
        );
    }
}

fn start(registry: Registry, engine: &Arc<RecordingEngine>) -> RuntimeHandle {
    let engine: EngineRef = engine.clone();
    Runtime::start(registry, engine, RuntimeConfig::default()).unwrap()
}

async fn next_failure(handle: &mut RuntimeHandle) -> SyncError {
    let exit = tokio::time::timeout(WAIT, handle.join_next())
        .await
        .expect("worker did not stop")
        .expect("no worker running");
    exit.outcome.expect_err("worker stopped cleanly")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn guard_is_pushed_once_per_cycle_with_current_value() {
    let engine = RecordingEngine::new();
    engine.limit_permissions(1);

    let probe = Probe::new();
    let mut registry = Registry::new();
    registry.add_topics([Topic::new("scenario")
        .with_permissions(["t0"])
        .with_follow_ups(["t1"])
        .with_guard_groups([["ready"]])]);
    registry
        .subscribe("scenario", Owner::instance(probe.clone()), "run", args![])
        .unwrap();

    let handle = start(registry, &engine);

    engine.wait_for_calls(3, WAIT).await;
    assert_eq!(
        engine.calls(),
        vec![
            EngineCall::fire("t0", false),
            EngineCall::set_guard("ready", false),
            EngineCall::fire("t1", true),
        ]
    );
    assert_eq!(probe.runs(), 1);

    probe.set_ready(true);
    engine.limit_permissions(1);
    engine.wait_for_calls(6, WAIT).await;
    assert_eq!(
        engine.guard_updates(),
        vec![("ready".to_string(), false), ("ready".to_string(), true)]
    );
    assert_eq!(engine.count_fired("t1"), 2);

    let exits = handle.shutdown().await;
    assert_eq!(exits.len(), 1);
    assert!(exits[0].outcome.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn complex_sequential_runs_round_robin() {
    for _ in 0..3 {
        let slots = fastrand::usize(1..=4);
        let cycles = fastrand::usize(1..=4);

        let engine = RecordingEngine::new();
        engine.limit_permissions(slots * cycles);

        let permissions: Vec<String> = (0..slots).map(|i| format!("p{i}")).collect();
        let mut registry = Registry::new();
        registry.add_topics([Topic::new("line")
            .with_permissions(permissions.clone())
            .with_follow_ups(["done", "logged"])]);
        registry.create_complex_sequential("line", "line").unwrap();

        let probes: Vec<Arc<Probe>> = (0..slots).map(|_| Probe::new()).collect();
        for (i, probe) in probes.iter().enumerate() {
            registry
                .append_to_complex_sequential(
                    "line",
                    Owner::instance(probe.clone()),
                    "run_with",
                    args![i],
                )
                .unwrap();
        }

        let handle = start(registry, &engine);
        engine.wait_for_calls((slots + 2) * cycles, WAIT).await;

        let mut expected = Vec::new();
        for _ in 0..cycles {
            expected.extend(permissions.iter().cloned());
            expected.push("done".to_string());
            expected.push("logged".to_string());
        }
        assert_eq!(engine.fired(), expected);
        for (i, probe) in probes.iter().enumerate() {
            assert_eq!(probe.runs(), cycles);
            assert_eq!(probe.total(), i * cycles);
        }

        handle.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_permission_runs_ungated_with_warning() {
    let engine = RecordingEngine::new();
    let probe = Probe::new();

    let mut registry = Registry::new();
    registry.add_topics([Topic::new("open").with_permissions([""])]);
    registry.create_complex_sequential("open", "open").unwrap();
    registry
        .append_to_complex_sequential("open", Owner::instance(probe.clone()), "run", args![])
        .unwrap();

    let handle = start(registry, &engine);
    let mut events = handle.events();

    let (mut skipped, mut executed) = (false, false);
    let seen = tokio::time::timeout(WAIT, async {
        while !(skipped && executed) {
            match events.recv().await {
                Ok(ev) => match ev.kind {
                    SyncEventKind::PermissionSkipped { slot: 0 } => {
                        assert!(ev.is_warning());
                        skipped = true;
                    }
                    SyncEventKind::Executed { slot: 0 } => executed = true,
                    _ => {}
                },
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
    .await;
    assert!(seen.is_ok());

    handle.shutdown().await;
    assert!(probe.runs() > 0);
    assert!(engine.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_permission_is_fatal() {
    let engine = RecordingEngine::new();
    engine.reject("t0", EngineError::IllegalFiring("t0".into()));

    let probe = Probe::new();
    let mut registry = Registry::new();
    registry.add_topics([Topic::new("t").with_permissions(["t0"])]);
    registry
        .subscribe("t", Owner::instance(probe.clone()), "run", args![])
        .unwrap();

    let mut handle = start(registry, &engine);
    let err = next_failure(&mut handle).await;
    assert_eq!(err.as_label(), "permission_refused");
    assert_eq!(probe.runs(), 0);
    assert_eq!(handle.workers(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn controller_failure_is_fatal() {
    let engine = RecordingEngine::new();
    let probe = Probe::new();
    probe.fail_next();

    let mut registry = Registry::new();
    registry.add_topics([Topic::new("t")
        .with_permissions(["t0"])
        .with_follow_ups(["t1"])]);
    registry
        .subscribe("t", Owner::instance(probe), "run", args![])
        .unwrap();

    let mut handle = start(registry, &engine);
    let err = next_failure(&mut handle).await;
    assert!(matches!(err, SyncError::Execution { slot: 0, .. }));
    assert_eq!(engine.calls(), vec![EngineCall::fire("t0", false)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_guard_is_fatal() {
    let engine = RecordingEngine::new();
    engine.reject("ready", EngineError::InvalidName("ready".into()));

    let mut registry = Registry::new();
    registry.add_topics([Topic::new("t")
        .with_permissions(["t0"])
        .with_guard_groups([["ready"]])]);
    registry
        .subscribe("t", Owner::instance(Probe::new()), "run", args![])
        .unwrap();

    let mut handle = start(registry, &engine);
    let err = next_failure(&mut handle).await;
    assert_eq!(err.as_label(), "guard_rejected");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_follow_up_is_skipped_and_refused_one_is_fatal() {
    let engine = RecordingEngine::new();
    engine.reject("t2", EngineError::NotInitialized);

    let mut registry = Registry::new();
    registry.add_topics([Topic::new("t")
        .with_permissions(["t0"])
        .with_follow_ups(["", "t1", "t2"])]);
    registry
        .subscribe("t", Owner::instance(Probe::new()), "run", args![])
        .unwrap();

    let mut handle = start(registry, &engine);
    let err = next_failure(&mut handle).await;
    assert!(matches!(err, SyncError::FollowUp { ref transition, .. } if transition == "t2"));
    assert_eq!(
        engine.calls(),
        vec![EngineCall::fire("t0", false), EngineCall::fire("t1", true)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_cancels_loops_waiting_for_permission() {
    let engine = RecordingEngine::new();
    engine.hold("t0");

    let probe = Probe::new();
    let mut registry = Registry::new();
    registry.add_topics([Topic::new("t").with_permissions(["t0"])]);
    for _ in 0..2 {
        registry
            .subscribe("t", Owner::instance(probe.clone()), "run", args![])
            .unwrap();
    }

    let handle = start(registry, &engine);
    assert_eq!(handle.workers(), 2);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let exits = tokio::time::timeout(WAIT, handle.shutdown()).await.unwrap();
    assert_eq!(exits.len(), 2);
    assert!(exits.iter().all(|e| e.outcome.is_ok()));
    assert_eq!(probe.runs(), 0);
}

#[tokio::test]
async fn bounded_pool_refuses_extra_workers() {
    let engine = RecordingEngine::new();
    let mut registry = Registry::new();
    registry.add_topics([Topic::new("t").with_permissions(["t0"])]);
    for _ in 0..2 {
        registry
            .subscribe("t", Owner::instance(Probe::new()), "run", args![])
            .unwrap();
    }

    let config = RuntimeConfig {
        max_workers: Some(1),
        ..RuntimeConfig::default()
    };
    let engine: EngineRef = engine;
    let err = Runtime::start(registry, engine, config).err().unwrap();
    assert_eq!(err.as_label(), "pool_exhausted");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ended_loop_frees_its_place_before_it_is_joined() {
    let engine = RecordingEngine::new();
    engine.reject("doomed", EngineError::NotInitialized);
    engine.hold("parked");

    let mut registry = Registry::new();
    registry.add_topics([
        Topic::new("dies").with_permissions(["doomed"]),
        Topic::new("waits").with_permissions(["parked"]),
    ]);
    registry
        .subscribe("dies", Owner::instance(Probe::new()), "run", args![])
        .unwrap();
    registry
        .subscribe("waits", Owner::instance(Probe::new()), "run", args![])
        .unwrap();
    let subs = registry.simple_subscriptions();
    let engine: EngineRef = engine;
    let bus = EventBus::default();

    let mut pool = WorkerPool::new(Some(1));
    pool.spawn(WorkerLoop::new(&subs[0], engine.clone(), bus.clone()))
        .unwrap();
    let ended = tokio::time::timeout(WAIT, async {
        while pool.live() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(ended.is_ok());
    assert_eq!(pool.len(), 1);

    pool.spawn(WorkerLoop::new(&subs[1], engine.clone(), bus.clone()))
        .unwrap();
    assert_eq!(pool.live(), 1);
    let err = pool
        .spawn(WorkerLoop::new(&subs[1], engine, bus))
        .unwrap_err();
    assert_eq!(err.as_label(), "pool_exhausted");

    let exits = pool.shutdown().await;
    assert_eq!(exits.len(), 2);
    assert_eq!(exits.iter().filter(|e| e.outcome.is_err()).count(), 1);
}

#[tokio::test]
async fn empty_complex_sequential_is_not_started() {
    let engine = RecordingEngine::new();
    let mut registry = Registry::new();
    registry.add_topics([Topic::new("t").with_permissions(["a", "b"])]);
    registry.create_complex_sequential("idle", "t").unwrap();

    let handle = start(registry, &engine);
    assert_eq!(handle.workers(), 0);
    assert!(handle.shutdown().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_guard_provider_is_fatal() {
    let engine = RecordingEngine::new();
    let mut registry = Registry::new();
    registry.add_topics([Topic::new("t")
        .with_permissions(["t0"])
        .with_follow_ups(["t1"])
        .with_guard_groups([["sane"]])]);
    registry
        .subscribe("t", Owner::instance(Arc::new(Unsure)), "work", args![])
        .unwrap();

    let mut handle = start(registry, &engine);
    let err = next_failure(&mut handle).await;
    match err {
        SyncError::GuardValue { ref guard, ref source } => {
            assert_eq!(guard, "sane");
            assert_eq!(source.as_label(), "invoke_failed");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(handle.workers(), 0);
    assert_eq!(engine.calls(), vec![EngineCall::fire("t0", false)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_loop_gets_its_own_controller_thread() {
    // more loops than tokio's default blocking-thread cap (512)
    const LOOPS: usize = 520;

    let engine = RecordingEngine::new();
    engine.limit_permissions(LOOPS);

    let barrier = Arc::new(Barrier::new(LOOPS));
    let met = Arc::new(AtomicUsize::new(0));
    let mut registry = Registry::new();
    registry.add_topics([Topic::new("meeting").with_permissions(["enter"])]);
    for _ in 0..LOOPS {
        let meeter = Meeter {
            barrier: barrier.clone(),
            met: met.clone(),
        };
        registry
            .subscribe("meeting", Owner::instance(Arc::new(meeter)), "meet", args![])
            .unwrap();
    }

    let handle = start(registry, &engine);
    assert_eq!(handle.workers(), LOOPS);

    let all_met = tokio::time::timeout(Duration::from_secs(30), async {
        while met.load(Ordering::SeqCst) < LOOPS {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(
        all_met.is_ok(),
        "only {} of {LOOPS} controllers ran",
        met.load(Ordering::SeqCst)
    );

    // budget spent: every loop is back waiting for permission
    let exits = tokio::time::timeout(WAIT, handle.shutdown()).await.unwrap();
    assert_eq!(exits.len(), LOOPS);
    assert!(exits.iter().all(|e| e.outcome.is_ok()));
}
