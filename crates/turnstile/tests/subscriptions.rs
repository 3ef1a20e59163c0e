//! Subscription validation through the public registry API.

use std::sync::Arc;

use serde_json::Value;
use turnstile_core::{
    args, Controller, MethodCache, MethodKind, MethodSig, Owner, ParamType, Receiver, Registry,
    ReturnType, SubscribeError, TableBuilder, Topic,
};
use turnstile_testing::Probe;

/// Task `switch()` plus guard providers `lit` and `warm`.
#[derive(Default)]
struct Lamp;

impl Controller for Lamp {
    fn describe(m: &mut TableBuilder<Self>) {
        m.task("switch", &[], |_, _| Ok(()))
            .guard("lit", |_| true)
            .guard("warm", |_| false);
    }
}

/// Guard provider that takes a parameter.
struct Dial;

impl Controller for Dial {
    fn describe(m: &mut TableBuilder<Self>) {
        m.task("turn", &[], |_, _| Ok(())).method(
            MethodSig::new("level", Receiver::Instance, MethodKind::Guard("level".into()))
                .with_params(&[ParamType::Integer])
                .returning(ReturnType::Bool),
            |_, _| Ok(Value::Bool(true)),
        );
    }
}

/// Guard provider that does not return a bool.
struct Gauge;

impl Controller for Gauge {
    fn describe(m: &mut TableBuilder<Self>) {
        m.task("read", &[], |_, _| Ok(())).method(
            MethodSig::new("full", Receiver::Instance, MethodKind::Guard("full".into()))
                .returning(ReturnType::Value),
            |_, _| Ok(Value::from(7)),
        );
    }
}

fn names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

#[test]
fn mismatched_guard_groups_fail_every_insertion() {
    for _ in 0..20 {
        let slots = fastrand::usize(1..=4);
        let mut groups = fastrand::usize(1..=5);
        if groups == slots {
            groups += 1;
        }
        let guard_groups: Vec<Vec<&str>> = (0..groups).map(|_| vec!["lit"]).collect();

        let mut registry = Registry::new();
        registry.add_topics([Topic::new("bad")
            .with_permissions(names("p", slots))
            .with_guard_groups(guard_groups)]);

        let err = registry
            .subscribe("bad", Owner::instance(Arc::new(Lamp)), "switch", args![])
            .unwrap_err();
        assert_eq!(err.as_label(), "invalid_topic", "slots={slots} groups={groups}");

        let err = registry.create_complex_sequential("seq", "bad").unwrap_err();
        assert_eq!(err.as_label(), "invalid_topic");

        let err = registry
            .append_to_complex_sequential("seq", Owner::instance(Arc::new(Lamp)), "switch", args![])
            .unwrap_err();
        assert_eq!(err.as_label(), "unknown_subscription");

        assert!(registry.simple_subscriptions().is_empty());
        assert!(registry.complex_sequential("seq").is_none());
    }
}

#[test]
fn overfull_complex_sequential_keeps_its_size() {
    let slots = fastrand::usize(1..=5);
    let mut registry = Registry::new();
    registry.add_topics([Topic::new("line").with_permissions(names("p", slots))]);
    registry.create_complex_sequential("line", "line").unwrap();

    let lamp = Arc::new(Lamp);
    for _ in 0..slots {
        registry
            .append_to_complex_sequential("line", Owner::instance(lamp.clone()), "switch", args![])
            .unwrap();
    }
    let seq = registry.complex_sequential("line").unwrap();
    assert!(seq.is_full());

    let err = registry
        .append_to_complex_sequential("line", Owner::instance(lamp), "switch", args![])
        .unwrap_err();
    assert!(matches!(err, SubscribeError::TooManyBindings { slots: s, .. } if s == slots));
    assert_eq!(registry.complex_sequential("line").unwrap().len(), slots);
}

#[test]
fn guard_coverage_is_checked_per_slot() {
    let mut registry = Registry::new();
    registry.add_topics([Topic::new("mixed")
        .with_permissions(["a", "b"])
        .with_guard_groups([vec!["lit", "warm"], vec!["ready"]])]);
    registry.create_complex_sequential("mixed", "mixed").unwrap();

    // slot 1 needs "ready", which Lamp does not provide
    registry
        .append_to_complex_sequential("mixed", Owner::instance(Arc::new(Lamp)), "switch", args![])
        .unwrap();
    let err = registry
        .append_to_complex_sequential("mixed", Owner::instance(Arc::new(Lamp)), "switch", args![])
        .unwrap_err();
    match err {
        SubscribeError::MissingGuardProvider { slot, guard, .. } => {
            assert_eq!(slot, 1);
            assert_eq!(guard, "ready");
        }
        other => panic!("unexpected error: {other}"),
    }

    registry
        .append_to_complex_sequential("mixed", Owner::instance(Probe::new()), "run", args![])
        .unwrap();
    assert!(registry.complex_sequential("mixed").unwrap().is_full());
}

#[test]
fn has_guard_provider_reflects_the_owner_type() {
    let mut registry = Registry::new();
    registry.add_topics([Topic::new("t")
        .with_permissions(["a"])
        .with_guard_groups([["lit"]])]);
    registry
        .subscribe("t", Owner::instance(Arc::new(Lamp)), "switch", args![])
        .unwrap();

    let binding = registry.simple_subscriptions()[0].binding();
    assert!(binding.has_guard_provider("lit"));
    assert!(binding.has_guard_provider("warm"));
    assert!(!binding.has_guard_provider("ready"));
    assert!(!binding.has_guard_provider(""));
    assert!(!binding.guard_value("warm").unwrap());
}

#[test]
fn malformed_guard_providers_are_rejected() {
    let mut registry = Registry::new();
    registry.add_topics([Topic::new("t").with_permissions(["a"])]);

    let err = registry
        .subscribe("t", Owner::instance(Arc::new(Dial)), "turn", args![])
        .unwrap_err();
    assert_eq!(err.as_label(), "invalid_guard_provider");

    let err = registry
        .subscribe("t", Owner::instance(Arc::new(Gauge)), "read", args![])
        .unwrap_err();
    assert_eq!(err.as_label(), "invalid_guard_provider");
    assert!(registry.simple_subscriptions().is_empty());
}

#[test]
fn happenings_are_unique_but_tasks_may_repeat() {
    let mut registry = Registry::new();
    registry.add_topics([
        Topic::new("door").with_permissions(["h0"]),
        Topic::new("t").with_permissions(["t0"]),
    ]);
    let probe = Probe::new();

    registry
        .subscribe("door", Owner::instance(probe.clone()), "poke", args![])
        .unwrap();
    let err = registry
        .subscribe("door", Owner::instance(probe.clone()), "poke", args![])
        .unwrap_err();
    assert_eq!(err.as_label(), "already_subscribed");
    assert_eq!(registry.happening_count(), 1);

    // a different instance of the same type is a different owner
    registry
        .subscribe("door", Owner::instance(Probe::new()), "poke", args![])
        .unwrap();
    assert_eq!(registry.happening_count(), 2);

    for _ in 0..2 {
        registry
            .subscribe("t", Owner::instance(probe.clone()), "run", args![])
            .unwrap();
    }
    assert_eq!(registry.simple_subscriptions().len(), 2);
}

#[test]
fn arguments_select_compatible_overloads() {
    let mut registry = Registry::new();
    registry.add_topics([Topic::new("t").with_permissions(["t0"])]);
    let probe = Probe::new();

    registry
        .subscribe("t", Owner::instance(probe.clone()), "run_with", args![3])
        .unwrap();
    let err = registry
        .subscribe("t", Owner::instance(probe), "run_with", args!["three"])
        .unwrap_err();
    assert_eq!(err.as_label(), "no_such_callable");
    assert_eq!(
        registry.simple_subscriptions()[0].binding().args(),
        &[Value::from(3)]
    );
}

#[test]
fn shared_cache_memoizes_across_registries() {
    let cache = Arc::new(MethodCache::new());
    for topic in ["a", "b"] {
        let mut registry = Registry::with_cache(cache.clone());
        registry.add_topics([Topic::new(topic).with_permissions(["t0"])]);
        registry
            .subscribe(topic, Owner::instance(Arc::new(Lamp)), "switch", args![])
            .unwrap();
    }
    assert_eq!(cache.len(), 1);
}
