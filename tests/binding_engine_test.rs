//! # Binding Engine Tests
//!
//! End-to-end behavior of activated bindings against a `MemoryStore`:
//!
//! 1. Subscription sharing - one store subscription per field address
//! 2. Ordering - stale and duplicate samples never reach a binding
//! 3. Rebinding - relation changes move the subscription without a gap
//! 4. Evaluation - scripts, transforms, error retention, callbacks that write
//! 5. Teardown - deactivation is idempotent and releases everything

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use livebind::{
    BindError, BindingEngine, BindingHandle, BindingMode, BindingPhase, BindingSpec, BoundValue,
    EngineConfig, EventKind, EventLog, FieldAddress, FieldSample, MemoryStore,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

// ============================================================================
// TEST HELPERS
// ============================================================================

struct Harness {
    store: MemoryStore,
    log: EventLog,
    engine: BindingEngine,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let store = MemoryStore::new();
        let log = EventLog::new();
        let engine =
            BindingEngine::init_with_emitter(Arc::new(store.clone()), config, Arc::new(log.clone()))
                .unwrap();
        Self { store, log, engine }
    }

    async fn bind(
        &self,
        spec: BindingSpec,
        root: &str,
    ) -> (BindingHandle, UnboundedReceiver<BoundValue>) {
        let (tx, rx) = unbounded_channel();
        let handle = self
            .engine
            .activate(spec, root, move |value| {
                let _ = tx.send(value);
            })
            .await
            .unwrap();
        (handle, rx)
    }

    fn count(&self, predicate: impl Fn(&EventKind) -> bool) -> usize {
        self.log.count_where(predicate)
    }
}

fn field(property: &str, expression: &str) -> BindingSpec {
    BindingSpec::new("faceplate", property, expression, BindingMode::Field)
}

fn script(property: &str, expression: &str) -> BindingSpec {
    BindingSpec::new("faceplate", property, expression, BindingMode::Script)
}

fn addr(entity: &str, field: &str) -> FieldAddress {
    FieldAddress::new(entity, field)
}

async fn next(rx: &mut UnboundedReceiver<BoundValue>) -> BoundValue {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("delivery channel closed")
}

/// Give spawned work a chance to run, then assert nothing was delivered
async fn assert_quiet(rx: &mut UnboundedReceiver<BoundValue>) {
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(rx.try_recv().is_err(), "unexpected delivery");
}

async fn poll_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 1s");
}

fn v(value: Value) -> BoundValue {
    BoundValue::Value(value)
}

// ============================================================================
// SUBSCRIPTION SHARING
// ============================================================================

#[tokio::test]
async fn test_two_bindings_share_one_subscription() {
    let h = Harness::new();
    h.store.write("E1", "Temperature", json!(20));

    let (_a, mut rx_a) = h.bind(field("a", "Temperature"), "E1").await;
    let (_b, mut rx_b) = h.bind(field("b", "Temperature"), "E1").await;

    assert_eq!(next(&mut rx_a).await, v(json!(20)));
    assert_eq!(next(&mut rx_b).await, v(json!(20)));
    assert_eq!(h.store.subscribe_count(&addr("E1", "Temperature")), 1);
    assert_eq!(h.engine.registry().refcount(&addr("E1", "Temperature")), 2);

    h.store.write("E1", "Temperature", json!(21));
    assert_eq!(next(&mut rx_a).await, v(json!(21)));
    assert_eq!(next(&mut rx_b).await, v(json!(21)));
}

#[tokio::test]
async fn test_shared_relation_is_subscribed_once() {
    let h = Harness::new();
    h.store.write("E1", "Parent", json!("E2"));
    h.store.write("E2", "Status", json!("running"));
    h.store.write("E2", "Name", json!("Pump 2"));

    let (_s, mut rx_s) = h.bind(field("status", "Parent->Status"), "E1").await;
    let (_n, mut rx_n) = h.bind(field("name", "Parent->Name"), "E1").await;

    assert_eq!(next(&mut rx_s).await, v(json!("running")));
    assert_eq!(next(&mut rx_n).await, v(json!("Pump 2")));
    assert_eq!(h.store.subscribe_count(&addr("E1", "Parent")), 1);
    assert_eq!(h.engine.registry().refcount(&addr("E1", "Parent")), 2);
}

#[tokio::test]
async fn test_last_release_unsubscribes_exactly_once() {
    let h = Harness::new();
    h.store.write("E1", "Temperature", json!(20));
    let temperature = addr("E1", "Temperature");

    let (a, _rx_a) = h.bind(field("a", "Temperature"), "E1").await;
    let (b, _rx_b) = h.bind(field("b", "Temperature"), "E1").await;

    h.engine.deactivate(&a).await;
    assert_eq!(h.store.unsubscribe_count(&temperature), 0);
    assert_eq!(h.engine.registry().refcount(&temperature), 1);

    h.engine.deactivate(&b).await;
    assert_eq!(h.store.unsubscribe_count(&temperature), 1);
    assert_eq!(h.store.active_sinks(&temperature), 0);
    assert_eq!(h.engine.registry().live_count(), 0);
}

// ============================================================================
// ORDERING
// ============================================================================

#[tokio::test]
async fn test_stale_and_duplicate_samples_are_ignored() {
    let h = Harness::new();
    let first = h.store.write("E1", "Temperature", json!(20));
    let (_handle, mut rx) = h.bind(field("value", "Temperature"), "E1").await;
    assert_eq!(next(&mut rx).await, v(json!(20)));

    let temperature = addr("E1", "Temperature");
    h.store
        .deliver(&temperature, FieldSample::new(json!(99), first.timestamp_ms));
    h.store
        .deliver(&temperature, FieldSample::new(json!(-1), first.timestamp_ms - 1));
    assert_quiet(&mut rx).await;

    h.store.write("E1", "Temperature", json!(22));
    assert_eq!(next(&mut rx).await, v(json!(22)));
    assert!(h.engine.registry().stats().stale_dropped >= 2);
}

#[tokio::test]
async fn test_unchanged_output_is_not_redelivered() {
    let h = Harness::new();
    h.store.write("E1", "Temperature", json!(70));
    let (_handle, mut rx) = h
        .bind(script("color", "Temperature > 80 ? 'red' : 'green'"), "E1")
        .await;
    assert_eq!(next(&mut rx).await, v(json!("green")));

    h.store.write("E1", "Temperature", json!(85));
    assert_eq!(next(&mut rx).await, v(json!("red")));

    h.store.write("E1", "Temperature", json!(90));
    assert_quiet(&mut rx).await;
}

// ============================================================================
// REBINDING
// ============================================================================

#[tokio::test]
async fn test_status_follows_parent_switch() {
    let h = Harness::new();
    h.store.write("E1", "Parent", json!("E2"));
    h.store.write("E2", "Status", json!("Online"));
    h.store.write("E3", "Status", json!("Offline"));

    let (_handle, mut rx) = h.bind(field("status", "Parent->Status"), "E1").await;
    assert_eq!(next(&mut rx).await, v(json!("Online")));

    h.store.write("E1", "Parent", json!("E3"));
    assert_eq!(next(&mut rx).await, v(json!("Offline")));
    assert_eq!(h.engine.registry().refcount(&addr("E2", "Status")), 0);
    assert_eq!(h.store.unsubscribe_count(&addr("E2", "Status")), 1);
}

#[tokio::test]
async fn test_unresolved_relation_binds_when_set() {
    let h = Harness::new();
    h.store.write("E1", "Parent", json!(null));
    h.store.write("E2", "Status", json!("running"));

    let (handle, mut rx) = h.bind(field("status", "Parent->Status"), "E1").await;
    assert_eq!(next(&mut rx).await, BoundValue::Unresolved);
    assert_eq!(handle.targets(), vec![("Parent->Status".to_string(), None)]);

    h.store.write("E1", "Parent", json!("E2"));
    assert_eq!(next(&mut rx).await, v(json!("running")));

    h.store.write("E2", "Status", json!("stopped"));
    assert_eq!(next(&mut rx).await, v(json!("stopped")));
    assert_eq!(handle.phase(), BindingPhase::Bound);
}

#[tokio::test]
async fn test_middle_hop_change_rebinds_without_gap() {
    let h = Harness::new();
    h.store.write("E1", "Parent", json!("E2"));
    h.store.write("E2", "Parent", json!("E5"));
    h.store.write("E5", "Status", json!("old"));
    h.store.write("E6", "Status", json!("new"));

    let (_handle, mut rx) = h
        .bind(field("status", "Parent->Parent->Status"), "E1")
        .await;
    assert_eq!(next(&mut rx).await, v(json!("old")));

    h.store.write("E2", "Parent", json!("E6"));
    assert_eq!(next(&mut rx).await, v(json!("new")));

    let registry = h.engine.registry();
    assert_eq!(registry.refcount(&addr("E5", "Status")), 0);
    assert_eq!(registry.refcount(&addr("E6", "Status")), 1);
    assert_eq!(registry.refcount(&addr("E1", "Parent")), 1);
    assert_eq!(registry.refcount(&addr("E2", "Parent")), 1);
    // Relations kept across the rebind never went back to the store
    assert_eq!(h.store.subscribe_count(&addr("E1", "Parent")), 1);
    assert_eq!(h.store.subscribe_count(&addr("E2", "Parent")), 1);
    assert_eq!(h.store.unsubscribe_count(&addr("E2", "Parent")), 0);
    assert_eq!(h.store.unsubscribe_count(&addr("E5", "Status")), 1);

    h.store.write("E5", "Status", json!("ignored"));
    assert_quiet(&mut rx).await;
    assert_eq!(
        h.count(|k| matches!(k, EventKind::PathReresolved { .. })),
        1
    );
}

#[tokio::test]
async fn test_clearing_relation_delivers_unresolved() {
    let h = Harness::new();
    h.store.write("E1", "Parent", json!("E2"));
    h.store.write("E2", "Status", json!("running"));

    let (handle, mut rx) = h.bind(field("status", "Parent->Status"), "E1").await;
    assert_eq!(next(&mut rx).await, v(json!("running")));

    h.store.write("E1", "Parent", json!(""));
    assert_eq!(next(&mut rx).await, BoundValue::Unresolved);
    poll_until(|| h.engine.registry().refcount(&addr("E2", "Status")) == 0).await;
    assert_eq!(handle.phase(), BindingPhase::Bound);
}

// ============================================================================
// EVALUATION
// ============================================================================

#[tokio::test]
async fn test_script_with_unresolved_dependency_uses_null() {
    let h = Harness::new();
    let (_handle, mut rx) = h
        .bind(script("color", "Temperature > 80 ? 'red' : 'green'"), "E1")
        .await;
    assert_eq!(next(&mut rx).await, v(json!("green")));

    h.store.write("E1", "Temperature", json!(85));
    assert_eq!(next(&mut rx).await, v(json!("red")));
}

#[tokio::test]
async fn test_script_over_two_dependencies() {
    let h = Harness::new();
    h.store.write("E1", "Parent", json!("E2"));
    h.store.write("E1", "Pressure", json!(3));
    h.store.write("E2", "Offset", json!(10));

    let (_handle, mut rx) = h
        .bind(script("reading", "Pressure * 2 + Parent->Offset"), "E1")
        .await;
    assert_eq!(next(&mut rx).await, v(json!(16)));

    h.store.write("E2", "Offset", json!(0));
    assert_eq!(next(&mut rx).await, v(json!(6)));
}

#[tokio::test]
async fn test_transform_applies_to_field_value() {
    let h = Harness::new();
    h.store.write("E1", "Status", json!("running"));
    let spec = field("label", "Status").with_transform("upper(value)");

    let (_handle, mut rx) = h.bind(spec, "E1").await;
    assert_eq!(next(&mut rx).await, v(json!("RUNNING")));
}

#[tokio::test]
async fn test_literal_binding_delivers_constant() {
    let h = Harness::new();
    let spec = BindingSpec::new("faceplate", "max", "100", BindingMode::Literal);

    let (_handle, mut rx) = h.bind(spec, "E1").await;
    assert_eq!(next(&mut rx).await, v(json!(100)));
    assert_eq!(h.engine.registry().live_count(), 0);
}

#[tokio::test]
async fn test_evaluation_error_keeps_previous_output() {
    let h = Harness::new();
    h.store.write("E1", "Total", json!(10));
    h.store.write("E1", "Divisor", json!(2));

    let (handle, mut rx) = h.bind(script("ratio", "Total / Divisor"), "E1").await;
    assert_eq!(next(&mut rx).await, v(json!(5)));

    h.store.write("E1", "Divisor", json!(0));
    assert_quiet(&mut rx).await;
    assert!(handle.has_error());
    assert_eq!(handle.last_output(), Some(v(json!(5))));
    assert_eq!(
        h.count(|k| matches!(k, EventKind::EvaluationFailed { .. })),
        1
    );

    h.store.write("E1", "Divisor", json!(5));
    assert_eq!(next(&mut rx).await, v(json!(2)));
    assert!(!handle.has_error());
}

#[tokio::test]
async fn test_callback_may_write_to_store() {
    let h = Harness::new();
    h.store.write("E1", "Temperature", json!(20));

    let writer = h.store.clone();
    h.engine
        .activate(field("mirror", "Temperature"), "E1", move |value| {
            if let BoundValue::Value(value) = value {
                writer.write("E9", "Mirror", value);
            }
        })
        .await
        .unwrap();
    let (_mirror, mut rx) = h.bind(field("copy", "Mirror"), "E9").await;

    poll_until(|| h.store.get(&addr("E9", "Mirror")).is_some()).await;
    h.store.write("E1", "Temperature", json!(30));

    let mut latest = next(&mut rx).await;
    while latest != v(json!(30)) {
        latest = next(&mut rx).await;
    }
}

#[tokio::test]
async fn test_callback_writing_own_dependency_delivers_in_order() {
    let h = Harness::new();
    h.store.write("E1", "Counter", json!(0));

    let (tx, mut rx) = unbounded_channel();
    let writer = h.store.clone();
    h.engine
        .activate(field("counter", "Counter"), "E1", move |value| {
            if let BoundValue::Value(Value::Number(n)) = &value {
                if let Some(n) = n.as_i64().filter(|n| *n < 3) {
                    writer.write("E1", "Counter", n + 1);
                }
            }
            let _ = tx.send(value);
        })
        .await
        .unwrap();

    for expected in 0..=3 {
        assert_eq!(next(&mut rx).await, v(json!(expected)));
    }
    assert_quiet(&mut rx).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cross_writing_callbacks_do_not_deadlock() {
    const ECHO: i64 = 1_000;

    let h = Harness::new();
    h.store.write("E1", "X", json!(0));
    h.store.write("E2", "Y", json!(0));

    // each callback echoes small values into the other binding's field
    let overlaps = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for (property, root, watched, entity, echoed) in
        [("x", "E1", "X", "E2", "Y"), ("y", "E2", "Y", "E1", "X")]
    {
        let writer = h.store.clone();
        let busy = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::clone(&overlaps);
        let handle = h
            .engine
            .activate(field(property, watched), root, move |value| {
                if busy.swap(true, Ordering::AcqRel) {
                    overlaps.fetch_add(1, Ordering::Relaxed);
                }
                if let BoundValue::Value(Value::Number(n)) = &value {
                    if let Some(n) = n.as_i64().filter(|n| *n < ECHO) {
                        writer.write(entity, echoed, n + ECHO);
                    }
                }
                busy.store(false, Ordering::Release);
            })
            .await
            .unwrap();
        handles.push(handle);
    }

    let writers = [("E1", "X"), ("E2", "Y")].map(|(entity, name)| {
        let store = h.store.clone();
        std::thread::spawn(move || {
            for i in 1..=200 {
                store.write(entity, name, i);
            }
        })
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while writers.iter().any(|w| !w.is_finished()) {
        assert!(Instant::now() < deadline, "writers stalled");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(overlaps.load(Ordering::Relaxed), 0);
    for handle in &handles {
        assert!(handle.is_active());
        assert!(!handle.has_error());
    }
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn test_parse_error_never_activates() {
    let h = Harness::new();
    let (tx, _rx) = unbounded_channel::<BoundValue>();

    let err = h
        .engine
        .activate(field("status", "Parent->"), "E1", move |value| {
            let _ = tx.send(value);
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), "LB-010");
    assert_eq!(h.engine.binding_count(), 0);
    assert_eq!(h.engine.registry().live_count(), 0);
    assert_eq!(
        h.count(|k| matches!(k, EventKind::BindingActivated { .. })),
        0
    );
}

#[tokio::test]
async fn test_unknown_function_is_rejected() {
    let h = Harness::new();
    let err = h
        .engine
        .activate(script("x", "eval(Temperature)"), "E1", |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, BindError::UnknownFunction { .. }));
}

#[tokio::test]
async fn test_path_too_deep_is_rejected() {
    let h = Harness::with_config(EngineConfig {
        max_hops: 2,
        ..Default::default()
    });
    let err = h
        .engine
        .activate(field("x", "A->B->C->Status"), "E1", |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, BindError::PathTooDeep { hops: 3, max: 2, .. }));
}

#[tokio::test]
async fn test_unavailable_store_reads_as_unresolved() {
    let h = Harness::new();
    h.store.write("E1", "Temperature", json!(20));
    h.store.set_available(false);

    let (handle, mut rx) = h.bind(field("value", "Temperature"), "E1").await;
    assert_eq!(next(&mut rx).await, BoundValue::Unresolved);
    assert!(handle.is_active());
}

#[tokio::test]
async fn test_binding_after_outage_receives_values() {
    let h = Harness::new();
    h.store.set_available(false);

    let (_a, mut rx_a) = h.bind(field("a", "Temperature"), "E1").await;
    assert_eq!(next(&mut rx_a).await, BoundValue::Unresolved);

    h.store.set_available(true);
    h.store.write("E1", "Temperature", json!(85));

    let (_b, mut rx_b) = h.bind(field("b", "Temperature"), "E1").await;
    assert_eq!(next(&mut rx_b).await, v(json!(85)));
    assert_eq!(next(&mut rx_a).await, v(json!(85)));
    assert_eq!(h.store.subscribe_count(&addr("E1", "Temperature")), 1);

    h.store.write("E1", "Temperature", json!(90));
    assert_eq!(next(&mut rx_a).await, v(json!(90)));
    assert_eq!(next(&mut rx_b).await, v(json!(90)));
}

#[tokio::test]
async fn test_retrying_engine_recovers_from_brief_outage() {
    let store = MemoryStore::new();
    store.write("E1", "Parent", json!("E2"));
    store.write("E2", "Status", json!("running"));
    store.set_available(false);

    let mut config = EngineConfig::default();
    config.retry.max_retries = 10;
    config.retry.initial_delay_ms = 10;
    config.retry.backoff_multiplier = 1.0;
    config.retry.jitter = 0.0;
    let log = EventLog::new();
    let engine = BindingEngine::with_retrying_store(store.clone(), config, Arc::new(log.clone()))
        .unwrap();

    let outage = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        outage.set_available(true);
    });

    let (tx, mut rx) = unbounded_channel();
    let handle = engine
        .activate(field("status", "Parent->Status"), "E1", move |value| {
            let _ = tx.send(value);
        })
        .await
        .unwrap();

    assert_eq!(next(&mut rx).await, v(json!("running")));
    assert_eq!(handle.phase(), BindingPhase::Bound);

    store.write("E2", "Status", json!("stopped"));
    assert_eq!(next(&mut rx).await, v(json!("stopped")));
    engine.shutdown().await;
}

// ============================================================================
// TEARDOWN
// ============================================================================

#[tokio::test]
async fn test_deactivate_is_idempotent() {
    let h = Harness::new();
    h.store.write("E1", "Parent", json!("E2"));
    h.store.write("E2", "Status", json!("running"));

    let (handle, mut rx) = h.bind(field("status", "Parent->Status"), "E1").await;
    assert_eq!(next(&mut rx).await, v(json!("running")));

    handle.deactivate().await;
    handle.deactivate().await;
    h.engine.deactivate(&handle).await;

    assert!(!handle.is_active());
    assert_eq!(handle.phase(), BindingPhase::Unbound);
    assert_eq!(handle.last_output(), None);
    assert_eq!(h.store.unsubscribe_count(&addr("E1", "Parent")), 1);
    assert_eq!(h.store.unsubscribe_count(&addr("E2", "Status")), 1);
    assert_eq!(
        h.count(|k| matches!(k, EventKind::BindingDeactivated { .. })),
        1
    );

    h.store.write("E2", "Status", json!("stopped"));
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_event_log_records_lifecycle() {
    let h = Harness::new();
    h.store.write("E1", "Temperature", json!(20));

    let (handle, mut rx) = h.bind(field("value", "Temperature"), "E1").await;
    next(&mut rx).await;
    h.engine.deactivate(&handle).await;

    let kinds = h
        .log
        .filter_binding(handle.id())
        .into_iter()
        .map(|event| match event.kind {
            EventKind::BindingActivated { .. } => "activated",
            EventKind::ValueDelivered { .. } => "delivered",
            EventKind::BindingDeactivated { .. } => "deactivated",
            _ => "other",
        })
        .collect::<Vec<_>>();
    assert_eq!(kinds, vec!["activated", "delivered", "deactivated"]);
    assert_eq!(
        h.count(|k| matches!(k, EventKind::SubscriptionOpened { .. })),
        1
    );
    assert_eq!(
        h.count(|k| matches!(k, EventKind::SubscriptionClosed { .. })),
        1
    );
}
