/*!
 * Call Stack Tests
 * Parent/level derivation, the documented hierarchy and lifecycle events
 */

use method_monitor::{
    CallEvent, CallEventKind, CallRequest, ContextId, EventBuffer, MethodDescriptor,
    MonitorConfig, Monitor, MonitorError,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;

struct Methods {
    a_m1: Arc<MethodDescriptor>,
    b_m1: Arc<MethodDescriptor>,
    b_m2: Arc<MethodDescriptor>,
    c_m1: Arc<MethodDescriptor>,
    c_m2: Arc<MethodDescriptor>,
}

impl Methods {
    fn new() -> Self {
        Self {
            a_m1: Arc::new(MethodDescriptor::new("A", "M1")),
            b_m1: Arc::new(MethodDescriptor::new("B", "M1")),
            b_m2: Arc::new(MethodDescriptor::new("B", "M2")),
            c_m1: Arc::new(MethodDescriptor::new("C", "M1")),
            c_m2: Arc::new(MethodDescriptor::new("C", "M2")),
        }
    }
}

/// Started events as (method, level, parent correlation id)
fn record_starts(monitor: &Monitor) -> (Arc<Mutex<Vec<(String, u32, String)>>>, method_monitor::Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = monitor.subscribe(move |event: &CallEvent<'_>| {
        if event.kind == CallEventKind::Started {
            let entry = (
                event.info.method().map(|m| m.to_string()).unwrap_or_default(),
                event.info.level(),
                event.info.parent_id().to_string(),
            );
            sink.lock().push(entry);
        }
    });
    (seen, subscription)
}

#[test]
fn test_documented_hierarchy_levels() {
    let monitor = Monitor::default();
    let m = Methods::new();
    let (seen, _subscription) = record_starts(&monitor);
    let ctx = ContextId::fresh();

    let a = monitor.begin_in(ctx, &CallRequest::new(&m.a_m1).correlation_id("a1"));
    {
        let _b1 = monitor.begin_in(ctx, &CallRequest::new(&m.b_m1).correlation_id("b1"));
        {
            let _c1 = monitor.begin_in(ctx, &CallRequest::new(&m.c_m1).correlation_id("c1"));
        }
        {
            let _b2 = monitor.begin_in(ctx, &CallRequest::new(&m.b_m2).correlation_id("b2"));
            let _c2 = monitor.begin_in(ctx, &CallRequest::new(&m.c_m2).correlation_id("c2"));
        }
    }
    a.finish().unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            ("A.M1".to_string(), 1, String::new()),
            ("B.M1".to_string(), 2, "a1".to_string()),
            ("C.M1".to_string(), 3, "b1".to_string()),
            ("B.M2".to_string(), 3, "b1".to_string()),
            ("C.M2".to_string(), 4, "b2".to_string()),
        ]
    );
    assert_eq!(monitor.stack().depth(ctx), 0);
    assert_eq!(monitor.stack().usage_errors(), 0);
}

#[test]
fn test_external_calls_link_like_internal_ones() {
    let monitor = Monitor::default();
    let m = Methods::new();
    let http = Arc::new(MethodDescriptor::new("HttpClient", "Send"));
    let ctx = ContextId::fresh();

    let outer = monitor.begin_in(ctx, &CallRequest::new(&m.a_m1));
    let external = monitor.begin_in(ctx, &CallRequest::new(&http).external("HttpClient"));

    let frame = external.frame();
    assert_eq!(frame.level, 2);
    assert_eq!(frame.parent, outer.frame().link());
    assert_eq!(
        external.with_info(|info| info.external_type_name().map(str::to_string)),
        Some(Some("HttpClient".to_string()))
    );

    external.finish().unwrap();
    outer.finish().unwrap();
}

#[test]
fn test_pop_out_of_order_is_usage_error() {
    let monitor = Monitor::default();
    let m = Methods::new();
    let ctx = ContextId::fresh();
    let stack = monitor.stack();

    let a = stack.push(ctx, stack.create_method_call_info(&CallRequest::new(&m.a_m1)));
    let b = stack.push(ctx, stack.create_method_call_info(&CallRequest::new(&m.b_m1)));

    match stack.pop(&a) {
        Err(MonitorError::NotTopOfStack { call, top, .. }) => {
            assert_eq!(call, a.call_id);
            assert_eq!(top, b.call_id);
        }
        other => panic!("expected NotTopOfStack, got {:?}", other),
    }

    for frame in [b, a] {
        let info = stack.pop(&frame).unwrap();
        monitor.pool().give_back(info).unwrap();
    }
    assert_eq!(stack.usage_errors(), 1);
}

#[test]
fn test_disabled_monitor_publishes_nothing() {
    let monitor = Monitor::new(&MonitorConfig::disabled());
    let m = Methods::new();
    let (seen, _subscription) = record_starts(&monitor);

    monitor.track(&CallRequest::new(&m.a_m1), || {
        monitor.track(&CallRequest::new(&m.b_m1), || ());
    });
    assert!(seen.lock().is_empty());
    assert_eq!(monitor.pool().stats().null_rents, 2);
}

#[test]
fn test_event_buffer_captures_lifecycle() {
    let monitor = Monitor::default();
    let m = Methods::new();
    let buffer = EventBuffer::with_capacity(16);
    let _subscription = monitor.subscribe(buffer.clone());
    let ctx = ContextId::fresh();

    let scope = monitor.begin_in(
        ctx,
        &CallRequest::new(&m.a_m1)
            .correlation_id("req-1")
            .generic_arguments(&["String"])
            .parameters(&[("user", "42")]),
    );
    monitor
        .log_status_in(ctx, &CallRequest::new(&m.b_m1).correlation_id("status"))
        .unwrap();
    scope.finish().unwrap();

    let records = buffer.drain();
    let kinds: Vec<_> = records.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![CallEventKind::Started, CallEventKind::Status, CallEventKind::Ended]
    );
    assert_eq!(records[0].parameters.get("user").map(String::as_str), Some("42"));
    assert_eq!(records[1].parent_id, "req-1");
    assert_eq!(records[1].level, 2);
    assert!(records[2].elapsed_us.is_some());
    assert_eq!(records[0].generic_arguments, vec!["String".to_string()]);
    assert!(records[1].generic_arguments.is_empty());
    for record in &records {
        assert!(record.started_at <= record.recorded_at);
        assert!(record.started_at > std::time::UNIX_EPOCH);
    }
    // Start and end records describe the same call start
    let start_ms = |r: &method_monitor::CallEventRecord| {
        r.started_at
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i128
    };
    assert!((start_ms(&records[0]) - start_ms(&records[2])).abs() <= 5);

    let json = records[2].to_json().unwrap();
    assert!(json.contains("\"method\":\"M1\""));
    assert!(json.contains("\"declaring_type\":\"A\""));
    assert!(json.contains("\"generic_arguments\":[\"String\"]"));
    assert!(json.contains("\"started_at\":"));
}
