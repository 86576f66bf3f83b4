/*!
 * Async Tracking Tests
 * Continuations on fresh contexts carrying their parent explicitly
 */

use method_monitor::{
    CallEvent, CallEventKind, CallRequest, ContextId, MethodDescriptor, Monitor,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_async_root_hangs_under_caller() {
    let monitor = Monitor::default();
    let handler = Arc::new(MethodDescriptor::new("Api", "Handle"));
    let fetch = Arc::new(MethodDescriptor::new("Store", "Fetch"));
    let parse = Arc::new(MethodDescriptor::new("Store", "Parse"));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _subscription = monitor.subscribe(move |event: &CallEvent<'_>| {
        if event.kind == CallEventKind::Started {
            let entry = (event.info.method_name().to_string(), event.info.level(), event.info.parent_id().to_string());
            sink.lock().push(entry);
        }
    });

    let caller = ContextId::current();
    let outer = monitor.begin_in(caller, &CallRequest::new(&handler).correlation_id("req-9"));

    let value = monitor
        .track_async(&CallRequest::new(&fetch).correlation_id("fetch"), |ctx| {
            let monitor = &monitor;
            let parse = Arc::clone(&parse);
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                monitor.track(&CallRequest::new(&parse), || ());
                let nested = monitor.begin_in(ctx, &CallRequest::new(&parse));
                let level = nested.frame().level;
                nested.finish().unwrap();
                level
            }
        })
        .await;

    outer.finish().unwrap();
    assert_eq!(value, 3);

    let seen = seen.lock();
    assert_eq!(seen[0], ("Handle".to_string(), 1, String::new()));
    assert_eq!(seen[1], ("Fetch".to_string(), 2, "req-9".to_string()));
    // `track` without a context uses the thread's own stack
    assert_eq!(seen[2], ("Parse".to_string(), 2, "req-9".to_string()));
    assert_eq!(seen[3], ("Parse".to_string(), 3, "fetch".to_string()));
    assert_eq!(monitor.pool().stats().outstanding, 0);
}

#[tokio::test]
async fn test_async_without_caller_frame_is_root() {
    let monitor = Monitor::default();
    let job = Arc::new(MethodDescriptor::new("Jobs", "Run"));

    let frame = monitor
        .track_async(&CallRequest::new(&job), |ctx| {
            let top = monitor.stack().top(ctx);
            async move { top }
        })
        .await
        .unwrap();

    assert_eq!(frame.level, 1);
    assert!(frame.parent.is_null());
    assert_eq!(monitor.stack().active_contexts(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_tasks_balance_the_pool() {
    let monitor = Arc::new(Monitor::default());
    let job = Arc::new(MethodDescriptor::new("Jobs", "Run"));
    let step = Arc::new(MethodDescriptor::new("Jobs", "Step"));

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let monitor = Arc::clone(&monitor);
            let job = Arc::clone(&job);
            let step = Arc::clone(&step);
            tokio::spawn(async move {
                monitor
                    .track_async(&CallRequest::new(&job), |ctx| {
                        let monitor = Arc::clone(&monitor);
                        async move {
                            for _ in 0..10 {
                                tokio::task::yield_now().await;
                                let scope = monitor.begin_in(ctx, &CallRequest::new(&step));
                                assert_eq!(scope.frame().level, 2);
                                scope.finish().unwrap();
                            }
                        }
                    })
                    .await;
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let stats = monitor.pool().stats();
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.rented, 64 * 11);
    assert_eq!(monitor.stack().active_contexts(), 0);
    assert_eq!(monitor.stack().usage_errors(), 0);
}
