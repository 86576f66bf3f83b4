/*!
 * Method Monitor - Demo Entry Point
 *
 * Composition root that wires one monitor and drives a small workload:
 * - Instrumented calls on several OS threads
 * - An async continuation carried onto a fresh context
 * - Monitoring switched off and on while work is running
 */

use method_monitor::{
    init_tracing_with, CallRequest, ComponentType, EventBuffer, MethodDescriptor, Monitor,
    MonitorConfig, TracingObserver, TrackQuery,
};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Marker reporter for the demo's order pipeline
struct OrderReporter;

struct Methods {
    submit: Arc<MethodDescriptor>,
    reserve: Arc<MethodDescriptor>,
    charge: Arc<MethodDescriptor>,
    audit: Arc<MethodDescriptor>,
}

impl Methods {
    fn new() -> Self {
        Self {
            submit: Arc::new(
                MethodDescriptor::new("OrderService", "Submit").with_parameter_types(&["Order"]),
            ),
            reserve: Arc::new(
                MethodDescriptor::new("Inventory", "Reserve").with_parameter_types(&["Sku", "u32"]),
            ),
            charge: Arc::new(MethodDescriptor::new("PaymentGateway", "Charge")),
            audit: Arc::new(MethodDescriptor::new("AuditLog", "Append")),
        }
    }
}

fn process_order(monitor: &Monitor, methods: &Methods, worker: usize, order: usize) {
    let order_id = format!("order-{}-{}", worker, order);
    let submit = CallRequest::new(&methods.submit)
        .owner("order-service")
        .correlation_id(&order_id);

    monitor.track(&submit, || {
        monitor.track(
            &CallRequest::new(&methods.reserve).parameters(&[("sku", "A-100"), ("qty", "2")]),
            || std::thread::sleep(Duration::from_micros(200)),
        );

        let charge = CallRequest::new(&methods.charge).external("HttpClient");
        let scope = monitor.begin(&charge);
        scope.set_parameter("amount", "19.99");
        std::thread::sleep(Duration::from_micros(300));
        if let Err(e) = scope.finish() {
            warn!(error = %e, "charge scope misused");
        }

        if let Err(e) = monitor.log_status(&CallRequest::new(&methods.audit).correlation_id(&order_id)) {
            warn!(error = %e, "status record not returned");
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = MonitorConfig::from_env()?;
    init_tracing_with(&config);

    info!("Method monitor demo starting...");
    info!(
        enabled = config.enabled,
        pool_capacity = config.pool_capacity,
        diagnostics_capacity = config.diagnostics_capacity,
        "configuration loaded"
    );

    let monitor = Arc::new(Monitor::new(&config));
    let buffer = EventBuffer::new();
    let _logging = monitor.subscribe(TracingObserver::new());
    let _buffering = monitor.subscribe(buffer.clone());
    let _state_log = monitor.controller().on_state_changed(|change| {
        info!(
            change = ?change.kind,
            old = %change.old_version,
            new = %change.new_version,
            "state change observed"
        );
    });

    let reporter = ComponentType::of::<OrderReporter>();
    monitor.controller().enable_reporter(reporter);
    monitor.controller().register_reporter_id("orders", reporter);

    let operation = monitor.controller().begin_operation();
    let ids = ["orders"];
    let query = TrackQuery::new().reporter(reporter).reporter_ids(&ids);
    info!(
        version = %operation.version(),
        should_track = operation.should_track(&query),
        "operation started"
    );

    // Workers
    let methods = Arc::new(Methods::new());
    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let monitor = Arc::clone(&monitor);
            let methods = Arc::clone(&methods);
            std::thread::Builder::new()
                .name(format!("worker-{}", worker))
                .spawn(move || {
                    for order in 0..25 {
                        process_order(&monitor, &methods, worker, order);
                    }
                })
        })
        .collect::<Result<_, _>>()?;

    // Toggle monitoring while the workers run
    for _ in 0..3 {
        std::thread::sleep(Duration::from_millis(2));
        monitor.controller().disable();
        std::thread::sleep(Duration::from_millis(2));
        monitor.controller().enable();
    }

    for worker in workers {
        if worker.join().is_err() {
            warn!("worker thread panicked");
        }
    }

    // Async continuation under an explicit parent
    let submit = CallRequest::new(&methods.submit).correlation_id("order-async");
    let outer = monitor.begin(&submit);
    let shipped = monitor
        .track_async(&CallRequest::new(&methods.reserve), |context| {
            let monitor = Arc::clone(&monitor);
            let audit = Arc::clone(&methods.audit);
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                monitor
                    .log_status_in(context, &CallRequest::new(&audit).correlation_id("shipped"))
                    .is_ok()
            }
        })
        .await;
    outer.finish()?;

    info!(
        shipped,
        superseded = !operation.should_track(&query),
        "workload finished"
    );

    let diagnostics = monitor.controller().diagnostics();
    println!("{}", diagnostics.report());
    println!("pool: {:?}", monitor.pool().stats());
    println!("events: {:?}", buffer.stats());
    println!("status: {}", serde_json::to_string_pretty(&monitor.controller().status())?);

    let sample: Vec<_> = buffer.drain().into_iter().take(3).collect();
    for record in sample {
        println!("{}", record.to_json()?);
    }

    info!(usage_errors = monitor.stack().usage_errors(), "Method monitor demo finished");
    Ok(())
}
