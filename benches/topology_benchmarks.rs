use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use tasker_dispatch::config::{InterruptPolicyKind, TaskerConfig};
use tasker_dispatch::messaging::{Delivery, ReceiptHandle, TaskMessage};
use tasker_dispatch::profile::WorkerProfile;
use tasker_dispatch::registry::{handler_fn, InterruptTracker, TaskCompletion, TaskHandlerRegistry};
use tasker_dispatch::topology::{RoutingKey, TopologyBuilder};

fn benchmark_topology_build(c: &mut Criterion) {
    let task_types: Vec<String> = (0..200).map(|i| format!("task{i}")).collect();
    let profile = WorkerProfile::new("large", task_types);
    let config = TaskerConfig::default();

    c.bench_function("topology_build_200_task_types", |b| {
        b.iter(|| TopologyBuilder::build(black_box(&profile), black_box(&config)))
    });
}

fn benchmark_routing_key_parse(c: &mut Criterion) {
    c.bench_function("routing_key_parse", |b| {
        b.iter(|| {
            RoutingKey::parse(black_box("sendEmail"));
            RoutingKey::parse(black_box("sendEmail.interrupt"))
        })
    });
}

fn benchmark_dispatch(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let registry = TaskHandlerRegistry::new(Arc::new(InterruptTracker::new(
        InterruptPolicyKind::Buffer,
        std::time::Duration::from_secs(30),
    )));
    registry
        .register(
            "sendEmail",
            handler_fn(|_task, _interrupt| async { Ok(TaskCompletion::completed()) }),
        )
        .expect("register");

    let delivery = Delivery {
        queue: "tasker-work-q".to_string(),
        exchange: "tasker-work-x".to_string(),
        routing_key: "sendEmail".to_string(),
        body: TaskMessage::new("sendEmail", "inst-1", json!({"to": "a@b.com"}))
            .to_bytes()
            .expect("encode"),
        receipt_handle: ReceiptHandle::from(1u64),
        redelivered: false,
    };

    c.bench_function("registry_dispatch_work", |b| {
        b.iter(|| runtime.block_on(registry.dispatch(black_box(&delivery))))
    });
}

criterion_group!(
    benches,
    benchmark_topology_build,
    benchmark_routing_key_parse,
    benchmark_dispatch
);
criterion_main!(benches);
