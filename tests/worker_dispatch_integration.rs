//! End-to-end dispatch on the in-memory broker: publish through the client,
//! consume through the worker runtime, and inspect how deliveries settle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::builders::*;
use serde_json::json;
use tasker_dispatch::config::InterruptPolicyKind;
use tasker_dispatch::messaging::BrokerAdapter;
use tasker_dispatch::profile::WorkerProfile;
use tasker_dispatch::registry::TaskCompletion;
use tasker_dispatch::topology::{Binding, TopologyBuilder};
use tasker_dispatch::{handler_fn, ClientState, TaskerError, TaskerSystem, WorkerRuntime};

const WORK_QUEUE: &str = "tasker-work-q";
const INTERRUPT_QUEUE: &str = "tasker-interrupt-q";

fn binding(queue: &str, routing_key: &str) -> Binding {
    Binding {
        exchange: "tasker-work-x".to_string(),
        queue: queue.to_string(),
        routing_key: routing_key.to_string(),
    }
}

#[tokio::test]
async fn test_emailer_topology_is_declared_on_bootstrap() {
    let config = emailer_config();
    let registry = registry_for(&config);
    let recorder = Recorder::default();
    registry.register("sendEmail", recorder.completing()).unwrap();
    registry.register("sendSms", recorder.completing()).unwrap();

    let provider = in_memory_provider();
    let system = TaskerSystem::bootstrap_with_provider(config, registry, Arc::clone(&provider))
        .await
        .unwrap();

    assert!(system.is_worker());
    let broker = broker(&provider);
    assert!(broker.has_exchange("tasker-work-x"));
    assert!(broker.has_queue(WORK_QUEUE));
    assert!(broker.has_queue(INTERRUPT_QUEUE));

    let expected = [
        binding(WORK_QUEUE, "sendEmail"),
        binding(WORK_QUEUE, "sendSms"),
        binding(INTERRUPT_QUEUE, "sendEmail.interrupt"),
        binding(INTERRUPT_QUEUE, "sendSms.interrupt"),
    ]
    .into_iter()
    .collect();
    assert_eq!(broker.bindings(), expected);

    let worker = system.worker().unwrap();
    assert_eq!(worker.profile().name(), "emailer");
    assert!(worker.is_running());

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_enqueue_invokes_handler_exactly_once() {
    let config = emailer_config();
    let registry = registry_for(&config);
    let email = Recorder::default();
    let sms = Recorder::default();
    registry.register("sendEmail", email.completing()).unwrap();
    registry.register("sendSms", sms.completing()).unwrap();

    let provider = in_memory_provider();
    let system = TaskerSystem::bootstrap_with_provider(config, registry, Arc::clone(&provider))
        .await
        .unwrap();

    let receipt = system
        .client()
        .enqueue("sendEmail", "inst-1", json!({"to": "a@b.com"}))
        .await
        .unwrap();
    assert_eq!(receipt.routing_key, "sendEmail");

    assert!(eventually(|| email.count() == 1).await);
    let broker = broker(&provider);
    assert!(eventually(|| broker.unacked_count(WORK_QUEUE) == 0).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(email.count(), 1);
    assert_eq!(sms.count(), 0);

    let task = &email.tasks()[0];
    assert_eq!(task.instance_id, "inst-1");
    assert_eq!(task.payload, json!({"to": "a@b.com"}));
    assert_eq!(task.metadata.message_id, receipt.message_id);
    assert_eq!(broker.queue_depth(WORK_QUEUE), 0);
    assert!(broker.dead_letters().is_empty());

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_interrupt_reaches_running_handler() {
    let config = emailer_config();
    let registry = registry_for(&config);
    let email = Recorder::default();
    registry
        .register("sendEmail", email.interruptible(Duration::from_secs(30)))
        .unwrap();
    registry
        .register("sendSms", Recorder::default().completing())
        .unwrap();

    let provider = in_memory_provider();
    let system = TaskerSystem::bootstrap_with_provider(config, registry, Arc::clone(&provider))
        .await
        .unwrap();
    let client = system.client();

    client
        .enqueue("sendEmail", "inst-1", json!({"to": "a@b.com"}))
        .await
        .unwrap();
    assert!(eventually(|| email.count() == 1).await);

    let receipt = client
        .interrupt("sendEmail", "inst-1", "user-cancelled")
        .await
        .unwrap();
    assert_eq!(receipt.routing_key, "sendEmail.interrupt");

    assert!(eventually(|| email.interrupts().len() == 1).await);
    assert_eq!(email.interrupts()[0].reason, "user-cancelled");

    let broker = broker(&provider);
    assert!(eventually(|| broker.unacked_count(WORK_QUEUE) == 0).await);
    assert!(eventually(|| broker.unacked_count(INTERRUPT_QUEUE) == 0).await);
    assert!(broker.dead_letters().is_empty());

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_interrupt_for_other_instance_is_ignored_by_running_handler() {
    let config = emailer_config();
    let registry = registry_for(&config);
    let email = Recorder::default();
    registry
        .register("sendEmail", email.interruptible(Duration::from_millis(300)))
        .unwrap();
    registry
        .register("sendSms", Recorder::default().completing())
        .unwrap();

    let provider = in_memory_provider();
    let system = TaskerSystem::bootstrap_with_provider(config, registry, Arc::clone(&provider))
        .await
        .unwrap();
    let client = system.client();

    client.enqueue("sendEmail", "inst-1", json!({})).await.unwrap();
    assert!(eventually(|| email.count() == 1).await);
    client.interrupt("sendEmail", "inst-2", "wrong instance").await.unwrap();
    client.interrupt("sendSms", "inst-1", "wrong task type").await.unwrap();

    let broker = broker(&provider);
    let settled = || broker.unacked_count(WORK_QUEUE) == 0 && broker.queue_depth(WORK_QUEUE) == 0;
    assert!(eventually(settled).await);
    assert_eq!(email.count(), 1);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(email.interrupts().is_empty());

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_buffered_interrupt_applies_to_task_started_later() {
    let config = with_interrupt_policy(emailer_config(), InterruptPolicyKind::Buffer, 60_000);
    let registry = registry_for(&config);
    let email = Recorder::default();
    registry
        .register("sendEmail", email.interruptible(Duration::from_secs(30)))
        .unwrap();
    registry
        .register("sendSms", Recorder::default().completing())
        .unwrap();

    let provider = in_memory_provider();
    let system = TaskerSystem::bootstrap_with_provider(
        config,
        Arc::clone(&registry),
        Arc::clone(&provider),
    )
    .await
    .unwrap();
    let client = system.client();

    client
        .interrupt("sendEmail", "inst-1", "cancelled before start")
        .await
        .unwrap();
    assert!(eventually(|| registry.interrupts().pending_count() == 1).await);

    client.enqueue("sendEmail", "inst-1", json!({})).await.unwrap();
    assert!(eventually(|| email.interrupts().len() == 1).await);
    assert_eq!(email.interrupts()[0].reason, "cancelled before start");

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dropped_interrupt_does_not_affect_task_started_later() {
    let config = with_interrupt_policy(emailer_config(), InterruptPolicyKind::Drop, 0);
    let registry = registry_for(&config);
    let email = Recorder::default();
    registry
        .register("sendEmail", email.interruptible(Duration::from_millis(100)))
        .unwrap();
    registry
        .register("sendSms", Recorder::default().completing())
        .unwrap();

    let provider = in_memory_provider();
    let system = TaskerSystem::bootstrap_with_provider(
        config,
        Arc::clone(&registry),
        Arc::clone(&provider),
    )
    .await
    .unwrap();
    let client = system.client();
    let broker = broker(&provider);

    client.interrupt("sendEmail", "inst-1", "too early").await.unwrap();
    let drained = |queue| broker.queue_depth(queue) == 0 && broker.unacked_count(queue) == 0;
    assert!(eventually(|| drained(INTERRUPT_QUEUE)).await);
    assert_eq!(registry.interrupts().pending_count(), 0);

    client.enqueue("sendEmail", "inst-1", json!({})).await.unwrap();
    assert!(eventually(|| email.count() == 1).await);
    assert!(eventually(|| drained(WORK_QUEUE)).await);
    assert!(email.interrupts().is_empty());

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unregistered_task_type_is_dead_lettered() {
    let config = emailer_config();
    let registry = registry_for(&config);
    let email = Recorder::default();
    registry.register("sendEmail", email.completing()).unwrap();
    registry.register("sendSms", email.completing()).unwrap();

    let provider = in_memory_provider();
    let system = TaskerSystem::bootstrap_with_provider(
        config.clone(),
        registry,
        Arc::clone(&provider),
    )
    .await
    .unwrap();

    // another profile bound onto the same queues
    let imaging = WorkerProfile::new("imaging", ["resizeImage"]);
    let foreign = TopologyBuilder::build(&imaging, &config).unwrap();
    provider.declare_topology(&foreign).await.unwrap();

    system
        .client()
        .enqueue("resizeImage", "img-1", json!({"width": 100}))
        .await
        .unwrap();

    let broker = broker(&provider);
    assert!(eventually(|| broker.dead_letters().len() == 1).await);
    let dead = &broker.dead_letters()[0];
    assert_eq!(dead.routing_key, "resizeImage");
    assert_eq!(dead.queue, WORK_QUEUE);
    assert_eq!(email.count(), 0);
    assert_eq!(broker.queue_depth(WORK_QUEUE), 0);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_undecodable_body_is_dead_lettered() {
    let config = emailer_config();
    let registry = registry_for(&config);
    let email = Recorder::default();
    registry.register("sendEmail", email.completing()).unwrap();
    registry.register("sendSms", email.completing()).unwrap();

    let provider = in_memory_provider();
    let system = TaskerSystem::bootstrap_with_provider(config, registry, Arc::clone(&provider))
        .await
        .unwrap();

    provider
        .publish("tasker-work-x", "sendEmail", b"{not json")
        .await
        .unwrap();

    let broker = broker(&provider);
    assert!(eventually(|| broker.dead_letters().len() == 1).await);
    assert_eq!(email.count(), 0);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failing_handler_is_rejected_without_requeue_by_default() {
    let config = emailer_config();
    let registry = registry_for(&config);
    let sms = Recorder::default();
    registry
        .register("sendEmail", Recorder::default().completing())
        .unwrap();
    registry.register("sendSms", sms.failing()).unwrap();

    let provider = in_memory_provider();
    let system = TaskerSystem::bootstrap_with_provider(config, registry, Arc::clone(&provider))
        .await
        .unwrap();

    system
        .client()
        .enqueue("sendSms", "sms-1", json!({"to": "+15550100"}))
        .await
        .unwrap();

    let broker = broker(&provider);
    assert!(eventually(|| broker.dead_letters().len() == 1).await);
    assert_eq!(sms.count(), 1);
    assert!(!broker.dead_letters()[0].redelivered);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failing_handler_is_requeued_once_when_configured() {
    let mut config = emailer_config();
    config.consumers.requeue_on_failure = true;
    let registry = registry_for(&config);
    let sms = Recorder::default();
    registry
        .register("sendEmail", Recorder::default().completing())
        .unwrap();
    registry.register("sendSms", sms.failing()).unwrap();

    let provider = in_memory_provider();
    let system = TaskerSystem::bootstrap_with_provider(config, registry, Arc::clone(&provider))
        .await
        .unwrap();

    system
        .client()
        .enqueue("sendSms", "sms-1", json!({}))
        .await
        .unwrap();

    let broker = broker(&provider);
    assert!(eventually(|| broker.dead_letters().len() == 1).await);
    assert_eq!(sms.count(), 2);
    assert!(broker.dead_letters()[0].redelivered);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_fails_fast_on_missing_handlers() {
    let config = emailer_config();
    let registry = registry_for(&config);
    registry
        .register("sendEmail", Recorder::default().completing())
        .unwrap();

    let provider = in_memory_provider();
    let error = TaskerSystem::bootstrap_with_provider(
        config,
        Arc::clone(&registry),
        Arc::clone(&provider),
    )
    .await
    .unwrap_err();

    match error {
        TaskerError::ConfigurationError(message) => assert!(message.contains("sendSms")),
        other => panic!("expected ConfigurationError, got {other:?}"),
    }
    assert!(!broker(&provider).has_queue(WORK_QUEUE));
    assert!(!registry.is_sealed());
}

#[tokio::test]
async fn test_worker_runtime_rejects_empty_profile() {
    let config = emailer_config()
        .with_profile("idle", Vec::<String>::new())
        .with_worker("idle");
    let registry = registry_for(&config);

    let error = WorkerRuntime::start(&config, registry, in_memory_provider())
        .await
        .unwrap_err();
    assert!(matches!(error, TaskerError::ConfigurationError(_)));
}

#[tokio::test]
async fn test_failed_declare_leaves_registry_open() {
    let config = emailer_config();
    let registry = registry_for(&config);
    let recorder = Recorder::default();
    registry.register("sendEmail", recorder.completing()).unwrap();
    registry.register("sendSms", recorder.completing()).unwrap();

    let provider = in_memory_provider();
    provider.close().await.unwrap();

    let error = WorkerRuntime::start(&config, Arc::clone(&registry), provider)
        .await
        .unwrap_err();
    assert!(matches!(error, TaskerError::Messaging(_)), "{error:?}");
    assert!(!registry.is_sealed());
    registry.register("resizeImage", recorder.completing()).unwrap();
}

#[tokio::test]
async fn test_publisher_starts_beside_idle_profile() {
    let mut config = emailer_config().with_profile("idle", Vec::<String>::new());
    config.worker = None;
    let registry = registry_for(&config);

    let provider = in_memory_provider();
    let system = TaskerSystem::bootstrap_with_provider(config, registry, Arc::clone(&provider))
        .await
        .unwrap();

    assert!(!system.is_worker());
    system
        .client()
        .enqueue("sendEmail", "inst-1", json!({"to": "a@b.com"}))
        .await
        .unwrap();
    let published = broker(&provider).published_with_key("sendEmail");
    assert_eq!(published.len(), 1);
    let body = published[0].body_json().unwrap();
    assert_eq!(body["instance_id"], "inst-1");
    assert_eq!(body["payload"], json!({"to": "a@b.com"}));

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_repeated_task_types_bind_once() {
    let config = emailer_config().with_profile("emailer", ["sendEmail", "sendEmail"]);
    let registry = registry_for(&config);
    let recorder = Recorder::default();
    registry.register("sendEmail", recorder.completing()).unwrap();

    let provider = in_memory_provider();
    let system = TaskerSystem::bootstrap_with_provider(config, registry, Arc::clone(&provider))
        .await
        .unwrap();

    let expected = [
        binding(WORK_QUEUE, "sendEmail"),
        binding(INTERRUPT_QUEUE, "sendEmail.interrupt"),
    ]
    .into_iter()
    .collect();
    assert_eq!(broker(&provider).bindings(), expected);
    assert_eq!(system.worker().unwrap().profile().task_types(), ["sendEmail"]);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_publisher_only_process_does_not_consume() {
    let mut config = emailer_config();
    config.worker = None;
    let registry = registry_for(&config);

    let provider = in_memory_provider();
    let system = TaskerSystem::bootstrap_with_provider(
        config.clone(),
        Arc::clone(&registry),
        Arc::clone(&provider),
    )
    .await
    .unwrap();

    assert!(!system.is_worker());
    assert!(!registry.is_sealed());
    let broker = broker(&provider);
    assert!(broker.has_exchange("tasker-work-x"));
    assert!(!broker.has_queue(WORK_QUEUE));

    let unknown = config.with_worker("nonexistent");
    let runtime = WorkerRuntime::start(&unknown, registry, Arc::clone(&provider))
        .await
        .unwrap();
    assert!(runtime.is_none());

    system
        .client()
        .enqueue("sendEmail", "inst-1", json!({}))
        .await
        .unwrap();
    assert_eq!(broker.published_with_key("sendEmail").len(), 1);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_registration_after_start_is_rejected() {
    let config = emailer_config();
    let registry = registry_for(&config);
    registry
        .register("sendEmail", Recorder::default().completing())
        .unwrap();
    registry
        .register("sendSms", Recorder::default().completing())
        .unwrap();

    let system = TaskerSystem::bootstrap_with_provider(
        config,
        Arc::clone(&registry),
        in_memory_provider(),
    )
    .await
    .unwrap();

    let late = registry.register(
        "resizeImage",
        handler_fn(|_task, _interrupt| async { Ok(TaskCompletion::completed()) }),
    );
    assert!(matches!(late, Err(TaskerError::ConfigurationError(_))));

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_handlers() {
    let config = emailer_config();
    let registry = registry_for(&config);
    let email = Recorder::default();
    registry
        .register("sendEmail", email.interruptible(Duration::from_millis(200)))
        .unwrap();
    registry
        .register("sendSms", Recorder::default().completing())
        .unwrap();

    let provider = in_memory_provider();
    let system = TaskerSystem::bootstrap_with_provider(config, registry, Arc::clone(&provider))
        .await
        .unwrap();
    let client = Arc::clone(system.client());

    client.enqueue("sendEmail", "inst-1", json!({})).await.unwrap();
    assert!(eventually(|| email.count() == 1).await);

    within(system.shutdown()).await.unwrap();

    let broker = broker(&provider);
    assert_eq!(broker.unacked_count(WORK_QUEUE), 0);
    assert!(broker.dead_letters().is_empty());
    assert_eq!(client.state(), ClientState::ShutDown);

    let error = client.enqueue("sendEmail", "inst-2", json!({})).await.unwrap_err();
    assert!(matches!(error, TaskerError::NotConnected));
}
