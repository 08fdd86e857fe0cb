#![allow(dead_code)]

use proptest::prelude::*;
use proptest::strategy::Just;
use tasker_dispatch::config::TaskerConfig;

/// Strategy for generating valid task type identifiers (no separators, no wildcards)
pub fn task_type_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_-]{0,31}"
}

/// Strategy for generating non-empty task type sets, possibly with duplicates
pub fn task_types_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(task_type_strategy(), 1..20)
}

/// Strategy for generating profile names
pub fn profile_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}"
}

/// Strategy for generating queue and exchange names
pub fn broker_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9.-]{0,40}"
}

/// Strategy for generating a configuration with one worker profile
pub fn worker_config_strategy() -> impl Strategy<Value = TaskerConfig> {
    (
        profile_name_strategy(),
        task_types_strategy(),
        broker_name_strategy(),
        broker_name_strategy(),
        broker_name_strategy(),
    )
        .prop_filter(
            "work and interrupt queues must differ",
            |(_, _, _, work, interrupt)| work != interrupt,
        )
        .prop_map(|(profile, tasks, exchange, work, interrupt)| {
            let mut config = TaskerConfig::default()
                .with_profile(profile.clone(), tasks)
                .with_worker(profile);
            config.exchange = exchange;
            config.work_queue_name = work;
            config.interrupt_queue_name = interrupt;
            config
        })
}

/// Strategy for generating task payloads
pub fn payload_strategy() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(serde_json::json!({})),
        Just(serde_json::json!({"to": "a@b.com"})),
        Just(serde_json::json!({"to": "+15550100", "body": "hi"})),
        Just(serde_json::json!({"nested": {"attempt": 3, "tags": ["a", "b"]}})),
        Just(serde_json::Value::Null),
    ]
}
