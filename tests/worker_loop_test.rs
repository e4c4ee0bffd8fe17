//! Worker-loop integration tests over the in-memory store. Submissions use
//! the executor-less `math` kind so no toolchain is involved; what is under
//! test is the loop itself: heartbeat, parsing, stale skip, publication.

use std::sync::Arc;

use codejudge::config::Config;
use codejudge::core::model::{
    ResultReason, Submission, SubmissionKind, SubmissionResult, WorkPayload,
};
use codejudge::infra::keys::KeySpace;
use codejudge::infra::queue::MemoryStore;
use codejudge::util::epoch_secs;
use codejudge::worker::WorkerLoop;

fn test_config() -> Arc<Config> {
    Arc::new(Config {
        work_queue_block_timeout: 1,
        ..Config::default()
    })
}

fn math_submission(sub_id: &str) -> Submission {
    Submission {
        sub_id: sub_id.into(),
        kind: SubmissionKind::Math,
        options: None,
        solution: "1 + 1".into(),
        input: None,
        expected_output: None,
    }
}

fn enqueue(store: &MemoryStore, keys: &KeySpace, payload: &WorkPayload) {
    let json = serde_json::to_string(payload).expect("payload json");
    seed(store, keys, &json);
}

fn seed(store: &MemoryStore, keys: &KeySpace, raw: &str) {
    let mut writer = store.clone();
    codejudge::infra::queue::BlockingStore::push(
        &mut writer,
        keys.work_queue(),
        &[raw.to_string()],
    )
    .expect("seed work queue");
}

fn published(store: &MemoryStore, keys: &KeySpace, work_id: &str) -> Vec<SubmissionResult> {
    store
        .list(&keys.result_queue(work_id))
        .iter()
        .map(|json| serde_json::from_str(json).expect("result json"))
        .collect()
}

#[test]
fn test_heartbeat_is_set_with_register_ttl() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();
    enqueue(
        &store,
        &keys,
        &WorkPayload::tagged("w-1".into(), false, math_submission("s-1")),
    );

    let mut worker = WorkerLoop::new(store.clone(), Arc::clone(&cfg));
    assert!(worker.tick().expect("tick"));

    let heartbeat = keys.worker_key(worker.worker_id());
    assert_eq!(store.ttl_of(&heartbeat), Some(cfg.worker_register_expire));
}

#[test]
fn test_executorless_kind_publishes_invalid_input() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();
    enqueue(
        &store,
        &keys,
        &WorkPayload::tagged("w-1".into(), false, math_submission("s-1")),
    );

    let mut worker = WorkerLoop::new(store.clone(), cfg);
    assert!(worker.tick().expect("tick"));

    let results = published(&store, &keys, "w-1");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].sub_id, "s-1");
    assert!(!results[0].success);
    assert_eq!(results[0].reason, ResultReason::InvalidInput);
}

#[test]
fn test_short_work_result_expires_with_short_ttl() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();
    enqueue(
        &store,
        &keys,
        &WorkPayload::tagged("w-1".into(), false, math_submission("s-1")),
    );

    let mut worker = WorkerLoop::new(store.clone(), Arc::clone(&cfg));
    worker.tick().expect("tick");
    assert_eq!(
        store.ttl_of(&keys.result_queue("w-1")),
        Some(cfg.result_expire)
    );
}

#[test]
fn test_long_batch_result_expires_with_long_ttl() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();
    enqueue(
        &store,
        &keys,
        &WorkPayload::tagged("{t}:0".into(), true, math_submission("s-1")),
    );

    let mut worker = WorkerLoop::new(store.clone(), Arc::clone(&cfg));
    worker.tick().expect("tick");
    assert_eq!(
        store.ttl_of(&keys.result_queue("{t}:0")),
        Some(cfg.result_long_batch_expire)
    );
}

#[test]
fn test_stale_short_work_is_skipped_without_reply() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();
    let mut payload = WorkPayload::tagged("w-1".into(), false, math_submission("s-1"));
    payload.timestamp = epoch_secs() - (cfg.max_queue_work_life_time as f64 + 1.0);
    enqueue(&store, &keys, &payload);

    let mut worker = WorkerLoop::new(store.clone(), cfg);
    assert!(worker.tick().expect("tick"), "payload was consumed");
    assert!(published(&store, &keys, "w-1").is_empty());
}

#[test]
fn test_stale_long_batch_work_is_still_judged() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();
    let mut payload = WorkPayload::tagged("{t}:0".into(), true, math_submission("s-1"));
    payload.timestamp = epoch_secs() - 1000.0;
    enqueue(&store, &keys, &payload);

    let mut worker = WorkerLoop::new(store.clone(), cfg);
    worker.tick().expect("tick");
    assert_eq!(published(&store, &keys, "{t}:0").len(), 1);
}

#[test]
fn test_unparseable_payload_with_ids_publishes_invalid_input() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();
    // timestamp has the wrong type, so schema validation fails
    seed(
        &store,
        &keys,
        r#"{"work_id":"w-9","timestamp":"soon","submission":{"sub_id":"s-9"}}"#,
    );

    let mut worker = WorkerLoop::new(store.clone(), cfg);
    worker.tick().expect("tick");

    let results = published(&store, &keys, "w-9");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].sub_id, "s-9");
    assert_eq!(results[0].reason, ResultReason::InvalidInput);
}

#[test]
fn test_unparseable_payload_without_ids_is_dropped() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();
    seed(&store, &keys, "not json at all");

    let mut worker = WorkerLoop::new(store.clone(), cfg);
    assert!(worker.tick().expect("tick"), "payload was consumed");
    // nothing published anywhere: the only key left is the heartbeat
    assert!(store.list(keys.work_queue()).is_empty());
}

#[test]
fn test_empty_queue_tick_reports_idle() {
    let cfg = Arc::new(Config {
        work_queue_block_timeout: 0,
        worker_register_expire: 120,
        ..Config::default()
    });
    let store = MemoryStore::new();
    let mut worker = WorkerLoop::new(store, cfg);
    assert!(!worker.tick().expect("tick"));
}

#[test]
fn test_exactly_one_result_per_payload() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();
    enqueue(
        &store,
        &keys,
        &WorkPayload::tagged("w-1".into(), false, math_submission("s-1")),
    );

    let mut worker = WorkerLoop::new(store.clone(), Arc::clone(&cfg));
    assert!(worker.tick().expect("first tick"));
    // queue is now empty; another tick must not publish anything new
    let cfg_fast = Arc::new(Config {
        work_queue_block_timeout: 0,
        ..Config::clone(&cfg)
    });
    let mut idle_worker = WorkerLoop::new(store.clone(), cfg_fast);
    assert!(!idle_worker.tick().expect("second tick"));
    assert_eq!(published(&store, &keys, "w-1").len(), 1);
}
