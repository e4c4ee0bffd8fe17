//! Coordinator integration tests over the in-memory store, with a task
//! standing in for the worker pool.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use codejudge::config::Config;
use codejudge::core::coordinator;
use codejudge::core::error::StoreError;
use codejudge::core::model::{
    BatchSubmission, ResultReason, Submission, SubmissionKind, SubmissionResult, WorkPayload,
};
use codejudge::infra::keys::KeySpace;
use codejudge::infra::queue::{MemoryStore, Popped, Store};

fn test_config() -> Config {
    Config {
        max_queue_wait_time: 1,
        long_batch_max_queue_wait_time: 2,
        ..Config::default()
    }
}

fn submission(tag: &str) -> Submission {
    Submission {
        sub_id: format!("sub-{tag}"),
        kind: SubmissionKind::Python,
        options: None,
        solution: "print(input())".into(),
        input: Some("a".into()),
        expected_output: Some("a".into()),
    }
}

fn ok_result(sub_id: &str) -> SubmissionResult {
    SubmissionResult {
        sub_id: sub_id.to_string(),
        success: true,
        run_success: true,
        cost: 0.1,
        stdout: Some("a\n".into()),
        stderr: Some(String::new()),
        reason: ResultReason::Unspecified,
    }
}

/// A worker stand-in: pops payloads and answers according to `reply`.
fn spawn_worker<F>(
    store: MemoryStore,
    keys: KeySpace,
    reply: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(&WorkPayload) -> Option<SubmissionResult> + Send + 'static,
{
    tokio::spawn(async move {
        let work_queue = vec![keys.work_queue().to_string()];
        while let Some((_, json)) = Store::block_pop(&store, &work_queue, 5.0)
            .await
            .expect("pop work")
        {
            let payload: WorkPayload = serde_json::from_str(&json).expect("payload json");
            if let Some(result) = reply(&payload) {
                let result_queue = keys.result_queue(&payload.work_id);
                let result_json = serde_json::to_string(&result).expect("result json");
                Store::push(&store, &result_queue, &[result_json])
                    .await
                    .expect("push result");
                Store::expire(&store, &result_queue, 60).await.expect("expire");
            }
        }
    })
}

#[tokio::test]
async fn test_single_submission_round_trip() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();
    let _worker = spawn_worker(store.clone(), keys.clone(), |payload| {
        Some(ok_result(&payload.submission.sub_id))
    });

    let result = coordinator::judge(&store, &cfg, &keys, submission("1")).await;
    assert!(result.success);
    assert!(result.run_success);
    assert_eq!(result.sub_id, "sub-1");
    assert_eq!(result.reason, ResultReason::Unspecified);
}

#[tokio::test]
async fn test_single_timeout_when_no_worker_answers() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();

    let started = Instant::now();
    let result = coordinator::judge(&store, &cfg, &keys, submission("1")).await;
    let elapsed = started.elapsed();

    assert!(!result.success);
    assert_eq!(result.reason, ResultReason::QueueTimeout);
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(3), "deadline overshoot: {elapsed:?}");
}

#[tokio::test]
async fn test_slow_failure_is_reclassified_as_worker_timeout() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();
    let limit = cfg.max_execution_time as f64;
    let _worker = spawn_worker(store.clone(), keys.clone(), move |payload| {
        Some(SubmissionResult {
            success: false,
            run_success: false,
            cost: limit,
            ..ok_result(&payload.submission.sub_id)
        })
    });

    let result = coordinator::judge(&store, &cfg, &keys, submission("1")).await;
    assert!(!result.success);
    assert_eq!(result.reason, ResultReason::WorkerTimeout);
}

#[tokio::test]
async fn test_result_queue_is_deleted_after_read() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_worker = Arc::clone(&seen);
    let _worker = spawn_worker(store.clone(), keys.clone(), move |payload| {
        seen_in_worker.lock().unwrap().push(payload.work_id.clone());
        Some(ok_result(&payload.submission.sub_id))
    });

    let result = coordinator::judge(&store, &cfg, &keys, submission("1")).await;
    assert!(result.success);
    let work_ids = seen.lock().unwrap().clone();
    assert_eq!(work_ids.len(), 1);
    let result_queue = keys.result_queue(&work_ids[0]);
    assert!(store.list(&result_queue).is_empty());
    assert_eq!(store.ttl_of(&result_queue), None);
}

#[tokio::test]
async fn test_batch_preserves_submission_order() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();
    let _worker = spawn_worker(store.clone(), keys.clone(), |payload| {
        Some(ok_result(&payload.submission.sub_id))
    });

    let batch = BatchSubmission {
        sub_id: "batch-1".into(),
        kind: Default::default(),
        submissions: (0..5).map(|i| submission(&i.to_string())).collect(),
    };
    let response = coordinator::judge_batch(&store, &cfg, &keys, batch, false).await;

    assert_eq!(response.sub_id, "batch-1");
    assert_eq!(response.results.len(), 5);
    for (i, result) in response.results.iter().enumerate() {
        assert_eq!(result.sub_id, format!("sub-{i}"));
        assert!(result.success);
    }
}

#[tokio::test]
async fn test_batch_work_ids_share_one_hash_tag() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_worker = Arc::clone(&seen);
    let _worker = spawn_worker(store.clone(), keys.clone(), move |payload| {
        seen_in_worker.lock().unwrap().push(payload.work_id.clone());
        Some(ok_result(&payload.submission.sub_id))
    });

    let batch = BatchSubmission {
        sub_id: "batch-1".into(),
        kind: Default::default(),
        submissions: (0..4).map(|i| submission(&i.to_string())).collect(),
    };
    let response = coordinator::judge_batch(&store, &cfg, &keys, batch, false).await;
    assert_eq!(response.results.len(), 4);

    let mut work_ids = seen.lock().unwrap().clone();
    work_ids.sort();
    assert_eq!(work_ids.len(), 4);
    let tag = work_ids[0].split(':').next().expect("tag").to_string();
    assert!(tag.starts_with('{') && tag.ends_with('}'));
    for (i, work_id) in work_ids.iter().enumerate() {
        assert_eq!(*work_id, format!("{tag}:{i}"));
    }
}

#[tokio::test]
async fn test_batch_mixes_answers_and_queue_timeouts_within_deadline() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);
    let store = MemoryStore::new();
    // even-index items never produce a result, odd ones answer promptly
    let _worker = spawn_worker(store.clone(), keys.clone(), |payload| {
        let index: usize = payload
            .work_id
            .rsplit(':')
            .next()
            .and_then(|s| s.parse().ok())
            .expect("indexed work id");
        (index % 2 == 1).then(|| ok_result(&payload.submission.sub_id))
    });

    let batch = BatchSubmission {
        sub_id: "batch-1".into(),
        kind: Default::default(),
        submissions: (0..6).map(|i| submission(&i.to_string())).collect(),
    };
    let started = Instant::now();
    let response = coordinator::judge_batch(&store, &cfg, &keys, batch, false).await;
    let elapsed = started.elapsed();

    assert_eq!(response.results.len(), 6);
    for (i, result) in response.results.iter().enumerate() {
        assert_eq!(result.sub_id, format!("sub-{i}"));
        if i % 2 == 1 {
            assert!(result.success, "odd item {i} should pass");
            assert!(result.run_success);
        } else {
            assert!(!result.success, "even item {i} should time out");
            assert!(!result.run_success);
            assert_eq!(result.reason, ResultReason::QueueTimeout);
        }
    }
    // the chunk budget is shared: the whole batch respects the deadline
    assert!(elapsed < Duration::from_secs(4), "deadline overshoot: {elapsed:?}");
}

/// A store whose every call fails, for the top-level error path.
struct FailingStore;

fn down<T>() -> Result<T, StoreError> {
    Err(StoreError::Pool("store offline".into()))
}

#[async_trait]
impl Store for FailingStore {
    async fn push(&self, _: &str, _: &[String]) -> Result<(), StoreError> {
        down()
    }
    async fn pop(&self, _: &str) -> Result<Option<String>, StoreError> {
        down()
    }
    async fn pop_multi(&self, _: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        down()
    }
    async fn block_pop(&self, _: &[String], _: f64) -> Result<Option<Popped>, StoreError> {
        down()
    }
    async fn peek(&self, _: &str) -> Result<Option<String>, StoreError> {
        down()
    }
    async fn delete(&self, _: &[String]) -> Result<(), StoreError> {
        down()
    }
    async fn expire(&self, _: &str, _: u64) -> Result<(), StoreError> {
        down()
    }
    async fn set(&self, _: &str, _: &str, _: Option<u64>) -> Result<(), StoreError> {
        down()
    }
    async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
        down()
    }
    async fn llen(&self, _: &str) -> Result<u64, StoreError> {
        down()
    }
    async fn scan_count(&self, _: &str) -> Result<u64, StoreError> {
        down()
    }
    async fn time(&self) -> Result<f64, StoreError> {
        down()
    }
    async fn ping(&self) -> Result<(), StoreError> {
        down()
    }
}

#[tokio::test]
async fn test_store_outage_yields_internal_errors_of_correct_length() {
    let cfg = test_config();
    let keys = KeySpace::new(&cfg.redis_key_prefix);

    let single = coordinator::judge(&FailingStore, &cfg, &keys, submission("1")).await;
    assert!(!single.success);
    assert_eq!(single.reason, ResultReason::InternalError);

    let batch = BatchSubmission {
        sub_id: "batch-1".into(),
        kind: Default::default(),
        submissions: (0..3).map(|i| submission(&i.to_string())).collect(),
    };
    let response = coordinator::judge_batch(&FailingStore, &cfg, &keys, batch, true).await;
    assert_eq!(response.results.len(), 3);
    for (i, result) in response.results.iter().enumerate() {
        assert_eq!(result.sub_id, format!("sub-{i}"));
        assert_eq!(result.reason, ResultReason::InternalError);
    }
}
