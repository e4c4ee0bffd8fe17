//! Request-side coordination: enqueue work, collect results, enforce
//! deadlines.
//!
//! The coordinator is plain async code whose only suspension points are store
//! calls; between them no shared state is touched, so many requests can
//! multiplex on one runtime without locks.

use std::time::Instant;

use tracing::{error, warn};

use crate::config::Config;
use crate::core::error::StoreError;
use crate::core::model::{
    BatchSubmission, BatchSubmissionResult, ResultReason, Submission, SubmissionResult,
    WorkPayload,
};
use crate::infra::keys::KeySpace;
use crate::infra::queue::{Popped, Store};
use crate::util::clock::epoch_secs;

/// Warm-up probes against the store clock.
const CLOCK_PROBES: usize = 10;
/// Skew beyond this is worth an operator's attention.
const MAX_CLOCK_SKEW_SECS: f64 = 1.0;

/// Judge one submission: enqueue, wait for its result queue, clean up.
pub async fn judge<S: Store + ?Sized>(
    store: &S,
    cfg: &Config,
    keys: &KeySpace,
    submission: Submission,
) -> SubmissionResult {
    let started = Instant::now();
    let sub_id = submission.sub_id.clone();
    match judge_inner(store, cfg, keys, submission).await {
        Ok(result) => result,
        Err(err) => {
            error!(sub_id = %sub_id, error = %err, "failed to judge submission");
            SubmissionResult::failure(
                sub_id,
                started.elapsed().as_secs_f64(),
                ResultReason::InternalError,
            )
        }
    }
}

async fn judge_inner<S: Store + ?Sized>(
    store: &S,
    cfg: &Config,
    keys: &KeySpace,
    submission: Submission,
) -> Result<SubmissionResult, StoreError> {
    let started = Instant::now();
    let sub_id = submission.sub_id.clone();
    let payload = WorkPayload::new(submission);
    let payload_json = serde_json::to_string(&payload)?;
    let result_queue = keys.result_queue(&payload.work_id);
    store
        .push(keys.work_queue(), std::slice::from_ref(&payload_json))
        .await?;
    let popped = store
        .block_pop(
            std::slice::from_ref(&result_queue),
            cfg.max_queue_wait_time as f64,
        )
        .await?;
    store.delete(std::slice::from_ref(&result_queue)).await?;
    Ok(to_result(cfg, &sub_id, started, popped.map(|(_, v)| v)))
}

/// Judge a whole batch; `long_batch` selects the extended deadline and the
/// larger chunk size. The response always has one result per submitted item,
/// in submission order.
pub async fn judge_batch<S: Store + ?Sized>(
    store: &S,
    cfg: &Config,
    keys: &KeySpace,
    batch: BatchSubmission,
    long_batch: bool,
) -> BatchSubmissionResult {
    let BatchSubmission {
        sub_id,
        submissions,
        ..
    } = batch;
    let sub_ids: Vec<String> = submissions.iter().map(|s| s.sub_id.clone()).collect();
    match judge_batch_inner(store, cfg, keys, submissions, long_batch).await {
        Ok(results) => BatchSubmissionResult { sub_id, results },
        Err(err) => {
            error!(sub_id = %sub_id, error = %err, "failed to judge batch");
            BatchSubmissionResult {
                sub_id,
                results: sub_ids
                    .into_iter()
                    .map(|id| SubmissionResult::failure(id, 0.0, ResultReason::InternalError))
                    .collect(),
            }
        }
    }
}

async fn judge_batch_inner<S: Store + ?Sized>(
    store: &S,
    cfg: &Config,
    keys: &KeySpace,
    submissions: Vec<Submission>,
    long_batch: bool,
) -> Result<Vec<SubmissionResult>, StoreError> {
    let started = Instant::now();
    let (max_wait_time, chunk_size) = if long_batch {
        (
            cfg.long_batch_max_queue_wait_time,
            cfg.max_long_batch_chunk_size,
        )
    } else {
        (cfg.max_queue_wait_time, cfg.max_batch_chunk_size)
    };
    let chunk_size = chunk_size.max(1);

    // one shared hash tag keeps every result queue of the batch in one
    // cluster slot, which is what makes the multi-key pops below legal
    let tag = KeySpace::batch_tag();
    let payloads: Vec<WorkPayload> = submissions
        .into_iter()
        .enumerate()
        .map(|(index, sub)| {
            WorkPayload::tagged(KeySpace::batch_work_id(&tag, index), long_batch, sub)
        })
        .collect();

    // enqueue everything up front, one variadic append per chunk
    for chunk in payloads.chunks(chunk_size) {
        let jsons = chunk
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        store.push(keys.work_queue(), &jsons).await?;
    }

    let mut results = Vec::with_capacity(payloads.len());
    for chunk in payloads.chunks(chunk_size) {
        let left = max_wait_time as f64 - started.elapsed().as_secs_f64();
        results.extend(collect_chunk(store, cfg, keys, chunk, left, started).await?);
    }
    Ok(results)
}

/// Collect one chunk's results within `budget` seconds.
///
/// Fast path: a pipelined non-blocking pop over every outstanding queue.
/// Slow path: one capped blocking pop, so the loop periodically re-evaluates
/// the head-of-queue check below even during a long wait.
async fn collect_chunk<S: Store + ?Sized>(
    store: &S,
    cfg: &Config,
    keys: &KeySpace,
    chunk: &[WorkPayload],
    budget: f64,
    batch_started: Instant,
) -> Result<Vec<SubmissionResult>, StoreError> {
    let collect_started = Instant::now();
    let queue_names: Vec<String> = chunk
        .iter()
        .map(|payload| keys.result_queue(&payload.work_id))
        .collect();
    let mut collected: Vec<Option<SubmissionResult>> = vec![None; chunk.len()];
    let mut outstanding: Vec<usize> = (0..chunk.len()).collect();
    let mut left = budget;
    let mut working_since: Option<Instant> = None;

    while !outstanding.is_empty() {
        let max_timestamp = outstanding
            .iter()
            .map(|&i| chunk[i].timestamp)
            .fold(f64::MIN, f64::max);
        let names: Vec<String> = outstanding
            .iter()
            .map(|&i| queue_names[i].clone())
            .collect();
        let hits = pop_results(store, cfg, &names, left).await?;
        if hits.is_empty() {
            match working_since {
                None => {
                    // distinguish "queue is long" from "our chunk was handed
                    // out and the results are simply not coming"
                    match store.peek(keys.work_queue()).await? {
                        None => working_since = Some(Instant::now()),
                        Some(head_json) => {
                            let head: WorkPayload = serde_json::from_str(&head_json)?;
                            if head.timestamp > max_timestamp {
                                working_since = Some(Instant::now());
                            }
                        }
                    }
                }
                Some(since) => {
                    if since.elapsed().as_secs_f64() > cfg.max_queue_wait_time as f64 {
                        warn!(
                            outstanding = outstanding.len(),
                            "chunk was handed out but produced nothing; giving up on the rest"
                        );
                        warn!("this usually means the store dropped data (OOM or failover)");
                        break;
                    }
                }
            }
        } else {
            working_since = None;
            for (queue_name, value) in hits {
                let position = outstanding
                    .iter()
                    .position(|&i| queue_names[i] == queue_name);
                if let Some(position) = position {
                    let index = outstanding.swap_remove(position);
                    collected[index] = Some(to_result(
                        cfg,
                        &chunk[index].submission.sub_id,
                        batch_started,
                        Some(value),
                    ));
                }
            }
        }
        left = budget - collect_started.elapsed().as_secs_f64();
        if left <= 0.0 {
            break;
        }
    }

    // whatever is still outstanding timed out in the queue
    let results = collected
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| {
                to_result(cfg, &chunk[index].submission.sub_id, batch_started, None)
            })
        })
        .collect();
    store.delete(&queue_names).await?;
    Ok(results)
}

async fn pop_results<S: Store + ?Sized>(
    store: &S,
    cfg: &Config,
    queues: &[String],
    left: f64,
) -> Result<Vec<Popped>, StoreError> {
    let popped = store.pop_multi(queues).await?;
    let mut hits: Vec<Popped> = queues
        .iter()
        .cloned()
        .zip(popped)
        .filter_map(|(queue, value)| value.map(|value| (queue, value)))
        .collect();
    if hits.is_empty() && left > 0.0 {
        let timeout = left.min(cfg.max_queue_wait_time as f64);
        if let Some(hit) = store.block_pop(queues, timeout).await? {
            hits.push(hit);
        }
    }
    Ok(hits)
}

fn to_result(
    cfg: &Config,
    sub_id: &str,
    started: Instant,
    popped: Option<String>,
) -> SubmissionResult {
    match popped {
        None => SubmissionResult::failure(
            sub_id,
            started.elapsed().as_secs_f64(),
            ResultReason::QueueTimeout,
        ),
        Some(json) => match serde_json::from_str::<SubmissionResult>(&json) {
            Ok(mut result) => {
                // a worker killed by its own rlimit reports a plain failure;
                // reclassify by cost so callers see a timeout
                if !result.success && result.cost >= cfg.max_execution_time as f64 {
                    result.reason = ResultReason::WorkerTimeout;
                }
                result
            }
            Err(err) => {
                error!(sub_id = %sub_id, error = %err, "malformed result payload");
                SubmissionResult::failure(
                    sub_id,
                    started.elapsed().as_secs_f64(),
                    ResultReason::InternalError,
                )
            }
        },
    }
}

/// Warm up the store connection and log when its clock disagrees with ours;
/// payload timestamps are taken here but aged on the workers' clocks.
pub async fn probe_clock<S: Store + ?Sized>(store: &S) -> Result<(), StoreError> {
    let mut skew = 0.0;
    for _ in 0..CLOCK_PROBES {
        skew = store.time().await? - epoch_secs();
    }
    if skew.abs() > MAX_CLOCK_SKEW_SECS {
        warn!(
            skew_secs = skew,
            "clock skew against the store; make sure MAX_QUEUE_WORK_LIFE_TIME covers it"
        );
    }
    Ok(())
}
