//! Thin HTTP layer over the coordinator.
//!
//! Routes map one-to-one onto coordinator calls; the judging routes never
//! fail because the coordinator absorbs every error into a result. Only the
//! status probe surfaces store trouble as a 500.

use std::sync::Arc;

use crate::infra::queue::Store;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::error;

use crate::config::Config;
use crate::core::coordinator;
use crate::core::error::StoreError;
use crate::core::model::{
    BatchJudgeVerdict, BatchSubmission, BatchSubmissionResult, JudgeVerdict, Submission,
    SubmissionResult,
};
use crate::infra::keys::KeySpace;
use crate::infra::queue::RedisStore;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    store: Arc<RedisStore>,
    cfg: Arc<Config>,
    keys: Arc<KeySpace>,
}

impl AppState {
    /// State over one pooled store handle.
    pub fn new(store: RedisStore, cfg: Arc<Config>) -> Self {
        let keys = Arc::new(KeySpace::new(&cfg.redis_key_prefix));
        Self {
            store: Arc::new(store),
            cfg,
            keys,
        }
    }
}

/// Queue depth and live-worker count reported by `/status`.
#[derive(Debug, Serialize)]
pub struct ServerStatus {
    /// Pending payloads on the shared work queue.
    pub queue: u64,
    /// Workers with a live heartbeat key.
    pub num_workers: u64,
}

/// The service's route table.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/status", get(status))
        .route("/run", post(run))
        .route("/run/batch", post(run_batch))
        .route("/run/long-batch", post(run_long_batch))
        .route("/judge", post(judge))
        .route("/judge/batch", post(judge_batch))
        .route("/judge/long-batch", post(judge_long_batch))
        .with_state(state)
}

async fn ping() -> &'static str {
    "pong"
}

async fn status(State(state): State<AppState>) -> Result<Json<ServerStatus>, StatusCode> {
    let queue = state
        .store
        .llen(state.keys.work_queue())
        .await
        .map_err(internal)?;
    let num_workers = state
        .store
        .scan_count(&state.keys.worker_pattern())
        .await
        .map_err(internal)?;
    Ok(Json(ServerStatus { queue, num_workers }))
}

fn internal(err: StoreError) -> StatusCode {
    error!(error = %err, "status probe failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn run(
    State(state): State<AppState>,
    Json(submission): Json<Submission>,
) -> Json<SubmissionResult> {
    Json(coordinator::judge(state.store.as_ref(), &state.cfg, &state.keys, submission).await)
}

async fn judge(
    State(state): State<AppState>,
    Json(submission): Json<Submission>,
) -> Json<JudgeVerdict> {
    let result =
        coordinator::judge(state.store.as_ref(), &state.cfg, &state.keys, submission).await;
    Json(JudgeVerdict::from(result))
}

async fn run_batch(
    State(state): State<AppState>,
    Json(batch): Json<BatchSubmission>,
) -> Result<Json<BatchSubmissionResult>, StatusCode> {
    run_batch_common(state, batch, false).await
}

async fn run_long_batch(
    State(state): State<AppState>,
    Json(batch): Json<BatchSubmission>,
) -> Result<Json<BatchSubmissionResult>, StatusCode> {
    run_batch_common(state, batch, true).await
}

async fn judge_batch(
    State(state): State<AppState>,
    Json(batch): Json<BatchSubmission>,
) -> Result<Json<BatchJudgeVerdict>, StatusCode> {
    let results = run_batch_common(state, batch, false).await?;
    Ok(Json(BatchJudgeVerdict::from(results.0)))
}

async fn judge_long_batch(
    State(state): State<AppState>,
    Json(batch): Json<BatchSubmission>,
) -> Result<Json<BatchJudgeVerdict>, StatusCode> {
    let results = run_batch_common(state, batch, true).await?;
    Ok(Json(BatchJudgeVerdict::from(results.0)))
}

async fn run_batch_common(
    state: AppState,
    batch: BatchSubmission,
    long_batch: bool,
) -> Result<Json<BatchSubmissionResult>, StatusCode> {
    if batch.submissions.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(Json(
        coordinator::judge_batch(state.store.as_ref(), &state.cfg, &state.keys, batch, long_batch)
            .await,
    ))
}
