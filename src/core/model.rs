//! Wire models for submissions, queue payloads, and results.
//!
//! Every type here is the exact JSON shape transferred through the store or
//! returned over HTTP; parse(serialize(x)) must reproduce x for all of them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::clock::epoch_secs;

fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

/// Language selector for a submission; decides which executor runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionKind {
    /// Interpreted python source.
    Python,
    /// C++ source compiled before running.
    Cpp,
    /// Present in the schema but has no executor; workers reject it.
    Math,
}

/// One program to judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Caller-supplied id, or a fresh UUID when absent. Always set after
    /// parsing, so a payload never reaches the queue without one.
    #[serde(default = "fresh_id")]
    pub sub_id: String,
    /// Wire field `type`.
    #[serde(rename = "type")]
    pub kind: SubmissionKind,
    /// Free-form per-submission options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<HashMap<String, String>>,
    /// Program source.
    pub solution: String,
    /// Fed to the program's stdin when present.
    #[serde(default)]
    pub input: Option<String>,
    /// When present, trimmed stdout must equal this (trimmed) for success.
    #[serde(default)]
    pub expected_output: Option<String>,
}

/// Wire tag carried by batch envelopes (`"type": "batch"`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    /// The only variant.
    #[default]
    Batch,
}

/// An ordered batch of submissions judged as one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSubmission {
    /// Batch id, defaulted like [`Submission::sub_id`].
    #[serde(default = "fresh_id")]
    pub sub_id: String,
    /// Wire field `type`, always `batch`.
    #[serde(rename = "type", default)]
    pub kind: BatchKind,
    /// Must be non-empty; response order matches this order.
    pub submissions: Vec<Submission>,
}

/// The unit transferred through the work queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkPayload {
    /// Unique per enqueue; batched ids share a `{uuid}` hash-tag prefix.
    pub work_id: String,
    /// Coordinator wall clock at creation, epoch seconds.
    pub timestamp: f64,
    /// Long-batch work is exempt from the stale-work skip.
    #[serde(default)]
    pub long_running: bool,
    /// The submission to judge.
    pub submission: Submission,
}

impl WorkPayload {
    /// Payload for a single (non-batch) submission.
    pub fn new(submission: Submission) -> Self {
        Self::tagged(fresh_id(), false, submission)
    }

    /// Payload with a caller-chosen work id, as used for batch members.
    pub fn tagged(work_id: String, long_running: bool, submission: Submission) -> Self {
        Self {
            work_id,
            timestamp: epoch_secs(),
            long_running,
            submission,
        }
    }
}

/// Why a result carries `success = false` (or `unspecified` when it does not).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultReason {
    /// Success, or an ordinary non-timeout failure.
    #[default]
    Unspecified,
    /// An uncaught error inside the coordinator or the worker path.
    InternalError,
    /// The judged program exceeded its execution limit.
    WorkerTimeout,
    /// The coordinator's wait elapsed before any result arrived.
    QueueTimeout,
    /// The payload failed schema validation but its ids were recoverable.
    InvalidInput,
}

/// Verdict for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    /// Mirrors the submission's id.
    pub sub_id: String,
    /// Ran cleanly and, when an expectation was given, output matched.
    pub success: bool,
    /// The child exited with code 0 within limits.
    #[serde(default)]
    pub run_success: bool,
    /// Wall-clock seconds spent executing the program.
    pub cost: f64,
    /// Captured stdout, truncated before publication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured stderr, truncated before publication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Failure classification.
    #[serde(default)]
    pub reason: ResultReason,
}

impl SubmissionResult {
    /// A failed verdict with no captured output.
    pub fn failure(sub_id: impl Into<String>, cost: f64, reason: ResultReason) -> Self {
        Self {
            sub_id: sub_id.into(),
            success: false,
            run_success: false,
            cost,
            stdout: None,
            stderr: None,
            reason,
        }
    }
}

/// Verdicts for a whole batch, in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSubmissionResult {
    /// Mirrors the batch's id.
    pub sub_id: String,
    /// Exactly one entry per submitted item, same order.
    pub results: Vec<SubmissionResult>,
}

/// Reduced projection returned by the judge-only routes: no captured streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeVerdict {
    /// Mirrors the submission's id.
    pub sub_id: String,
    /// See [`SubmissionResult::success`].
    pub success: bool,
    /// See [`SubmissionResult::run_success`].
    pub run_success: bool,
    /// Execution cost in seconds.
    pub cost: f64,
    /// Failure classification.
    pub reason: ResultReason,
}

impl From<SubmissionResult> for JudgeVerdict {
    fn from(result: SubmissionResult) -> Self {
        Self {
            sub_id: result.sub_id,
            success: result.success,
            run_success: result.run_success,
            cost: result.cost,
            reason: result.reason,
        }
    }
}

/// Batch counterpart of [`JudgeVerdict`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJudgeVerdict {
    /// Mirrors the batch's id.
    pub sub_id: String,
    /// One verdict per submitted item, same order.
    pub results: Vec<JudgeVerdict>,
}

impl From<BatchSubmissionResult> for BatchJudgeVerdict {
    fn from(batch: BatchSubmissionResult) -> Self {
        Self {
            sub_id: batch.sub_id,
            results: batch.results.into_iter().map(JudgeVerdict::from).collect(),
        }
    }
}
