//! Core models, errors, and the request-side coordinator.

pub mod coordinator;
pub mod error;
pub mod model;

pub use error::{AppResult, ExecError, StoreError};
pub use model::{
    BatchJudgeVerdict, BatchSubmission, BatchSubmissionResult, JudgeVerdict, ResultReason,
    Submission, SubmissionKind, SubmissionResult, WorkPayload,
};
