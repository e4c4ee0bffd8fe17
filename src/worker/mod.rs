//! Worker-side judging: executor selection, verdict assembly, error capture.

pub mod run;
pub mod supervisor;

pub use run::{run_worker, WorkerLoop, WORKER_CHILD_ENV};
pub use supervisor::WorkerSupervisor;

use std::fs;
use std::path::Path;

use tracing::{error, warn};

use crate::config::Config;
use crate::core::model::{ResultReason, Submission, SubmissionKind, SubmissionResult};
use crate::exec::{
    CppExecutor, ExecLimits, ExecuteResult, PythonExecutor, ScriptExecutor, TIMEOUT_EXIT_CODE,
};

fn executor_for(cfg: &Config, kind: SubmissionKind) -> Option<Box<dyn ScriptExecutor>> {
    let limits = ExecLimits {
        timeout: Some(cfg.max_execution_time),
        memory: Some(cfg.memory_limit_bytes()),
    };
    match kind {
        SubmissionKind::Python => Some(Box::new(PythonExecutor::new(
            cfg.python_executor_path.clone(),
            limits,
        ))),
        SubmissionKind::Cpp => Some(Box::new(CppExecutor::new(
            cfg.cpp_compiler_path.clone(),
            limits,
        ))),
        SubmissionKind::Math => None,
    }
}

/// Judge one submission. Every failure mode is encoded in the result; this
/// never errors, so the worker loop stays alive no matter what arrives.
pub fn judge(cfg: &Config, sub: &Submission) -> SubmissionResult {
    let Some(executor) = executor_for(cfg, sub.kind) else {
        warn!(sub_id = %sub.sub_id, kind = ?sub.kind, "no executor for submission kind");
        return SubmissionResult::failure(&sub.sub_id, 0.0, ResultReason::InvalidInput);
    };
    match executor.execute_script(&sub.solution, sub.input.as_deref()) {
        Ok(result) => to_submission_result(cfg, sub, result),
        Err(err) => {
            error!(sub_id = %sub.sub_id, error = %err, "judging failed");
            save_error_case(cfg, sub, None, Some(&err.to_string()));
            SubmissionResult::failure(&sub.sub_id, 0.0, ResultReason::InternalError)
        }
    }
}

pub(crate) fn to_submission_result(
    cfg: &Config,
    sub: &Submission,
    result: ExecuteResult,
) -> SubmissionResult {
    let run_success = result.success;
    let output_matches = match &sub.expected_output {
        Some(expected) => result.stdout.trim() == expected.trim(),
        None => true,
    };
    let success = run_success && output_matches;
    if !success {
        save_error_case(cfg, sub, Some(&result), None);
    }
    let mut stdout = result.stdout;
    let mut stderr = result.stderr;
    truncate_utf8(&mut stdout, cfg.max_stdout_error_length);
    truncate_utf8(&mut stderr, cfg.max_stdout_error_length);
    SubmissionResult {
        sub_id: sub.sub_id.clone(),
        success,
        run_success,
        cost: result.cost,
        stdout: Some(stdout),
        stderr: Some(stderr),
        reason: if result.exit_code == TIMEOUT_EXIT_CODE {
            ResultReason::WorkerTimeout
        } else {
            ResultReason::Unspecified
        },
    }
}

/// Truncate in place to at most `max` bytes without splitting a character.
pub(crate) fn truncate_utf8(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

/// Dump a failing case under `ERROR_CASE_SAVE_PATH/<sub_id>`. Best-effort;
/// capture problems must never fail the judge path.
fn save_error_case(
    cfg: &Config,
    sub: &Submission,
    result: Option<&ExecuteResult>,
    error: Option<&str>,
) {
    let Some(base) = &cfg.error_case_save_path else {
        return;
    };
    if let Err(err) = try_save_error_case(base, sub, result, error) {
        warn!(sub_id = %sub.sub_id, error = %err, "failed to save error case");
    }
}

fn try_save_error_case(
    base: &Path,
    sub: &Submission,
    result: Option<&ExecuteResult>,
    error: Option<&str>,
) -> std::io::Result<()> {
    let dir = base.join(&sub.sub_id);
    fs::create_dir_all(&dir)?;
    fs::write(
        dir.join("submission.json"),
        serde_json::to_string_pretty(sub).unwrap_or_default(),
    )?;
    fs::write(dir.join("solution.txt"), &sub.solution)?;
    if let Some(result) = result {
        fs::write(
            dir.join("result.json"),
            serde_json::to_string_pretty(result).unwrap_or_default(),
        )?;
    }
    if let Some(error) = error {
        fs::write(dir.join("error.txt"), error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(expected: Option<&str>) -> Submission {
        Submission {
            sub_id: "s-1".into(),
            kind: SubmissionKind::Python,
            options: None,
            solution: "print('a')".into(),
            input: None,
            expected_output: expected.map(str::to_string),
        }
    }

    fn outcome(stdout: &str, exit_code: i32) -> ExecuteResult {
        ExecuteResult::new(stdout.to_string(), String::new(), exit_code, 0.5)
    }

    #[test]
    fn test_success_needs_clean_exit_and_matching_output() {
        let cfg = Config::default();
        let result = to_submission_result(&cfg, &submission(Some("a")), outcome("a\n", 0));
        assert!(result.run_success);
        assert!(result.success);
        assert_eq!(result.reason, ResultReason::Unspecified);
    }

    #[test]
    fn test_mismatched_output_fails_but_ran() {
        let cfg = Config::default();
        let result = to_submission_result(&cfg, &submission(Some("b")), outcome("a\n", 0));
        assert!(result.run_success);
        assert!(!result.success);
        assert_eq!(result.reason, ResultReason::Unspecified);
    }

    #[test]
    fn test_no_expectation_means_exit_code_decides() {
        let cfg = Config::default();
        let result = to_submission_result(&cfg, &submission(None), outcome("whatever", 0));
        assert!(result.success);
        let result = to_submission_result(&cfg, &submission(None), outcome("whatever", 1));
        assert!(!result.success);
        assert!(!result.run_success);
    }

    #[test]
    fn test_comparison_trims_both_sides() {
        let cfg = Config::default();
        let result =
            to_submission_result(&cfg, &submission(Some("  a  ")), outcome("\na\n\n", 0));
        assert!(result.success);
    }

    #[test]
    fn test_timeout_exit_code_sets_reason() {
        let cfg = Config::default();
        let result = to_submission_result(
            &cfg,
            &submission(Some("a")),
            outcome("", TIMEOUT_EXIT_CODE),
        );
        assert!(!result.success);
        assert_eq!(result.reason, ResultReason::WorkerTimeout);
    }

    #[test]
    fn test_streams_are_truncated_for_publication() {
        let cfg = Config {
            max_stdout_error_length: 4,
            ..Config::default()
        };
        let result = to_submission_result(&cfg, &submission(None), outcome("abcdefgh", 0));
        assert_eq!(result.stdout.as_deref(), Some("abcd"));
    }

    #[test]
    fn test_math_submissions_are_rejected() {
        let cfg = Config::default();
        let sub = Submission {
            kind: SubmissionKind::Math,
            ..submission(None)
        };
        let result = judge(&cfg, &sub);
        assert!(!result.success);
        assert_eq!(result.reason, ResultReason::InvalidInput);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let mut text = "héllo".to_string();
        truncate_utf8(&mut text, 2);
        assert_eq!(text, "h");
        let mut short = "ab".to_string();
        truncate_utf8(&mut short, 10);
        assert_eq!(short, "ab");
    }
}
