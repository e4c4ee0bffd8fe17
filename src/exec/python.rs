//! Python executor.
//!
//! The judged source is wrapped between a prelude and a postlude in one temp
//! file. The prelude makes the interpreter confine itself (rlimits plus an
//! alarm) before user code runs; the postlude emits in-band markers carrying
//! the measured duration so the reported cost excludes interpreter startup.

use std::io::Write;

use super::{ExecError, ExecLimits, ExecuteResult, PreparedScript, ScriptExecutor};

/// Marks the end of user output on stdout.
const SCRIPT_ENDING_MARK: &str = "@@E";
/// Prefixes the measured duration line that follows the ending mark.
const DURATION_MARK: &str = "@@D";
/// Address space granted on top of the configured limit; the interpreter
/// itself needs roughly this much.
const INTERPRETER_OVERHEAD_BYTES: u64 = 1024 * 1024 * 1024;

/// Runs python submissions under CPU, memory, and wall limits.
pub struct PythonExecutor {
    python_path: String,
    limits: ExecLimits,
}

impl PythonExecutor {
    /// Executor using `python_path` with the given limits.
    pub fn new(python_path: impl Into<String>, limits: ExecLimits) -> Self {
        Self {
            python_path: python_path.into(),
            limits,
        }
    }

    fn prelude(&self) -> String {
        let mut lines = String::from(
            "import os, resource, signal, time\n\
             resource.setrlimit(resource.RLIMIT_CORE, (0, 0))\n",
        );
        if let Some(memory) = self.limits.memory {
            let cap = memory + INTERPRETER_OVERHEAD_BYTES;
            lines.push_str(&format!(
                "resource.setrlimit(resource.RLIMIT_AS, ({cap}, {cap}))\n"
            ));
        }
        if let Some(timeout) = self.limits.timeout {
            lines.push_str(&format!(
                "resource.setrlimit(resource.RLIMIT_CPU, ({timeout}, {timeout}))\n"
            ));
            lines.push_str(&format!(
                "def _watchdog(signum, frame):\n    \
                 print(\"Suicide from timeout.\", flush=True)\n    \
                 os.killpg(os.getpgid(0), signal.SIGKILL)\n\
                 signal.signal(signal.SIGALRM, _watchdog)\n\
                 signal.alarm({timeout})\n"
            ));
        }
        lines.push_str("_exec_time_start = time.perf_counter()\n");
        lines
    }

    fn postlude() -> String {
        format!(
            "_exec_time_end = time.perf_counter()\n\
             print(\"{SCRIPT_ENDING_MARK}\")\n\
             print(f\"{DURATION_MARK}{{_exec_time_end - _exec_time_start}}\", flush=True)\n"
        )
    }
}

impl ScriptExecutor for PythonExecutor {
    fn setup_command(&self, script: &str) -> Result<PreparedScript, ExecError> {
        let mut file = tempfile::Builder::new().suffix(".py").tempfile()?;
        file.write_all(self.prelude().as_bytes())?;
        file.write_all(b"\n")?;
        file.write_all(script.as_bytes())?;
        file.write_all(b"\n")?;
        file.write_all(Self::postlude().as_bytes())?;
        file.flush()?;
        let argv = vec![
            self.python_path.clone(),
            file.path().to_string_lossy().into_owned(),
        ];
        // single-threaded BLAS keeps the CPU rlimit meaningful
        let envs = vec![("OPENBLAS_NUM_THREADS", "1".to_string())];
        Ok(PreparedScript::with_file(argv, envs, file))
    }

    fn process_result(&self, mut result: ExecuteResult) -> ExecuteResult {
        if let Some(position) = result.stdout.find(SCRIPT_ENDING_MARK) {
            let meta = result.stdout.split_off(position);
            for line in meta.lines() {
                if let Some(value) = line.strip_prefix(DURATION_MARK) {
                    if let Ok(seconds) = value.trim().parse::<f64>() {
                        result.cost = seconds;
                        break;
                    }
                }
            }
        }
        result
    }

    fn limits(&self) -> ExecLimits {
        self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> PythonExecutor {
        PythonExecutor::new(
            "python3",
            ExecLimits {
                timeout: Some(10),
                memory: Some(256 * 1024 * 1024),
            },
        )
    }

    fn raw(stdout: &str) -> ExecuteResult {
        ExecuteResult::new(stdout.to_string(), String::new(), 0, 9.9)
    }

    #[test]
    fn test_markers_are_stripped_and_cost_rewritten() {
        let processed = executor().process_result(raw("a\n@@E\n@@D0.125\n"));
        assert_eq!(processed.stdout, "a\n");
        assert!((processed.cost - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_output_without_markers_is_untouched() {
        // a crashed interpreter never reaches the postlude
        let processed = executor().process_result(raw("partial"));
        assert_eq!(processed.stdout, "partial");
        assert!((processed.cost - 9.9).abs() < 1e-9);
    }

    #[test]
    fn test_garbled_duration_keeps_outer_cost() {
        let processed = executor().process_result(raw("a\n@@E\n@@Dnot-a-number\n"));
        assert_eq!(processed.stdout, "a\n");
        assert!((processed.cost - 9.9).abs() < 1e-9);
    }

    #[test]
    fn test_prelude_confines_the_interpreter() {
        let prelude = executor().prelude();
        assert!(prelude.contains("RLIMIT_CORE"));
        assert!(prelude.contains("RLIMIT_AS"));
        assert!(prelude.contains("RLIMIT_CPU"));
        assert!(prelude.contains("signal.alarm(10)"));
    }
}
