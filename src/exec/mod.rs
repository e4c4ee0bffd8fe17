//! Child-process execution under resource limits.
//!
//! The per-language executors are a capability pair over one shared runner:
//! `setup_command` materializes the script and yields an argv,
//! `process_result` post-processes the raw outcome. Resource limits are
//! installed inside the child itself (a source prelude for python, a static
//! initializer for C++), because rlimits are per-process; the runner only
//! enforces the outer wall clock.

pub mod cpp;
pub mod python;

pub use cpp::CppExecutor;
pub use python::PythonExecutor;

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::error::ExecError;

/// Exit code reported when the wall-clock watchdog killed the child.
pub const TIMEOUT_EXIT_CODE: i32 = -101;
/// Exit code reported when compilation failed before the program could run.
pub const COMPILE_ERROR_EXIT_CODE: i32 = -102;

/// Poll interval for the watchdog loop.
const WAIT_POLL: Duration = Duration::from_millis(20);

/// Outcome of one child-process run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResult {
    /// Everything the child wrote to stdout.
    pub stdout: String,
    /// Everything the child wrote to stderr.
    pub stderr: String,
    /// Child exit code; negative values are signals or the sentinels above.
    pub exit_code: i32,
    /// Wall-clock seconds across the run.
    pub cost: f64,
    /// `exit_code == 0`.
    pub success: bool,
}

impl ExecuteResult {
    /// Build a result, deriving `success` from the exit code.
    pub fn new(stdout: String, stderr: String, exit_code: i32, cost: f64) -> Self {
        Self {
            success: exit_code == 0,
            stdout,
            stderr,
            exit_code,
            cost,
        }
    }
}

/// Resource limits applied to a judged program.
#[derive(Debug, Clone, Copy)]
pub struct ExecLimits {
    /// CPU and wall-clock seconds; `None` disables the watchdog and rlimit.
    pub timeout: Option<u64>,
    /// Address-space bytes; `None` leaves the child unlimited.
    pub memory: Option<u64>,
}

enum Scratch {
    File(tempfile::NamedTempFile),
    Dir(tempfile::TempDir),
}

/// A runnable command plus the scratch space backing it; the scratch is
/// removed when this is dropped, so it must outlive the run.
pub struct PreparedScript {
    argv: Vec<String>,
    envs: Vec<(&'static str, String)>,
    _scratch: Scratch,
}

impl PreparedScript {
    /// Command backed by a single temp file.
    pub fn with_file(
        argv: Vec<String>,
        envs: Vec<(&'static str, String)>,
        file: tempfile::NamedTempFile,
    ) -> Self {
        Self {
            argv,
            envs,
            _scratch: Scratch::File(file),
        }
    }

    /// Command backed by a temp directory.
    pub fn with_dir(argv: Vec<String>, dir: tempfile::TempDir) -> Self {
        Self {
            argv,
            envs: Vec::new(),
            _scratch: Scratch::Dir(dir),
        }
    }
}

/// The capability pair implemented per language.
pub trait ScriptExecutor {
    /// Materialize `script` on disk and return the argv that runs it. A
    /// compilation failure is reported as [`ExecError::Compile`].
    fn setup_command(&self, script: &str) -> Result<PreparedScript, ExecError>;

    /// Post-process the raw run outcome (marker stripping, cost rewrite).
    fn process_result(&self, result: ExecuteResult) -> ExecuteResult {
        result
    }

    /// Limits enforced on the judged program.
    fn limits(&self) -> ExecLimits;

    /// Run `script` against `stdin` under the configured limits. Compile
    /// failures come back as a result carrying [`COMPILE_ERROR_EXIT_CODE`];
    /// only environment problems (scratch space, spawn) surface as errors.
    fn execute_script(
        &self,
        script: &str,
        stdin: Option<&str>,
    ) -> Result<ExecuteResult, ExecError> {
        let prepared = match self.setup_command(script) {
            Ok(prepared) => prepared,
            Err(ExecError::Compile(stderr)) => {
                return Ok(ExecuteResult::new(
                    String::new(),
                    stderr,
                    COMPILE_ERROR_EXIT_CODE,
                    0.0,
                ));
            }
            Err(err) => return Err(err),
        };
        let timeout = self.limits().timeout.map(Duration::from_secs);
        let result = run_process(&prepared.argv, stdin, timeout, &prepared.envs)?;
        Ok(self.process_result(result))
    }
}

/// Spawn `argv`, feed `stdin`, drain both output streams, and enforce the
/// wall-clock `timeout`. On expiry the child is killed and the result carries
/// [`TIMEOUT_EXIT_CODE`] with whatever output was produced.
pub fn run_process(
    argv: &[String],
    stdin: Option<&str>,
    timeout: Option<Duration>,
    envs: &[(&'static str, String)],
) -> Result<ExecuteResult, ExecError> {
    let started = Instant::now();
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"))?;
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in envs {
        command.env(key, value);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // fresh group: an in-child group kill cannot reach the worker
        command.process_group(0);
    }
    let mut child = command.spawn()?;
    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            let input = input.to_string();
            // own thread: a child that never reads stdin (or exits early)
            // must not wedge the watchdog below
            thread::spawn(move || {
                let _ = pipe.write_all(input.as_bytes());
            });
        }
    }
    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());
    let exit_code = wait_with_deadline(&mut child, timeout)?;
    // measured across the child itself; draining may outlast it when an
    // orphaned grandchild still holds the pipes (the supervisor reaps those)
    let cost = started.elapsed().as_secs_f64();
    let stdout = String::from_utf8_lossy(&stdout_reader.join().unwrap_or_default()).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_reader.join().unwrap_or_default()).into_owned();
    Ok(ExecuteResult::new(stdout, stderr, exit_code, cost))
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn wait_with_deadline(child: &mut Child, timeout: Option<Duration>) -> Result<i32, ExecError> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(exit_code_of(status));
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(TIMEOUT_EXIT_CODE);
            }
        }
        thread::sleep(WAIT_POLL);
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
