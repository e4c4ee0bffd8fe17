//! C++ executor.
//!
//! The judged source is compiled in a temp directory together with a
//! generated header whose static initializer installs the resource limits
//! and the alarm before `main` runs.

use std::fs;

use super::{run_process, ExecError, ExecLimits, PreparedScript, ScriptExecutor};

const LIMIT_HEADER: &str = "resource_limit.h";
const SOURCE_FILE: &str = "source.cpp";
const BINARY_FILE: &str = "run";

/// Compiles and runs C++ submissions under CPU, memory, and wall limits.
pub struct CppExecutor {
    compiler_path: String,
    limits: ExecLimits,
}

impl CppExecutor {
    /// Executor using `compiler_path` with the given limits.
    pub fn new(compiler_path: impl Into<String>, limits: ExecLimits) -> Self {
        Self {
            compiler_path: compiler_path.into(),
            limits,
        }
    }

    fn limit_header(&self) -> String {
        let mut guard_body = String::from(
            "        rlimit core{0, 0};\n        setrlimit(RLIMIT_CORE, &core);\n",
        );
        if let Some(timeout) = self.limits.timeout {
            guard_body.push_str(&format!(
                "        rlimit cpu{{{timeout}, {timeout}}};\n        \
                 setrlimit(RLIMIT_CPU, &cpu);\n        \
                 signal(SIGALRM, judged_watchdog);\n        \
                 alarm({timeout});\n"
            ));
        }
        if let Some(memory) = self.limits.memory {
            guard_body.push_str(&format!(
                "        rlimit mem{{{memory}, {memory}}};\n        \
                 setrlimit(RLIMIT_AS, &mem);\n"
            ));
        }
        format!(
            "#include <csignal>\n\
             #include <cstdio>\n\
             #include <sys/resource.h>\n\
             #include <unistd.h>\n\
             \n\
             static void judged_watchdog(int) {{\n    \
             printf(\"Suicide from timeout.\\n\");\n    \
             fflush(stdout);\n    \
             kill(0, SIGKILL);\n\
             }}\n\
             \n\
             struct JudgedLimits {{\n    \
             JudgedLimits() {{\n{guard_body}    }}\n\
             }};\n\
             \n\
             static JudgedLimits judged_limits;\n"
        )
    }
}

impl ScriptExecutor for CppExecutor {
    fn setup_command(&self, script: &str) -> Result<PreparedScript, ExecError> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join(LIMIT_HEADER), self.limit_header())?;
        let source_path = dir.path().join(SOURCE_FILE);
        fs::write(&source_path, format!("#include \"{LIMIT_HEADER}\"\n{script}"))?;
        let binary_path = dir.path().join(BINARY_FILE);
        let compile_argv = vec![
            self.compiler_path.clone(),
            "-O2".to_string(),
            source_path.to_string_lossy().into_owned(),
            "-o".to_string(),
            binary_path.to_string_lossy().into_owned(),
        ];
        let compiled = run_process(&compile_argv, None, None, &[])?;
        if !compiled.success {
            return Err(ExecError::Compile(compiled.stderr));
        }
        let argv = vec![binary_path.to_string_lossy().into_owned()];
        Ok(PreparedScript::with_dir(argv, dir))
    }

    fn limits(&self) -> ExecLimits {
        self.limits
    }
}
