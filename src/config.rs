//! Environment-driven service configuration.

use std::env;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is absent.
    #[error("{0} is not set")]
    Missing(&'static str),
    /// A variable is present but does not parse as a number.
    #[error("{name} is not a valid number: {value:?}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
    /// Two variables contradict each other.
    #[error("{0}")]
    Constraint(String),
}

/// Runtime configuration for coordinators, workers, and the supervisor.
///
/// Every field maps to one environment variable; `Default` carries the
/// documented defaults so tests can build a config without touching the
/// environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store connection URI; a `+cluster` scheme fragment selects cluster mode.
    pub redis_uri: String,
    /// Namespace prefix baked into every key.
    pub redis_key_prefix: String,
    /// TTL in seconds for short-batch result queues.
    pub result_expire: u64,
    /// TTL in seconds for long-batch result queues.
    pub result_long_batch_expire: u64,
    /// Single-call cap in seconds for the worker's blocking pop.
    pub work_queue_block_timeout: u64,
    /// Heartbeat TTL in seconds; must cover at least one blocking pop.
    pub worker_register_expire: u64,
    /// Per-command read timeout in seconds for store calls.
    pub socket_timeout: u64,
    /// CPU-time and wall-clock limit in seconds for a judged program.
    pub max_execution_time: u64,
    /// Collection deadline in seconds for single and short-batch requests.
    pub max_queue_wait_time: u64,
    /// Collection deadline in seconds for long batches.
    pub long_batch_max_queue_wait_time: u64,
    /// Workers drop non-long work older than this many seconds.
    pub max_queue_work_life_time: u64,
    /// Address-space limit for judged programs, in MiB.
    pub max_memory_mib: u64,
    /// Truncation length in bytes for captured stdout/stderr.
    pub max_stdout_error_length: usize,
    /// Enqueue/collect chunk size for short batches.
    pub max_batch_chunk_size: usize,
    /// Enqueue/collect chunk size for long batches.
    pub max_long_batch_chunk_size: usize,
    /// Number of worker processes the supervisor keeps alive.
    pub max_workers: usize,
    /// Co-locate the worker pool inside the API process.
    pub run_workers: bool,
    /// Interpreter used for python submissions.
    pub python_executor_path: String,
    /// Compiler used for cpp submissions.
    pub cpp_compiler_path: String,
    /// When set, failing submissions are dumped under this directory.
    pub error_case_save_path: Option<PathBuf>,
    /// HTTP bind address for the server binary.
    pub listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_uri: String::new(),
            redis_key_prefix: "js".into(),
            result_expire: 60,
            result_long_batch_expire: 3600,
            work_queue_block_timeout: 30,
            worker_register_expire: 120,
            socket_timeout: 60,
            max_execution_time: 10,
            max_queue_wait_time: 15,
            long_batch_max_queue_wait_time: 3600,
            max_queue_work_life_time: 4,
            max_memory_mib: 256,
            max_stdout_error_length: 1000,
            max_batch_chunk_size: 2,
            max_long_batch_chunk_size: 100,
            max_workers: num_cpus::get(),
            run_workers: false,
            python_executor_path: "python3".into(),
            cpp_compiler_path: "g++".into(),
            error_case_save_path: None,
            listen_addr: "0.0.0.0:8000".into(),
        }
    }
}

fn var(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn num<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

impl Config {
    /// Read every recognized variable from the environment and validate the
    /// result.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let cfg = Self {
            redis_uri: var("REDIS_URI").ok_or(ConfigError::Missing("REDIS_URI"))?,
            redis_key_prefix: var("REDIS_KEY_PREFIX").unwrap_or(defaults.redis_key_prefix),
            result_expire: num("REDIS_RESULT_EXPIRE", defaults.result_expire)?,
            result_long_batch_expire: num(
                "REDIS_RESULT_LONG_BATCH_EXPIRE",
                defaults.result_long_batch_expire,
            )?,
            work_queue_block_timeout: num(
                "REDIS_WORK_QUEUE_BLOCK_TIMEOUT",
                defaults.work_queue_block_timeout,
            )?,
            worker_register_expire: num(
                "REDIS_WORKER_REGISTER_EXPIRE",
                defaults.worker_register_expire,
            )?,
            socket_timeout: num("REDIS_SOCKET_TIMEOUT", defaults.socket_timeout)?,
            max_execution_time: num("MAX_EXECUTION_TIME", defaults.max_execution_time)?,
            max_queue_wait_time: num("MAX_QUEUE_WAIT_TIME", defaults.max_queue_wait_time)?,
            long_batch_max_queue_wait_time: num(
                "LONG_BATCH_MAX_QUEUE_WAIT_TIME",
                defaults.long_batch_max_queue_wait_time,
            )?,
            max_queue_work_life_time: num(
                "MAX_QUEUE_WORK_LIFE_TIME",
                defaults.max_queue_work_life_time,
            )?,
            max_memory_mib: num("MAX_MEMORY", defaults.max_memory_mib)?,
            max_stdout_error_length: num(
                "MAX_STDOUT_ERROR_LENGTH",
                defaults.max_stdout_error_length,
            )?,
            max_batch_chunk_size: num("MAX_BATCH_CHUNK_SIZE", defaults.max_batch_chunk_size)?,
            max_long_batch_chunk_size: num(
                "MAX_LONG_BATCH_CHUNK_SIZE",
                defaults.max_long_batch_chunk_size,
            )?,
            max_workers: num("MAX_WORKERS", defaults.max_workers)?,
            run_workers: num::<u8>("RUN_WORKERS", 0)? != 0,
            python_executor_path: var("PYTHON_EXECUTOR_PATH")
                .unwrap_or(defaults.python_executor_path),
            cpp_compiler_path: var("CPP_COMPILER_PATH").unwrap_or(defaults.cpp_compiler_path),
            error_case_save_path: var("ERROR_CASE_SAVE_PATH").map(PathBuf::from),
            listen_addr: var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_register_expire < self.work_queue_block_timeout {
            return Err(ConfigError::Constraint(
                "REDIS_WORKER_REGISTER_EXPIRE must cover REDIS_WORK_QUEUE_BLOCK_TIMEOUT, \
                 or a worker blocked on an empty queue looks dead"
                    .into(),
            ));
        }
        if self.socket_timeout < 5 {
            return Err(ConfigError::Constraint(
                "REDIS_SOCKET_TIMEOUT below 5s would cut off legitimate blocking pops".into(),
            ));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Constraint("MAX_WORKERS must be at least 1".into()));
        }
        Ok(())
    }

    /// Address-space limit for judged programs, in bytes.
    pub fn memory_limit_bytes(&self) -> u64 {
        self.max_memory_mib * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_register_expire_must_cover_block_timeout() {
        let cfg = Config {
            worker_register_expire: 10,
            work_queue_block_timeout: 30,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_socket_timeout_floor() {
        let cfg = Config {
            socket_timeout: 2,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_memory_limit_bytes() {
        let cfg = Config {
            max_memory_mib: 256,
            ..Config::default()
        };
        assert_eq!(cfg.memory_limit_bytes(), 256 * 1024 * 1024);
    }
}
