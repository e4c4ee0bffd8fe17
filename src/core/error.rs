//! Error types shared across the service.

use thiserror::Error;

/// Failures surfaced by the queue adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport or protocol failure from the underlying store.
    #[error("store error: {0}")]
    Redis(#[from] redis::RedisError),
    /// The connection pool could not hand out a connection.
    #[error("connection pool error: {0}")]
    Pool(String),
    /// A per-command deadline elapsed before the store replied.
    #[error("store call timed out after {0:.1}s")]
    Timeout(f64),
    /// A value read from or written to the store could not be (de)coded.
    #[error("malformed value: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Failures raised while preparing or running a judged program.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Scratch-file or process plumbing failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The submission did not compile; carries the compiler's stderr.
    #[error("compilation failed: {0}")]
    Compile(String),
}

/// Application-facing result using anyhow for binary-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
