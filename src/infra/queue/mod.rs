//! Queue adapters over an ordered-list key-value store.
//!
//! Two call sites, two trait shapes: the coordinator runs on the async
//! runtime and multiplexes many requests over one pool ([`Store`]); worker
//! processes are synchronous and own a single connection
//! ([`BlockingStore`]). The in-memory backend implements both so the whole
//! dispatch path can be exercised without a live store.

pub mod memory;
pub mod redis;
pub mod sync;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use self::sync::RedisBlockingStore;

use async_trait::async_trait;

use crate::core::error::StoreError;

/// Item returned by a blocking pop: the queue it came from and the raw value.
pub type Popped = (String, String);

/// Async store surface used by the coordinator.
///
/// All list operations address the head for pops and the tail for pushes.
/// Multi-key calls are only legal when every key carries the same `{tag}`
/// fragment; the coordinator constructs such keys.
#[async_trait]
pub trait Store: Send + Sync {
    /// Append values to the tail of `queue` in one variadic call.
    async fn push(&self, queue: &str, values: &[String]) -> Result<(), StoreError>;

    /// Non-blocking head pop.
    async fn pop(&self, queue: &str) -> Result<Option<String>, StoreError>;

    /// Pipelined non-blocking head pop of many queues in one round trip;
    /// the reply has one slot per queue. Not transactional.
    async fn pop_multi(&self, queues: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    /// Block until any listed queue has an item or `timeout` seconds elapse.
    /// The total logical timeout is honored even when a single underlying
    /// call must be capped below the socket read timeout.
    async fn block_pop(&self, queues: &[String], timeout: f64)
        -> Result<Option<Popped>, StoreError>;

    /// Read the head of `queue` without removing it.
    async fn peek(&self, queue: &str) -> Result<Option<String>, StoreError>;

    /// Delete keys in one variadic call.
    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Start `key` expiring after `seconds`.
    async fn expire(&self, key: &str, seconds: u64) -> Result<(), StoreError>;

    /// Set a string key, optionally with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StoreError>;

    /// Read a string key.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Length of a list.
    async fn llen(&self, queue: &str) -> Result<u64, StoreError>;

    /// Count keys matching `pattern` by cursor iteration.
    async fn scan_count(&self, pattern: &str) -> Result<u64, StoreError>;

    /// Server wall clock in epoch seconds.
    async fn time(&self) -> Result<f64, StoreError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Synchronous store surface used by worker processes; the worker's subset of
/// [`Store`].
pub trait BlockingStore {
    /// Append values to the tail of `queue`.
    fn push(&mut self, queue: &str, values: &[String]) -> Result<(), StoreError>;

    /// Non-blocking head pop.
    fn pop(&mut self, queue: &str) -> Result<Option<String>, StoreError>;

    /// Block until any listed queue has an item or `timeout` seconds elapse.
    fn block_pop(&mut self, queues: &[String], timeout: f64)
        -> Result<Option<Popped>, StoreError>;

    /// Delete keys.
    fn delete(&mut self, keys: &[String]) -> Result<(), StoreError>;

    /// Start `key` expiring after `seconds`.
    fn expire(&mut self, key: &str, seconds: u64) -> Result<(), StoreError>;

    /// Set a string key, optionally with a TTL.
    fn set(&mut self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StoreError>;

    /// Read a string key.
    fn get(&mut self, key: &str) -> Result<Option<String>, StoreError>;

    /// Length of a list.
    fn llen(&mut self, queue: &str) -> Result<u64, StoreError>;

    /// Server wall clock in epoch seconds.
    fn time(&mut self) -> Result<f64, StoreError>;

    /// Liveness probe.
    fn ping(&mut self) -> Result<(), StoreError>;
}

/// Deployment shape selected by the connection URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// A single store node.
    Standalone,
    /// A sharded cluster; multi-key calls require hash-tagged keys.
    Cluster,
}

/// Split a connection URI into its mode and the URI the client library
/// understands: a `+cluster` scheme fragment selects cluster mode and is
/// stripped (`redis+cluster://host` becomes `redis://host`).
pub fn parse_store_uri(uri: &str) -> (StoreMode, String) {
    match uri.split_once("://") {
        Some((scheme, rest)) if scheme.ends_with("+cluster") => {
            let base = scheme.trim_end_matches("+cluster");
            (StoreMode::Cluster, format!("{base}://{rest}"))
        }
        _ => (StoreMode::Standalone, uri.to_string()),
    }
}
