//! Redis-backed async store used by the coordinator.
//!
//! Connections come from a pool so every blocking pop runs on its own
//! connection; a `BLPOP` multiplexed onto a shared connection would stall
//! every other in-flight command behind it.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{parse_store_uri, Popped, Store, StoreMode};
use crate::core::error::StoreError;

/// How long a fresh connection may take to establish.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(120);
/// COUNT hint for cursor scans.
const SCAN_BATCH: u64 = 100;

enum PoolKind {
    Single(deadpool_redis::Pool),
    Cluster(deadpool_redis::cluster::Pool),
}

/// Async store over a standalone node or a sharded cluster.
pub struct RedisStore {
    pool: PoolKind,
    read_timeout: Duration,
}

async fn run_deadline<T>(
    deadline: Duration,
    fut: impl Future<Output = redis::RedisResult<T>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout(deadline.as_secs_f64())),
    }
}

async fn scan_count_on<C>(conn: &mut C, pattern: &str) -> redis::RedisResult<u64>
where
    C: redis::aio::ConnectionLike + Send,
{
    let mut cursor: u64 = 0;
    let mut count: u64 = 0;
    loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query_async(&mut *conn)
            .await?;
        count += keys.len() as u64;
        if next == 0 {
            return Ok(count);
        }
        cursor = next;
    }
}

impl RedisStore {
    /// Build a pooled store from a connection URI; a `+cluster` scheme
    /// fragment selects cluster mode. No connection is made until first use.
    pub fn connect(uri: &str, read_timeout_secs: u64) -> Result<Self, StoreError> {
        let (mode, url) = parse_store_uri(uri);
        let read_timeout = Duration::from_secs(read_timeout_secs.max(5));
        let pool_cfg = deadpool_redis::PoolConfig {
            timeouts: deadpool_redis::Timeouts {
                create: Some(CONNECT_TIMEOUT),
                wait: Some(CONNECT_TIMEOUT),
                ..Default::default()
            },
            ..Default::default()
        };
        let pool = match mode {
            StoreMode::Standalone => {
                let mut cfg = deadpool_redis::Config::from_url(url);
                cfg.pool = Some(pool_cfg);
                PoolKind::Single(
                    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))
                        .map_err(|e| StoreError::Pool(e.to_string()))?,
                )
            }
            StoreMode::Cluster => {
                let cfg = deadpool_redis::cluster::Config {
                    urls: Some(vec![url]),
                    pool: Some(pool_cfg),
                    ..Default::default()
                };
                PoolKind::Cluster(
                    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))
                        .map_err(|e| StoreError::Pool(e.to_string()))?,
                )
            }
        };
        Ok(Self { pool, read_timeout })
    }

    async fn query<T: redis::FromRedisValue>(
        &self,
        cmd: &redis::Cmd,
        deadline: Duration,
    ) -> Result<T, StoreError> {
        match &self.pool {
            PoolKind::Single(pool) => {
                let mut conn = pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
                run_deadline(deadline, cmd.query_async(&mut conn)).await
            }
            PoolKind::Cluster(pool) => {
                let mut conn = pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
                run_deadline(deadline, cmd.query_async(&mut conn)).await
            }
        }
    }

    async fn query_pipe<T: redis::FromRedisValue>(
        &self,
        pipe: &redis::Pipeline,
    ) -> Result<T, StoreError> {
        match &self.pool {
            PoolKind::Single(pool) => {
                let mut conn = pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
                run_deadline(self.read_timeout, pipe.query_async(&mut conn)).await
            }
            PoolKind::Cluster(pool) => {
                let mut conn = pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
                run_deadline(self.read_timeout, pipe.query_async(&mut conn)).await
            }
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn push(&self, queue: &str, values: &[String]) -> Result<(), StoreError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(queue).arg(values);
        self.query::<i64>(&cmd, self.read_timeout).await.map(|_| ())
    }

    async fn pop(&self, queue: &str) -> Result<Option<String>, StoreError> {
        let mut cmd = redis::cmd("LPOP");
        cmd.arg(queue);
        self.query(&cmd, self.read_timeout).await
    }

    async fn pop_multi(&self, queues: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if queues.is_empty() {
            return Ok(Vec::new());
        }
        // plain pipeline, not MULTI/EXEC: one round trip, no transaction
        let mut pipe = redis::pipe();
        for queue in queues {
            pipe.cmd("LPOP").arg(queue);
        }
        self.query_pipe(&pipe).await
    }

    async fn block_pop(
        &self,
        queues: &[String],
        timeout: f64,
    ) -> Result<Option<Popped>, StoreError> {
        let started = Instant::now();
        // each BLPOP call stays below the socket read timeout; loop for the rest
        let step_cap = (self.read_timeout.as_secs_f64() - 2.0).max(1.0);
        loop {
            let remaining = timeout - started.elapsed().as_secs_f64();
            if remaining <= 0.0 {
                return Ok(None);
            }
            let step = remaining.min(step_cap);
            let mut cmd = redis::cmd("BLPOP");
            cmd.arg(queues).arg(step);
            let deadline = Duration::from_secs_f64(step) + self.read_timeout;
            if let Some(popped) = self.query::<Option<Popped>>(&cmd, deadline).await? {
                return Ok(Some(popped));
            }
        }
    }

    async fn peek(&self, queue: &str) -> Result<Option<String>, StoreError> {
        let mut cmd = redis::cmd("LINDEX");
        cmd.arg(queue).arg(0);
        self.query(&cmd, self.read_timeout).await
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("DEL");
        cmd.arg(keys);
        self.query::<i64>(&cmd, self.read_timeout).await.map(|_| ())
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(seconds);
        self.query::<i64>(&cmd, self.read_timeout).await.map(|_| ())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl);
        }
        self.query::<()>(&cmd, self.read_timeout).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query(&cmd, self.read_timeout).await
    }

    async fn llen(&self, queue: &str) -> Result<u64, StoreError> {
        let mut cmd = redis::cmd("LLEN");
        cmd.arg(queue);
        self.query(&cmd, self.read_timeout).await
    }

    async fn scan_count(&self, pattern: &str) -> Result<u64, StoreError> {
        // the cursor is connection state, so the whole scan holds one
        // connection; on a cluster this counts the routed node only
        match &self.pool {
            PoolKind::Single(pool) => {
                let mut conn = pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
                run_deadline(self.read_timeout, scan_count_on(&mut conn, pattern)).await
            }
            PoolKind::Cluster(pool) => {
                let mut conn = pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
                run_deadline(self.read_timeout, scan_count_on(&mut conn, pattern)).await
            }
        }
    }

    async fn time(&self) -> Result<f64, StoreError> {
        let cmd = redis::cmd("TIME");
        let (secs, micros): (f64, f64) = self.query(&cmd, self.read_timeout).await?;
        Ok(secs + micros / 1_000_000.0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let cmd = redis::cmd("PING");
        self.query::<String>(&cmd, self.read_timeout).await.map(|_| ())
    }
}
