//! Synchronous store adapter for worker processes.
//!
//! A worker owns exactly one connection for its whole life; reconnection is
//! handled by the worker's bounded-restart loop, not here.

use std::time::{Duration, Instant};

use super::{parse_store_uri, Popped, BlockingStore, StoreMode};
use crate::core::error::StoreError;

enum ConnKind {
    Single(redis::Connection),
    Cluster(redis::cluster::ClusterConnection),
}

/// Blocking store over a standalone node or a sharded cluster.
pub struct RedisBlockingStore {
    conn: ConnKind,
    read_timeout: Duration,
}

impl RedisBlockingStore {
    /// Open one connection according to the URI scheme and apply the read
    /// timeout.
    pub fn connect(uri: &str, read_timeout_secs: u64) -> Result<Self, StoreError> {
        let (mode, url) = parse_store_uri(uri);
        let read_timeout = Duration::from_secs(read_timeout_secs.max(5));
        let conn = match mode {
            StoreMode::Standalone => {
                let client = redis::Client::open(url.as_str())?;
                let mut conn = client.get_connection()?;
                conn.set_read_timeout(Some(read_timeout))?;
                ConnKind::Single(conn)
            }
            StoreMode::Cluster => {
                let client = redis::cluster::ClusterClient::new(vec![url.as_str()])?;
                let conn = client.get_connection()?;
                conn.set_read_timeout(Some(read_timeout))?;
                ConnKind::Cluster(conn)
            }
        };
        Ok(Self { conn, read_timeout })
    }

    fn query<T: redis::FromRedisValue>(&mut self, cmd: &redis::Cmd) -> Result<T, StoreError> {
        match &mut self.conn {
            ConnKind::Single(conn) => cmd.query(conn).map_err(StoreError::from),
            ConnKind::Cluster(conn) => cmd.query(conn).map_err(StoreError::from),
        }
    }
}

impl BlockingStore for RedisBlockingStore {
    fn push(&mut self, queue: &str, values: &[String]) -> Result<(), StoreError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(queue).arg(values);
        self.query::<i64>(&cmd).map(|_| ())
    }

    fn pop(&mut self, queue: &str) -> Result<Option<String>, StoreError> {
        let mut cmd = redis::cmd("LPOP");
        cmd.arg(queue);
        self.query(&cmd)
    }

    fn block_pop(&mut self, queues: &[String], timeout: f64) -> Result<Option<Popped>, StoreError> {
        let started = Instant::now();
        // keep every BLPOP below the socket read timeout so a quiet queue is
        // a nil reply, not a transport error; loop for the caller's total
        let step_cap = (self.read_timeout.as_secs_f64() - 2.0).max(1.0);
        loop {
            let remaining = timeout - started.elapsed().as_secs_f64();
            if remaining <= 0.0 {
                return Ok(None);
            }
            let mut cmd = redis::cmd("BLPOP");
            cmd.arg(queues).arg(remaining.min(step_cap));
            if let Some(popped) = self.query::<Option<Popped>>(&cmd)? {
                return Ok(Some(popped));
            }
        }
    }

    fn delete(&mut self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("DEL");
        cmd.arg(keys);
        self.query::<i64>(&cmd).map(|_| ())
    }

    fn expire(&mut self, key: &str, seconds: u64) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(seconds);
        self.query::<i64>(&cmd).map(|_| ())
    }

    fn set(&mut self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl);
        }
        self.query::<()>(&cmd)
    }

    fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query(&cmd)
    }

    fn llen(&mut self, queue: &str) -> Result<u64, StoreError> {
        let mut cmd = redis::cmd("LLEN");
        cmd.arg(queue);
        self.query(&cmd)
    }

    fn time(&mut self) -> Result<f64, StoreError> {
        let cmd = redis::cmd("TIME");
        let (secs, micros): (f64, f64) = self.query(&cmd)?;
        Ok(secs + micros / 1_000_000.0)
    }

    fn ping(&mut self) -> Result<(), StoreError> {
        let cmd = redis::cmd("PING");
        self.query::<String>(&cmd).map(|_| ())
    }
}
