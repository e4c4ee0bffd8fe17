//! In-memory store backend.
//!
//! Implements both store traits over one shared map of lists so coordinator
//! and worker code can run against each other in-process. TTLs are recorded,
//! not enforced; tests assert that expiry was requested.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};

use super::{BlockingStore, Popped, Store};
use crate::core::error::StoreError;
use crate::util::clock::epoch_secs;

/// Async-side poll interval for `block_pop`.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct Shared {
    lists: HashMap<String, VecDeque<String>>,
    strings: HashMap<String, String>,
    ttls: HashMap<String, u64>,
}

#[derive(Default)]
struct Inner {
    shared: Mutex<Shared>,
    wakeup: Condvar,
}

/// Shared in-process store; clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

fn matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

impl MemoryStore {
    /// Fresh empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// TTL recorded for `key`, if any. Test helper.
    pub fn ttl_of(&self, key: &str) -> Option<u64> {
        self.inner.shared.lock().ttls.get(key).copied()
    }

    /// Snapshot of a list's contents. Test helper.
    pub fn list(&self, queue: &str) -> Vec<String> {
        self.inner
            .shared
            .lock()
            .lists
            .get(queue)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn push_values(&self, queue: &str, values: &[String]) {
        if values.is_empty() {
            return;
        }
        let mut shared = self.inner.shared.lock();
        let list = shared.lists.entry(queue.to_string()).or_default();
        list.extend(values.iter().cloned());
        drop(shared);
        self.inner.wakeup.notify_all();
    }

    fn pop_front(&self, queue: &str) -> Option<String> {
        let mut shared = self.inner.shared.lock();
        shared.lists.get_mut(queue).and_then(VecDeque::pop_front)
    }

    fn try_pop_any(&self, queues: &[String]) -> Option<Popped> {
        let mut shared = self.inner.shared.lock();
        for queue in queues {
            if let Some(value) = shared.lists.get_mut(queue).and_then(VecDeque::pop_front) {
                return Some((queue.clone(), value));
            }
        }
        None
    }

    fn peek_front(&self, queue: &str) -> Option<String> {
        self.inner
            .shared
            .lock()
            .lists
            .get(queue)
            .and_then(|list| list.front().cloned())
    }

    fn remove_keys(&self, keys: &[String]) {
        let mut shared = self.inner.shared.lock();
        for key in keys {
            shared.lists.remove(key);
            shared.strings.remove(key);
            shared.ttls.remove(key);
        }
    }

    fn record_ttl(&self, key: &str, seconds: u64) {
        self.inner
            .shared
            .lock()
            .ttls
            .insert(key.to_string(), seconds);
    }

    fn set_string(&self, key: &str, value: &str, ttl: Option<u64>) {
        let mut shared = self.inner.shared.lock();
        shared.strings.insert(key.to_string(), value.to_string());
        if let Some(ttl) = ttl {
            shared.ttls.insert(key.to_string(), ttl);
        }
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.inner.shared.lock().strings.get(key).cloned()
    }

    fn list_len(&self, queue: &str) -> u64 {
        self.inner
            .shared
            .lock()
            .lists
            .get(queue)
            .map(|list| list.len() as u64)
            .unwrap_or(0)
    }

    fn count_matching(&self, pattern: &str) -> u64 {
        let shared = self.inner.shared.lock();
        let lists = shared.lists.keys().filter(|k| matches(pattern, k)).count();
        let strings = shared
            .strings
            .keys()
            .filter(|k| matches(pattern, k))
            .count();
        (lists + strings) as u64
    }

    fn block_pop_sync(&self, queues: &[String], timeout: f64) -> Option<Popped> {
        let deadline = Instant::now() + Duration::from_secs_f64(timeout.max(0.0));
        let mut shared = self.inner.shared.lock();
        loop {
            for queue in queues {
                if let Some(value) = shared.lists.get_mut(queue).and_then(VecDeque::pop_front) {
                    return Some((queue.clone(), value));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let _ = self.inner.wakeup.wait_for(&mut shared, deadline - now);
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn push(&self, queue: &str, values: &[String]) -> Result<(), StoreError> {
        self.push_values(queue, values);
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<String>, StoreError> {
        Ok(self.pop_front(queue))
    }

    async fn pop_multi(&self, queues: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        Ok(queues.iter().map(|queue| self.pop_front(queue)).collect())
    }

    async fn block_pop(
        &self,
        queues: &[String],
        timeout: f64,
    ) -> Result<Option<Popped>, StoreError> {
        // polling keeps the condvar off the async runtime; fine for a test
        // backend
        let deadline = Instant::now() + Duration::from_secs_f64(timeout.max(0.0));
        loop {
            if let Some(popped) = self.try_pop_any(queues) {
                return Ok(Some(popped));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn peek(&self, queue: &str) -> Result<Option<String>, StoreError> {
        Ok(self.peek_front(queue))
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        self.remove_keys(keys);
        Ok(())
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), StoreError> {
        self.record_ttl(key, seconds);
        Ok(())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StoreError> {
        self.set_string(key, value, ttl);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get_string(key))
    }

    async fn llen(&self, queue: &str) -> Result<u64, StoreError> {
        Ok(self.list_len(queue))
    }

    async fn scan_count(&self, pattern: &str) -> Result<u64, StoreError> {
        Ok(self.count_matching(pattern))
    }

    async fn time(&self) -> Result<f64, StoreError> {
        Ok(epoch_secs())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl BlockingStore for MemoryStore {
    fn push(&mut self, queue: &str, values: &[String]) -> Result<(), StoreError> {
        self.push_values(queue, values);
        Ok(())
    }

    fn pop(&mut self, queue: &str) -> Result<Option<String>, StoreError> {
        Ok(self.pop_front(queue))
    }

    fn block_pop(&mut self, queues: &[String], timeout: f64) -> Result<Option<Popped>, StoreError> {
        Ok(self.block_pop_sync(queues, timeout))
    }

    fn delete(&mut self, keys: &[String]) -> Result<(), StoreError> {
        self.remove_keys(keys);
        Ok(())
    }

    fn expire(&mut self, key: &str, seconds: u64) -> Result<(), StoreError> {
        self.record_ttl(key, seconds);
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StoreError> {
        self.set_string(key, value, ttl);
        Ok(())
    }

    fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get_string(key))
    }

    fn llen(&mut self, queue: &str) -> Result<u64, StoreError> {
        Ok(self.list_len(queue))
    }

    fn time(&mut self) -> Result<f64, StoreError> {
        Ok(epoch_secs())
    }

    fn ping(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
