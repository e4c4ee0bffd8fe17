//! Store key layout shared by coordinators and workers.

use uuid::Uuid;

/// Crate version baked into every key so incompatible deployments never share
/// queues.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builds every key the service touches from one namespace prefix.
#[derive(Debug, Clone)]
pub struct KeySpace {
    work_queue: String,
    result_prefix: String,
    worker_prefix: String,
}

impl KeySpace {
    /// Key space under `prefix` (the `REDIS_KEY_PREFIX` setting).
    pub fn new(prefix: &str) -> Self {
        Self {
            work_queue: format!("{prefix}:{VERSION}:work-queue"),
            result_prefix: format!("{prefix}:{VERSION}:result-queue:"),
            worker_prefix: format!("{prefix}:{VERSION}:work-ids:"),
        }
    }

    /// The shared FIFO every coordinator pushes to and every worker pops from.
    pub fn work_queue(&self) -> &str {
        &self.work_queue
    }

    /// Single-use result list for one work id.
    pub fn result_queue(&self, work_id: &str) -> String {
        format!("{}{work_id}", self.result_prefix)
    }

    /// Heartbeat key for one worker process.
    pub fn worker_key(&self, worker_id: &str) -> String {
        format!("{}{worker_id}", self.worker_prefix)
    }

    /// Scan pattern matching every live worker's heartbeat key.
    pub fn worker_pattern(&self) -> String {
        format!("{}*", self.worker_prefix)
    }

    /// Fresh `{uuid}` fragment shared by all work ids of one batch, so that
    /// on a sharded store every result queue of the batch lands in one slot
    /// and multi-key pops stay legal.
    pub fn batch_tag() -> String {
        format!("{{{}}}", Uuid::new_v4())
    }

    /// Work id of the `index`-th member of a batch.
    pub fn batch_work_id(tag: &str, index: usize) -> String {
        format!("{tag}:{index}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = KeySpace::new("js");
        assert_eq!(keys.work_queue(), format!("js:{VERSION}:work-queue"));
        assert_eq!(
            keys.result_queue("{t}:3"),
            format!("js:{VERSION}:result-queue:{{t}}:3")
        );
        assert_eq!(keys.worker_key("w1"), format!("js:{VERSION}:work-ids:w1"));
        assert!(keys.worker_pattern().ends_with('*'));
    }

    #[test]
    fn test_batch_tag_is_braced_and_unique() {
        let a = KeySpace::batch_tag();
        let b = KeySpace::batch_tag();
        assert!(a.starts_with('{') && a.ends_with('}'));
        assert_ne!(a, b);
        assert_eq!(KeySpace::batch_work_id(&a, 7), format!("{a}:7"));
    }
}
