//! The worker loop: heartbeat, pop, judge, publish.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::core::error::StoreError;
use crate::core::model::{ResultReason, SubmissionResult, WorkPayload};
use crate::infra::keys::KeySpace;
use crate::infra::queue::{BlockingStore, RedisBlockingStore};
use crate::util::clock::epoch_secs;

/// Environment marker that routes a binary's `main` into the worker loop.
pub const WORKER_CHILD_ENV: &str = "CODEJUDGE_WORKER_CHILD";

/// Back-off before reconnecting after the inner loop dies.
const RESTART_DELAY: Duration = Duration::from_secs(60);
/// Warm-up probes against the store clock.
const CLOCK_PROBES: usize = 10;
/// Skew beyond this is worth an operator's attention.
const MAX_CLOCK_SKEW_SECS: f64 = 1.0;

/// One worker process's judging loop over a blocking store connection.
pub struct WorkerLoop<S> {
    worker_id: String,
    store: S,
    cfg: Arc<Config>,
    keys: KeySpace,
}

impl<S: BlockingStore> WorkerLoop<S> {
    /// Loop with a fresh worker id.
    pub fn new(store: S, cfg: Arc<Config>) -> Self {
        let keys = KeySpace::new(&cfg.redis_key_prefix);
        Self {
            worker_id: Uuid::new_v4().to_string(),
            store,
            cfg,
            keys,
        }
    }

    /// This worker's heartbeat identity.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Warm up the connection and compare the store clock against ours.
    ///
    /// The stale-work check compares a coordinator wall-clock timestamp with
    /// this process's wall clock, so skew silently eats into the allowed
    /// queueing time.
    pub fn probe_clock(&mut self) -> Result<(), StoreError> {
        let mut skew = 0.0;
        for _ in 0..CLOCK_PROBES {
            skew = self.store.time()? - epoch_secs();
        }
        if skew.abs() > MAX_CLOCK_SKEW_SECS {
            warn!(
                skew_secs = skew,
                "clock skew against the store; make sure MAX_QUEUE_WORK_LIFE_TIME covers it"
            );
        }
        Ok(())
    }

    /// One heartbeat + pop + judge round. Returns whether work was handled.
    pub fn tick(&mut self) -> Result<bool, StoreError> {
        self.store.set(
            &self.keys.worker_key(&self.worker_id),
            "1",
            Some(self.cfg.worker_register_expire),
        )?;
        let work_queue = self.keys.work_queue().to_string();
        let popped = self.store.block_pop(
            std::slice::from_ref(&work_queue),
            self.cfg.work_queue_block_timeout as f64,
        )?;
        let Some((_, payload_json)) = popped else {
            return Ok(false);
        };
        self.handle_payload(&payload_json)?;
        Ok(true)
    }

    /// Run until the store connection fails; the caller owns the restart.
    pub fn run(&mut self) -> Result<(), StoreError> {
        self.probe_clock()?;
        loop {
            self.tick()?;
        }
    }

    fn handle_payload(&mut self, payload_json: &str) -> Result<(), StoreError> {
        let (result, result_queue, long_running) =
            match serde_json::from_str::<WorkPayload>(payload_json) {
                Ok(payload) => {
                    if !payload.long_running {
                        let age = epoch_secs() - payload.timestamp;
                        if age >= self.cfg.max_queue_work_life_time as f64 {
                            // the requester gave up long ago; judging now
                            // would burn a sandbox slot for nobody
                            warn!(
                                work_id = %payload.work_id,
                                age_secs = age,
                                "skipping work that outlived its queue budget"
                            );
                            return Ok(());
                        }
                    }
                    let result_queue = self.keys.result_queue(&payload.work_id);
                    (judge_guarded(&self.cfg, &payload), result_queue, payload.long_running)
                }
                Err(err) => {
                    error!(error = %err, "failed to parse work payload");
                    match recover_ids(payload_json) {
                        Some((work_id, sub_id, long_running)) => (
                            SubmissionResult::failure(sub_id, 0.0, ResultReason::InvalidInput),
                            self.keys.result_queue(&work_id),
                            long_running,
                        ),
                        None => {
                            error!("payload carries no recoverable ids, dropping");
                            return Ok(());
                        }
                    }
                }
            };
        let result_json = serde_json::to_string(&result)?;
        self.store
            .push(&result_queue, std::slice::from_ref(&result_json))?;
        let ttl = if long_running {
            self.cfg.result_long_batch_expire
        } else {
            self.cfg.result_expire
        };
        self.store.expire(&result_queue, ttl)?;
        Ok(())
    }
}

fn judge_guarded(cfg: &Config, payload: &WorkPayload) -> SubmissionResult {
    match catch_unwind(AssertUnwindSafe(|| {
        crate::worker::judge(cfg, &payload.submission)
    })) {
        Ok(result) => result,
        Err(_) => {
            error!(work_id = %payload.work_id, "judging panicked");
            SubmissionResult::failure(
                &payload.submission.sub_id,
                0.0,
                ResultReason::InternalError,
            )
        }
    }
}

/// Loose parse of an invalid payload: a reply is still owed when both ids
/// survive, so the requester is not left waiting out its timeout.
fn recover_ids(payload_json: &str) -> Option<(String, String, bool)> {
    let value: serde_json::Value = serde_json::from_str(payload_json).ok()?;
    let work_id = value.get("work_id")?.as_str()?.to_string();
    let sub_id = value.get("submission")?.get("sub_id")?.as_str()?.to_string();
    let long_running = value
        .get("long_running")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    Some((work_id, sub_id, long_running))
}

/// Entry point for a worker process: connect, loop, restart on failure.
pub fn run_worker(cfg: Arc<Config>) -> ! {
    loop {
        match RedisBlockingStore::connect(&cfg.redis_uri, cfg.socket_timeout) {
            Ok(store) => {
                let mut worker = WorkerLoop::new(store, Arc::clone(&cfg));
                info!(worker_id = %worker.worker_id(), "worker loop starting");
                if let Err(err) = worker.run() {
                    error!(
                        error = %err,
                        delay_secs = RESTART_DELAY.as_secs(),
                        "worker loop failed, restarting"
                    );
                }
            }
            Err(err) => {
                error!(
                    error = %err,
                    delay_secs = RESTART_DELAY.as_secs(),
                    "could not reach the store, retrying"
                );
            }
        }
        thread::sleep(RESTART_DELAY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recover_ids_from_loose_payload() {
        let json = r#"{"work_id":"w-1","long_running":true,"submission":{"sub_id":"s-1"}}"#;
        assert_eq!(
            recover_ids(json),
            Some(("w-1".into(), "s-1".into(), true))
        );
    }

    #[test]
    fn test_recover_ids_requires_both_ids() {
        assert!(recover_ids(r#"{"work_id":"w-1"}"#).is_none());
        assert!(recover_ids(r#"{"submission":{"sub_id":"s-1"}}"#).is_none());
        assert!(recover_ids("not json").is_none());
    }
}
