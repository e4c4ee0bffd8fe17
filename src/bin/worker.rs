//! Worker pool entry point: a supervisor that keeps judging processes alive.

use std::sync::Arc;

use codejudge::config::Config;
use codejudge::core::error::AppResult;
use codejudge::util::{init_tracing, install_exit_on_panic};
use codejudge::worker::{run_worker, WorkerSupervisor, WORKER_CHILD_ENV};

fn main() -> AppResult<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cfg = Arc::new(Config::from_env()?);
    // supervisor children re-exec this binary with the marker set
    if std::env::var(WORKER_CHILD_ENV).is_ok() {
        run_worker(cfg);
    }
    install_exit_on_panic();
    WorkerSupervisor::start(cfg)?.run()
}
