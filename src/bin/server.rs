//! HTTP judge server; optionally co-locates the worker pool.

use std::sync::Arc;

use anyhow::Context;

use codejudge::config::Config;
use codejudge::core::coordinator;
use codejudge::core::error::AppResult;
use codejudge::infra::queue::RedisStore;
use codejudge::server::{router, AppState};
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
    if cfg.run_workers {
        WorkerSupervisor::start(Arc::clone(&cfg))?.run_background()?;
    }
    serve(cfg)
}

#[tokio::main]
async fn serve(cfg: Arc<Config>) -> AppResult<()> {
    let store = RedisStore::connect(&cfg.redis_uri, cfg.socket_timeout)?;
    if let Err(err) = coordinator::probe_clock(&store).await {
        tracing::warn!(error = %err, "clock probe against the store failed");
    }
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;
    tracing::info!(addr = %cfg.listen_addr, "judge server listening");
    axum::serve(listener, router(AppState::new(store, cfg))).await?;
    Ok(())
}
