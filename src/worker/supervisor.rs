//! Keeps the worker pool alive and bounds runaway judged programs.

use std::process::{Child, Command};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::worker::run::WORKER_CHILD_ENV;

/// Cadence of the liveness/hang sweep.
const CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Wall-clock slack granted on top of the CPU limit before a judged
/// descendant counts as hung; its own alarm should have fired well before.
const HANG_SLACK_SECS: u64 = 5;

/// Spawns and replaces worker processes, and force-kills judged descendants
/// that escaped their in-child limits.
pub struct WorkerSupervisor {
    cfg: Arc<Config>,
    workers: Vec<Child>,
}

impl WorkerSupervisor {
    /// Spawn the configured number of worker processes.
    pub fn start(cfg: Arc<Config>) -> std::io::Result<Self> {
        info!(count = cfg.max_workers, "starting workers");
        let mut workers = Vec::with_capacity(cfg.max_workers);
        for _ in 0..cfg.max_workers {
            workers.push(spawn_worker_process()?);
        }
        Ok(Self { cfg, workers })
    }

    /// Run the check loop on the current thread.
    pub fn run(mut self) -> ! {
        let mut system = System::new();
        loop {
            thread::sleep(CHECK_INTERVAL);
            if let Err(err) = self.check_workers(&mut system) {
                error!(error = %err, "worker check failed, retrying next round");
            }
        }
    }

    /// Run the check loop on a background thread (RUN_WORKERS co-location).
    pub fn run_background(self) -> std::io::Result<()> {
        thread::Builder::new()
            .name("worker-supervisor".into())
            .spawn(move || self.run())
            .map(|_| ())
    }

    fn check_workers(&mut self, system: &mut System) -> std::io::Result<()> {
        let hang_limit_secs = self.cfg.max_execution_time + HANG_SLACK_SECS;
        let mut failed = 0usize;
        let mut busy = 0usize;
        let mut hanged = 0usize;
        system.refresh_processes(ProcessesToUpdate::All, true);
        for worker in &mut self.workers {
            if worker.try_wait()?.is_some() {
                error!("worker process exited, replacing");
                *worker = spawn_worker_process()?;
                failed += 1;
                continue;
            }
            let judged = descendants_of(system, Pid::from_u32(worker.id()));
            if judged.is_empty() {
                continue;
            }
            busy += 1;
            let mut any_hung = false;
            for pid in judged {
                if let Some(process) = system.process(pid) {
                    if process.run_time() > hang_limit_secs {
                        warn!(
                            pid = pid.as_u32(),
                            run_secs = process.run_time(),
                            "judged process outlived its limit, killing"
                        );
                        process.kill();
                        any_hung = true;
                    }
                }
            }
            if any_hung {
                hanged += 1;
            }
        }
        info!(
            total = self.workers.len(),
            free = self.workers.len() - busy,
            failed,
            busy,
            hanged,
            "worker pool status"
        );
        Ok(())
    }
}

fn spawn_worker_process() -> std::io::Result<Child> {
    let exe = std::env::current_exe()?;
    Command::new(exe).env(WORKER_CHILD_ENV, "1").spawn()
}

/// All transitive children of `root` in the refreshed snapshot.
fn descendants_of(system: &System, root: Pid) -> Vec<Pid> {
    let mut found = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for (pid, process) in system.processes() {
            if process.parent() == Some(parent) {
                frontier.push(*pid);
                found.push(*pid);
            }
        }
    }
    found
}
