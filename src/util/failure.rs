//! Fatal-panic policy for supervising processes.

use std::panic;
use std::process;

/// Make any unhandled panic exit the process non-zero.
///
/// The supervisor runs its checks on a background thread; a panicking thread
/// would otherwise die silently and leave the worker pool unattended. Exiting
/// lets the container orchestrator restart the pod instead.
pub fn install_exit_on_panic() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        default_hook(info);
        tracing::error!("unhandled panic in a supervising thread, exiting");
        process::exit(1);
    }));
}
