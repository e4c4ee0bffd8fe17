//! Shared utilities.

pub mod clock;
pub mod failure;
pub mod telemetry;

pub use clock::epoch_secs;
pub use failure::install_exit_on_panic;
pub use telemetry::init_tracing;
