//! Tracing setup shared by the server and worker binaries.

/// Install the env-filtered fmt subscriber unless the embedding process
/// already set one up. Worker child processes inherit `RUST_LOG` from the
/// supervisor, so all processes format logs the same way.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
