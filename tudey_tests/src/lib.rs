//! `tudey_tests`
//!
//! Helpers shared by the integration tests under `tests/`.

use std::sync::Arc;

use tudey_shared::actor::ActorConfig;

/// Routes `tracing` output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Mobile actor that starts walking along its rotation when spawned.
pub fn wanderer(speed: f32) -> Arc<ActorConfig> {
    Arc::new(ActorConfig {
        start_moving: true,
        ..ActorConfig::mobile(speed)
    })
}
