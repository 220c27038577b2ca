// realtime-feedback/src/telemetry.rs

use std::sync::OnceLock;
use tracing_subscriber::{fmt, EnvFilter};

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Install the process-wide subscriber, honouring `RUST_LOG` (default `info`).
/// Later calls are no-ops.
pub fn init_tracing() {
    init_tracing_with("info");
}

pub fn init_tracing_with(default_filter: &str) {
    INSTALLED.get_or_init(|| {
        let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into());

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(env_filter))
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_target(true)
            .with_level(true)
            .compact()
            .finish();

        tracing::subscriber::set_global_default(subscriber).is_ok()
    });
}
