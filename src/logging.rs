//! Structured logging setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize `tracing` with an env-filter falling back to a sane default
/// when `RUST_LOG` is unset.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "candlesim=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
