//! Tracing setup shared by every binary embedding the conductor, lifted
//! from the teacher's `api-gateway::main` initialization (a
//! `tracing_subscriber::registry()` with an `EnvFilter` layer plus an
//! `fmt` layer) so every service configures logging identically.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global tracing subscriber. `default_filter` is used when
/// `RUST_LOG` is unset, e.g. `"workflow_engine=info"`.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
