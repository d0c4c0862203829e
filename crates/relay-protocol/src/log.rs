//! Thin wrapper around `tracing` so call sites read `log::info!(...)` the way
//! the rest of the codebase expects, while keeping subscriber setup in one
//! place.

pub use tracing::{debug, error, info, trace, warn};

/// Which binary is initializing logging, used only to tag the default
/// `RUST_LOG` filter directive when the environment does not set one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Gateway,
    Broker,
    Client,
}

impl LogType {
    #[allow(dead_code)]
    fn default_target(self) -> &'static str {
        match self {
            LogType::Gateway => "gateway",
            LogType::Broker => "broker",
            LogType::Client => "client",
        }
    }
}

/// Installs a global `tracing` subscriber. Safe to call more than once per
/// process (e.g. from tests); subsequent calls are ignored.
pub fn setup_logging(level: &str, component: LogType) {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = component; // reserved for future per-component filter defaults
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
