use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_LOG_FILTER: &str = "info,timetable_sync=debug";

/// `RUST_LOG` when set and valid, the crate default otherwise.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Installs the global subscriber, writing to stderr so stdout stays clean for the CLI.
/// A second call is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(default_env_filter())
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init();
}
