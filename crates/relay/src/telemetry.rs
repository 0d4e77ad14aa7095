// Tracing setup
//
// `RUST_LOG` wins when set; otherwise the configured level applies to
// everything.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber
///
/// Must be called at most once per process.
pub fn init(config: &LoggingConfig) {
    tracing_subscriber::registry()
        .with(filter(config))
        .with(fmt::layer().with_ansi(config.colors).with_target(true))
        .init();
}

fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_str()))
}
