//! Logging initialization.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

use crate::settings::LoggingConfig;

/// Installs the global subscriber. `RUST_LOG` takes precedence over
/// `logging.level`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    match config.format.as_str() {
        "json" => init_json(filter, config.enable_target),
        _ => init_console(filter, config.enable_target),
    }
}

fn init_console(filter: EnvFilter, with_target: bool) -> Result<()> {
    let subscriber = Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(with_target));

    tracing::subscriber::set_global_default(subscriber)?;
    tracing::debug!("Console logging initialized");
    Ok(())
}

fn init_json(filter: EnvFilter, with_target: bool) -> Result<()> {
    let subscriber = Registry::default().with(filter).with(
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(with_target),
    );

    tracing::subscriber::set_global_default(subscriber)?;
    tracing::debug!("JSON logging initialized");
    Ok(())
}
