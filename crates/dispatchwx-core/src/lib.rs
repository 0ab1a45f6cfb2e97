pub mod config;
pub mod error;

pub use config::{
    CacheConfig, Config, ProviderConfig, RiskConfig, ValidationResult, API_KEY_ENV,
    PROVIDER_MAX_BATCH,
};
pub use error::ConfigError;

use anyhow::Result;

/// Initialize logging for the dispatchwx binary
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("dispatchwx core initialized");
    Ok(())
}
