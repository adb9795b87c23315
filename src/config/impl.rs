use std::sync::{Arc, OnceLock};

use anyhow::Context;
use arc_swap::ArcSwap;

use super::StaticConfig;

static CONFIG: OnceLock<ArcSwap<StaticConfig>> = OnceLock::new();

/// Get the global configuration instance
///
/// Returns an Arc pointer to the configuration, which is cheap to clone
/// and doesn't hold any locks. Falls back to defaults when
/// `init_config()` has not been called.
pub fn get_config() -> Arc<StaticConfig> {
    CONFIG
        .get_or_init(|| ArcSwap::from_pointee(StaticConfig::default()))
        .load_full()
}

/// Load, validate and install the global configuration
///
/// A missing file is not an error; environment variables and defaults apply.
/// Calling it again replaces the previous configuration.
pub fn init_config(path: &str) -> anyhow::Result<Arc<StaticConfig>> {
    let config = StaticConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from '{}'", path))?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;

    let config = Arc::new(config);
    CONFIG
        .get_or_init(|| ArcSwap::from_pointee(StaticConfig::default()))
        .store(Arc::clone(&config));
    Ok(config)
}
