//! Configuration loading
//!
//! Layers, lowest priority first:
//! 1. Built-in defaults
//! 2. A TOML file (`beanmarket.toml` unless a path is given)
//! 3. `BEANMARKET_*` environment variables, `__` separating nested keys
//!    (`BEANMARKET_API__TIMEOUT_MS=5000`)

use beanmarket_core::MarketplaceConfig;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use std::path::Path;
use tracing::debug;

use crate::errors::{ClientError, Result};

/// Default configuration file, relative to the working directory
pub const CONFIG_FILE: &str = "beanmarket.toml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "BEANMARKET_";

/// Load from `beanmarket.toml` and the environment
pub fn load_config() -> Result<MarketplaceConfig> {
    load_config_from(CONFIG_FILE)
}

/// Load from a specific file and the environment
///
/// A missing file is not an error; its layer is simply empty.
pub fn load_config_from<P: AsRef<Path>>(path: P) -> Result<MarketplaceConfig> {
    extract(layered(path.as_ref(), ENV_PREFIX))
}

fn layered(path: &Path, env_prefix: &str) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(MarketplaceConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(env_prefix).split("__"))
}

fn extract(figment: Figment) -> Result<MarketplaceConfig> {
    let config: MarketplaceConfig = figment
        .extract()
        .map_err(|e| ClientError::config_load(format!("Failed to load configuration: {e}")))?;
    config.validate()?;
    debug!(base_url = config.api.base_url.as_str(), "Configuration loaded");
    Ok(config)
}

/// Write `config` as TOML, creating parent directories
pub fn save_config<P: AsRef<Path>>(config: &MarketplaceConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| ClientError::storage_io(format!("Failed to create config directory: {e}")))?;
    }
    let encoded = toml::to_string_pretty(config)
        .map_err(|e| ClientError::config_load(format!("Failed to serialize config: {e}")))?;
    std::fs::write(path, encoded).map_err(|e| ClientError::storage_io(format!("Failed to write config file: {e}")))?;
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = extract(layered(&dir.path().join("absent.toml"), "BEANMARKET_TEST_ABSENT_")).unwrap();
        assert_eq!(config, MarketplaceConfig::default());
    }

    #[test]
    fn test_file_then_env_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beanmarket.toml");
        std::fs::write(
            &path,
            "[api]\nbase_url = \"https://api.beanmarket.test\"\ntimeout_ms = 5000\n\n[cache]\nstale_time_ms = 60000\n",
        )
        .unwrap();

        std::env::set_var("BEANMARKET_TEST_LAYER_API__TIMEOUT_MS", "7000");
        let config = extract(layered(&path, "BEANMARKET_TEST_LAYER_")).unwrap();
        std::env::remove_var("BEANMARKET_TEST_LAYER_API__TIMEOUT_MS");

        assert_eq!(config.api.base_url, "https://api.beanmarket.test");
        assert_eq!(config.api.timeout_ms, 7000);
        assert_eq!(config.cache.stale_time_ms, 60_000);
        assert_eq!(config.cache.gc_time_ms, 30 * 60 * 1_000);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("beanmarket.toml");
        let mut config = MarketplaceConfig::testing();
        config.session.storage_path = Some(dir.path().join("session.json"));

        save_config(&config, &path).unwrap();
        let loaded = extract(layered(&path, "BEANMARKET_TEST_SAVE_")).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beanmarket.toml");
        std::fs::write(&path, "[cache]\nstale_time_ms = 10\ngc_time_ms = 1\n").unwrap();
        let err = extract(layered(&path, "BEANMARKET_TEST_INVALID_")).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
