use std::path::Path;

use super::{AppConfig, ConfigError, API_KEY_ENV};

/// Load configuration from a YAML file
///
/// The upstream credential can be supplied either in the file or through the
/// `DEEPSEEK_API_KEY` environment variable; the environment wins so that the
/// key can stay out of checked-in config files.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }

    let content = std::fs::read_to_string(path)?;
    let mut config: AppConfig = serde_yaml::from_str(&content)?;

    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            config.upstream.api_key = Some(key);
        }
    }

    config.validate()?;

    Ok(config)
}
