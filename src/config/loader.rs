//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
    /// The encryption secret is absent or malformed.
    Secret(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
            ConfigError::Secret(msg) => write!(f, "Secret error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: AppConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Read the encryption secret named by the config from the environment.
///
/// The secret is a 64-character hex string decoding to 32 bytes. A missing
/// or malformed value fails here, once, at startup.
pub fn load_secret(config: &AppConfig) -> Result<[u8; 32], ConfigError> {
    let var = &config.encryption.secret_env;
    let raw = std::env::var(var)
        .map_err(|_| ConfigError::Secret(format!("environment variable {var} is not set")))?;

    let bytes = hex::decode(raw.trim())
        .map_err(|e| ConfigError::Secret(format!("{var} is not valid hex: {e}")))?;

    bytes.try_into().map_err(|b: Vec<u8>| {
        ConfigError::Secret(format!("{var} must decode to 32 bytes, got {}", b.len()))
    })
}
