//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (retry counts >= 1, delays ordered)
//! - Check provider sections are complete when enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before the config is accepted into the system

use std::net::SocketAddr;

use url::Url;

use crate::config::schema::{AppConfig, ProviderConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g. "providers.open_router.base_url").
    pub field: String,
    /// Human-readable description of the problem.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate an already-deserialized configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError {
            field: "listener.bind_address".into(),
            message: format!("not a valid socket address: {}", config.listener.bind_address),
        });
    }

    if config.database.path.trim().is_empty() {
        errors.push(ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    if config.encryption.secret_env.trim().is_empty() {
        errors.push(ValidationError {
            field: "encryption.secret_env".into(),
            message: "must name an environment variable".into(),
        });
    }

    validate_provider(&config.providers.open_router, "providers.open_router", &mut errors);
    validate_provider(&config.providers.open_ai, "providers.open_ai", &mut errors);

    if config.reconciler.enabled && config.reconciler.interval_secs == 0 {
        errors.push(ValidationError {
            field: "reconciler.interval_secs".into(),
            message: "must be positive when the reconciler is enabled".into(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError {
            field: "observability.metrics_address".into(),
            message: format!(
                "not a valid socket address: {}",
                config.observability.metrics_address
            ),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_provider(provider: &ProviderConfig, prefix: &str, errors: &mut Vec<ValidationError>) {
    if !provider.enabled {
        return;
    }

    match Url::parse(&provider.base_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(ValidationError {
            field: format!("{prefix}.base_url"),
            message: format!("unsupported scheme: {}", url.scheme()),
        }),
        Err(e) => errors.push(ValidationError {
            field: format!("{prefix}.base_url"),
            message: format!("not a valid URL: {e}"),
        }),
    }

    if provider.default_model.trim().is_empty() {
        errors.push(ValidationError {
            field: format!("{prefix}.default_model"),
            message: "must not be empty".into(),
        });
    }

    if provider.probe_model.trim().is_empty() {
        errors.push(ValidationError {
            field: format!("{prefix}.probe_model"),
            message: "must not be empty".into(),
        });
    }

    if provider.http_call_retry_count == 0 {
        errors.push(ValidationError {
            field: format!("{prefix}.http_call_retry_count"),
            message: "at least one call attempt is required".into(),
        });
    }

    if provider.rotation_retry_count == 0 {
        errors.push(ValidationError {
            field: format!("{prefix}.rotation_retry_count"),
            message: "at least one rotation attempt is required".into(),
        });
    }

    if provider.retry_base_delay_ms > provider.retry_max_delay_ms {
        errors.push(ValidationError {
            field: format!("{prefix}.retry_base_delay_ms"),
            message: format!(
                "base delay {}ms exceeds max delay {}ms",
                provider.retry_base_delay_ms, provider.retry_max_delay_ms
            ),
        });
    }

    if provider.request_timeout_secs == 0 {
        errors.push(ValidationError {
            field: format!("{prefix}.request_timeout_secs"),
            message: "upstream calls need a deadline".into(),
        });
    }
}
