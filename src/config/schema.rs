//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the token-rotation service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Durable token store settings.
    pub database: DatabaseConfig,

    /// Credential encryption settings.
    pub encryption: EncryptionConfig,

    /// Per-provider upstream settings.
    pub providers: ProvidersConfig,

    /// Locked-token reconciliation settings.
    pub reconciler: ReconcilerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the embedded database file.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "keywheel.redb".to_string(),
        }
    }
}

/// Credential encryption configuration.
///
/// The secret itself never lives in the config file; only the name of the
/// environment variable that carries it (64 hex chars, 32 bytes decoded).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Environment variable holding the hex-encoded 32-byte secret.
    pub secret_env: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            secret_env: "KEYWHEEL_SECRET_KEY".to_string(),
        }
    }
}

/// Settings for all supported upstream providers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub open_router: ProviderConfig,
    pub open_ai: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            open_router: ProviderConfig {
                enabled: true,
                base_url: "https://openrouter.ai/api/v1".to_string(),
                default_model: "deepseek/deepseek-r1:free".to_string(),
                probe_model: "meta-llama/llama-4-scout:free".to_string(),
                ..ProviderConfig::default()
            },
            open_ai: ProviderConfig {
                enabled: false,
                base_url: "https://api.openai.com/v1".to_string(),
                default_model: "gpt-4o-mini".to_string(),
                probe_model: "gpt-4o-mini".to_string(),
                ..ProviderConfig::default()
            },
        }
    }
}

/// Settings for a single upstream provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Whether calls are routed to this provider at all.
    pub enabled: bool,

    /// API base URL (no trailing slash).
    pub base_url: String,

    /// Model used when a request names none.
    pub default_model: String,

    /// Cheap model used by the liveness probe.
    pub probe_model: String,

    /// In-place retry attempts for transient upstream failures.
    pub http_call_retry_count: u32,

    /// Credential rotations before giving up on a rate-limited provider.
    pub rotation_retry_count: u32,

    /// Base delay for exponential backoff (doubles per attempt).
    pub retry_base_delay_ms: u64,

    /// Upper bound for a single backoff delay.
    pub retry_max_delay_ms: u64,

    /// Wall-clock timeout for one upstream call.
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            default_model: String::new(),
            probe_model: String::new(),
            http_call_retry_count: 3,
            rotation_retry_count: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5_000,
            request_timeout_secs: 60,
        }
    }
}

/// Reconciliation job configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Whether the periodic sweep runs at all.
    pub enabled: bool,

    /// Seconds between sweeps over locked tokens.
    pub interval_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Expose a Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Address the metrics exporter binds to.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9100".to_string(),
        }
    }
}
