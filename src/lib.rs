//! Rotating-credential gateway for rate-limited upstream AI providers.

pub mod config;
pub mod executor;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod ratelimit;
pub mod reconcile;
pub mod store;
pub mod tokens;
pub mod upstream;
pub mod vault;

pub use config::AppConfig;
pub use executor::{ExecuteError, RetryPolicy, RotatingExecutor};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use tokens::{ApiToken, Provider, TokenManager};
