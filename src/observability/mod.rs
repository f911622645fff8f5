//! Observability subsystem.
//!
//! # Design Decisions
//! - Structured logging through `tracing`; subscriber installed in `main`
//! - Credential plaintext and ciphertext never appear in log fields
//! - Metrics are cheap counter increments, exported via Prometheus scrape

pub mod metrics;
