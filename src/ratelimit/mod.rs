//! Rate-limit detection, per upstream provider.
//!
//! # Responsibilities
//! - Classify an upstream failure payload (pure, synchronous)
//! - Probe whether a specific credential is currently rate-limited
//!   (one minimal live call)
//!
//! # Design Decisions
//! - One probe implementation per provider behind a capability trait,
//!   selected through a static provider → probe map
//! - Classification drives the executor's state machine; rotation is gated
//!   on the `RateLimited` tag alone, never on error counts

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ProvidersConfig;
use crate::tokens::Provider;
use crate::upstream::UpstreamFailure;

mod openai;
mod openrouter;

pub use openai::OpenAiProbe;
pub use openrouter::OpenRouterProbe;

/// Fixed taxonomy the executor branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The credential hit the provider's rate limit; retrying it is
    /// pointless until the window clears.
    RateLimited,
    /// Transient network/server trouble; the same credential may work on
    /// the next attempt.
    OtherRetryable,
    /// Anything else; retrying cannot help.
    NonRetryable,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::OtherRetryable => "other_retryable",
            ErrorClass::NonRetryable => "non_retryable",
        }
    }
}

/// Vendor-specific rate-limit detection.
#[async_trait]
pub trait RateLimitProbe: Send + Sync {
    /// Classify one failure payload. Pure; no I/O.
    fn classify(&self, failure: &UpstreamFailure) -> ErrorClass;

    /// One minimal live call with the given credential. `Ok(true)` means
    /// the credential is serviceable again; an `Err` is a probe problem,
    /// not a verdict.
    async fn probe_liveness(&self, token: &str) -> Result<bool, UpstreamFailure>;
}

/// Status-based classification shared by the OpenAI-compatible providers;
/// each probe layers its vendor message check on top.
pub(crate) fn classify_by_status(
    failure: &UpstreamFailure,
    rate_limit_marker: &str,
) -> ErrorClass {
    if failure.status == Some(429) {
        return ErrorClass::RateLimited;
    }

    if failure
        .error_message()
        .is_some_and(|m| m.to_ascii_lowercase().contains(rate_limit_marker))
    {
        return ErrorClass::RateLimited;
    }

    if failure.timed_out {
        return ErrorClass::OtherRetryable;
    }

    match failure.status {
        // Transport-level failure with no response at all.
        None => ErrorClass::OtherRetryable,
        Some(status) if status >= 500 => ErrorClass::OtherRetryable,
        Some(_) => ErrorClass::NonRetryable,
    }
}

/// Build the provider → probe map from configuration.
pub fn build_probes(config: &ProvidersConfig) -> HashMap<Provider, Arc<dyn RateLimitProbe>> {
    let mut probes: HashMap<Provider, Arc<dyn RateLimitProbe>> = HashMap::new();
    probes.insert(
        Provider::OpenRouter,
        Arc::new(OpenRouterProbe::from_config(&config.open_router)),
    );
    probes.insert(
        Provider::OpenAi,
        Arc::new(OpenAiProbe::from_config(&config.open_ai)),
    );
    probes
}
