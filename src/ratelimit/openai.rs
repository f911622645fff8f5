//! OpenAI rate-limit probe.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::ratelimit::{classify_by_status, ErrorClass, RateLimitProbe};
use crate::upstream::{ChatClient, UpstreamFailure};

const RATE_LIMIT_MARKER: &str = "rate limit";

pub struct OpenAiProbe {
    client: ChatClient,
}

impl OpenAiProbe {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: ChatClient::new(base_url, timeout),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

#[async_trait]
impl RateLimitProbe for OpenAiProbe {
    fn classify(&self, failure: &UpstreamFailure) -> ErrorClass {
        classify_by_status(failure, RATE_LIMIT_MARKER)
    }

    /// The model listing is the cheapest authenticated OpenAI call; it
    /// answers 429 while the account is throttled without spending tokens.
    async fn probe_liveness(&self, token: &str) -> Result<bool, UpstreamFailure> {
        match self.client.list_models(token).await {
            Ok(_) => Ok(true),
            Err(failure) => match failure.status {
                Some(_) => Ok(false),
                None => Err(failure),
            },
        }
    }
}
