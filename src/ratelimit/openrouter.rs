//! OpenRouter rate-limit probe.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::ratelimit::{classify_by_status, ErrorClass, RateLimitProbe};
use crate::upstream::{ChatClient, ChatMessage, UpstreamFailure};

/// OpenRouter reports limit exhaustion as 429, with this phrase in the
/// error message on other statuses for per-model daily quotas.
const RATE_LIMIT_MARKER: &str = "rate limit";

pub struct OpenRouterProbe {
    client: ChatClient,
    probe_model: String,
}

impl OpenRouterProbe {
    pub fn new(base_url: impl Into<String>, probe_model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: ChatClient::new(base_url, timeout),
            probe_model: probe_model.into(),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            config.probe_model.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

#[async_trait]
impl RateLimitProbe for OpenRouterProbe {
    fn classify(&self, failure: &UpstreamFailure) -> ErrorClass {
        classify_by_status(failure, RATE_LIMIT_MARKER)
    }

    async fn probe_liveness(&self, token: &str) -> Result<bool, UpstreamFailure> {
        let messages = [ChatMessage::user("Are you healthy?")];
        match self
            .client
            .chat_completion(token, &self.probe_model, &messages, Some(16))
            .await
        {
            Ok(_) => Ok(true),
            Err(failure) => match failure.status {
                // A definite answer from the provider: the credential is
                // still limited (or rejected), keep it out of the pool.
                Some(_) => Ok(false),
                // No answer at all: report the probe itself as failed.
                None => Err(failure),
            },
        }
    }
}
