//! Upstream call execution.
//!
//! # Responsibilities
//! - Perform one network call against a provider API with a bearer credential
//! - Convert every failure mode into a structured [`UpstreamFailure`] the
//!   classification layer can inspect
//!
//! # Design Decisions
//! - Failures are values, not exceptions; the executor branches on the
//!   classification of the payload, never on error downcasting
//! - Response bodies pass through as JSON; request/response shaping belongs
//!   to the caller

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

/// Cap on how much of an upstream error body is retained, so oversized or
/// sensitive responses never land in logs or the failure journal whole.
const MAX_ERROR_BODY: usize = 512;

/// A structured upstream failure: status metadata plus whatever body the
/// provider returned, sufficient for classification and diagnosis.
#[derive(Debug, Clone)]
pub struct UpstreamFailure {
    /// HTTP status, when the exchange got far enough to have one.
    pub status: Option<u16>,
    /// Parsed error body, when the provider sent JSON.
    pub body: Option<Value>,
    /// Transport-level description (connect failure, decode error, ...).
    pub message: String,
    /// The call exceeded its wall-clock deadline.
    pub timed_out: bool,
}

impl UpstreamFailure {
    pub fn from_status(status: u16, body: Option<Value>) -> Self {
        Self {
            status: Some(status),
            body,
            message: format!("upstream returned status {status}"),
            timed_out: false,
        }
    }

    pub fn transport(error: &reqwest::Error) -> Self {
        Self {
            status: error.status().map(|s| s.as_u16()),
            body: None,
            message: error.to_string(),
            timed_out: error.is_timeout(),
        }
    }

    /// The provider's error message, wherever the vendor put it.
    pub fn error_message(&self) -> Option<&str> {
        let body = self.body.as_ref()?;
        body.pointer("/error/message")
            .or_else(|| body.pointer("/message"))
            .and_then(Value::as_str)
    }

    /// Truncated rendering for logs and the failure journal.
    pub fn detail(&self) -> String {
        let body = match &self.body {
            Some(value) => value.to_string(),
            None => self.message.clone(),
        };
        let body = if body.len() > MAX_ERROR_BODY {
            let cut = body
                .char_indices()
                .take_while(|(i, _)| *i < MAX_ERROR_BODY)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            format!("{}... [truncated]", &body[..cut])
        } else {
            body
        };
        match self.status {
            Some(status) => format!("status={status} body={body}"),
            None => format!("transport error: {body}"),
        }
    }
}

impl std::fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.detail())
    }
}

/// One chat message in the vendor-common shape.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Thin client for the OpenAI-compatible chat-completions surface.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// POST one completion request. Success passes the provider JSON
    /// through untouched; any failure comes back as a structured payload.
    pub async fn chat_completion(
        &self,
        api_key: &str,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
    ) -> Result<Value, UpstreamFailure> {
        let mut payload = serde_json::json!({
            "model": model,
            "messages": messages,
        });
        if let Some(max_tokens) = max_tokens {
            payload["max_tokens"] = max_tokens.into();
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| UpstreamFailure::transport(&e))?;

        Self::into_json(response).await
    }

    /// GET the model listing; the cheapest authenticated call the
    /// OpenAI-style surface offers.
    pub async fn list_models(&self, api_key: &str) -> Result<Value, UpstreamFailure> {
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| UpstreamFailure::transport(&e))?;

        Self::into_json(response).await
    }

    async fn into_json(response: reqwest::Response) -> Result<Value, UpstreamFailure> {
        let status = response.status();
        let body: Option<Value> = response.json().await.ok();

        if status.is_success() {
            body.ok_or_else(|| UpstreamFailure {
                status: Some(status.as_u16()),
                body: None,
                message: "upstream returned a non-JSON success body".into(),
                timed_out: false,
            })
        } else {
            Err(UpstreamFailure::from_status(status.as_u16(), body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_reads_nested_and_flat_shapes() {
        let nested = UpstreamFailure::from_status(
            429,
            Some(serde_json::json!({"error": {"message": "Rate limit exceeded"}})),
        );
        assert_eq!(nested.error_message(), Some("Rate limit exceeded"));

        let flat = UpstreamFailure::from_status(
            429,
            Some(serde_json::json!({"message": "slow down"})),
        );
        assert_eq!(flat.error_message(), Some("slow down"));

        let none = UpstreamFailure::from_status(500, None);
        assert_eq!(none.error_message(), None);
    }

    #[test]
    fn detail_truncates_large_bodies() {
        let big = "x".repeat(5_000);
        let failure = UpstreamFailure::from_status(
            500,
            Some(serde_json::json!({ "error": { "message": big } })),
        );
        let detail = failure.detail();
        assert!(detail.len() < 700);
        assert!(detail.ends_with("... [truncated]"));
    }

    #[test]
    fn detail_without_status_marks_transport() {
        let failure = UpstreamFailure {
            status: None,
            body: None,
            message: "connection refused".into(),
            timed_out: false,
        };
        assert!(failure.detail().starts_with("transport error"));
    }
}
