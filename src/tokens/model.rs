//! Provider tags and the in-memory token handle.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::TokenId;

/// An upstream service identity. Closed set; `Unknown` absorbs values a
/// newer peer might send without breaking deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    OpenRouter,
    OpenAi,
    #[serde(other)]
    Unknown,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "OpenRouter",
            Provider::OpenAi => "OpenAI",
            Provider::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decrypted credential held transiently during active use.
///
/// Never persisted; rebuilt on every rotation.
#[derive(Clone)]
pub struct ApiToken {
    pub id: TokenId,
    pub provider: Provider,
    /// Decrypted plaintext. Exists only in memory.
    pub value: String,
}

// Manual Debug so the plaintext can never reach a log line via `{:?}`.
impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiToken")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("value", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn provider_serde_names() {
        assert_eq!(
            serde_json::to_string(&Provider::OpenRouter).unwrap(),
            "\"open_router\""
        );
        let p: Provider = serde_json::from_str("\"open_ai\"").unwrap();
        assert_eq!(p, Provider::OpenAi);
        let p: Provider = serde_json::from_str("\"something_new\"").unwrap();
        assert_eq!(p, Provider::Unknown);
    }

    #[test]
    fn debug_redacts_value() {
        let token = ApiToken {
            id: Uuid::new_v4(),
            provider: Provider::OpenRouter,
            value: "sk-or-v1-secret".into(),
        };
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
