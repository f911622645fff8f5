//! Token pool persistence contract.
//!
//! # Responsibilities
//! - Define the storage operations the lifecycle layer depends on
//! - Keep each conditional mutation atomic inside the backend
//!
//! # Design Decisions
//! - Lock/unlock are conditional single-row transitions returning whether
//!   the row actually changed; a no-op transition is a normal outcome
//! - Digest uniqueness is the backend's job, enforced in the same
//!   transaction as the insert
//! - Random selection among unlocked rows is uniform at the instant of
//!   the query; no reservation happens here

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::tokens::Provider;

mod memory;
mod redb_store;

pub use memory::MemoryTokenStore;
pub use redb_store::RedbTokenStore;

/// Pool-assigned stable token identifier.
pub type TokenId = Uuid;

/// One persisted token row. The value is stored as ciphertext only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRow {
    pub id: TokenId,
    pub provider: Provider,
    #[serde(with = "ciphertext_encoding")]
    pub ciphertext: Vec<u8>,
    /// Keyed digest of the plaintext; unique across the pool.
    pub digest: String,
    /// `None` means available; `Some` records when the row was locked.
    pub locked_at: Option<DateTime<Utc>>,
}

/// Result of an insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(TokenId),
    /// A row with the same digest already exists; nothing was written.
    Duplicate,
}

/// One recorded upstream failure, kept for diagnosis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub provider: Provider,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Errors surfaced by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("corrupt stored row: {0}")]
    Decode(String),
}

/// Durable storage of tokens with provider tag and lock state.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert unless the digest already exists.
    async fn insert(
        &self,
        ciphertext: Vec<u8>,
        digest: String,
        provider: Provider,
    ) -> Result<InsertOutcome, StoreError>;

    async fn fetch_by_id(&self, id: TokenId) -> Result<Option<TokenRow>, StoreError>;

    /// One row chosen uniformly among unlocked rows of the provider.
    /// `None` is an expected outcome, not an error.
    async fn fetch_random_unlocked(
        &self,
        provider: Provider,
    ) -> Result<Option<TokenRow>, StoreError>;

    async fn fetch_all_locked(
        &self,
        provider: Option<Provider>,
    ) -> Result<Vec<TokenRow>, StoreError>;

    /// Set the lock timestamp to now, only if currently unlocked.
    /// Returns whether the row transitioned.
    async fn lock(&self, id: TokenId) -> Result<bool, StoreError>;

    /// Clear the lock timestamp, only if currently locked.
    async fn unlock(&self, id: TokenId) -> Result<bool, StoreError>;

    async fn delete(&self, id: TokenId) -> Result<(), StoreError>;
}

/// Best-effort journal of raw upstream failure payloads.
///
/// Writes are advisory; a failed write is logged by the caller and never
/// propagated into the call path.
#[async_trait]
pub trait FailureJournal: Send + Sync {
    async fn record_failure(&self, provider: Provider, detail: &str) -> Result<(), StoreError>;

    async fn recent_failures(&self, limit: usize) -> Result<Vec<FailureRecord>, StoreError>;
}

mod ciphertext_encoding {
    //! Ciphertext travels through serde as base64 text.

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
