//! Token lifecycle manager.
//!
//! The sole caller of the vault and the store from business logic.
//! Decrypts on read, encrypts on write; everything above this layer only
//! ever sees `ApiToken` handles or opaque identifiers.

use std::sync::Arc;

use thiserror::Error;

use crate::observability::metrics;
use crate::store::{InsertOutcome, StoreError, TokenId, TokenRow, TokenStore};
use crate::tokens::{ApiToken, Provider};
use crate::vault::{TokenVault, VaultError};

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered(TokenId),
    /// The same plaintext is already in the pool. Nothing was written.
    Duplicate,
}

/// Errors surfaced by lifecycle operations.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Decryption failed for a stored row. Treated as a data-integrity
    /// incident, surfaced to the caller, never retried.
    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Orchestrates selection, locking, unlocking and registration of tokens.
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    vault: Arc<TokenVault>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn TokenStore>, vault: Arc<TokenVault>) -> Self {
        Self { store, vault }
    }

    pub async fn get_by_id(&self, id: TokenId) -> Result<Option<ApiToken>, TokenError> {
        let Some(row) = self.store.fetch_by_id(id).await? else {
            tracing::warn!(token_id = %id, "token not found");
            return Ok(None);
        };
        Ok(Some(self.open(row)?))
    }

    /// A random unlocked token for the provider, or `None` when the pool
    /// has nothing available. Callers that require a token convert the
    /// `None` into their own hard failure.
    pub async fn get_random_for_provider(
        &self,
        provider: Provider,
    ) -> Result<Option<ApiToken>, TokenError> {
        let Some(row) = self.store.fetch_random_unlocked(provider).await? else {
            tracing::warn!(%provider, "no unlocked token available");
            return Ok(None);
        };
        Ok(Some(self.open(row)?))
    }

    pub async fn get_locked(
        &self,
        provider: Option<Provider>,
    ) -> Result<Vec<ApiToken>, TokenError> {
        let rows = self.store.fetch_all_locked(provider).await?;
        rows.into_iter().map(|row| self.open(row)).collect()
    }

    /// Encrypt, digest and insert a fresh credential. Registering the same
    /// plaintext twice is a no-op signalled as `Duplicate`.
    pub async fn register(
        &self,
        plaintext: &str,
        provider: Provider,
    ) -> Result<RegisterOutcome, TokenError> {
        let ciphertext = self.vault.encrypt(plaintext)?;
        let digest = self.vault.digest(plaintext);

        match self.store.insert(ciphertext, digest, provider).await? {
            InsertOutcome::Inserted(id) => {
                tracing::info!(token_id = %id, %provider, "token registered");
                Ok(RegisterOutcome::Registered(id))
            }
            InsertOutcome::Duplicate => {
                tracing::info!(%provider, "duplicate token registration ignored");
                Ok(RegisterOutcome::Duplicate)
            }
        }
    }

    /// Conditional lock. An already-locked or missing row is a benign
    /// no-op, logged rather than raised.
    pub async fn lock(&self, id: TokenId) -> Result<bool, TokenError> {
        let transitioned = self.store.lock(id).await?;
        if transitioned {
            tracing::info!(token_id = %id, "token locked");
            metrics::record_lock_transition("locked");
        } else {
            tracing::warn!(token_id = %id, "token was already locked or does not exist");
        }
        Ok(transitioned)
    }

    /// Conditional unlock; same no-op semantics as [`lock`](Self::lock).
    pub async fn unlock(&self, id: TokenId) -> Result<bool, TokenError> {
        let transitioned = self.store.unlock(id).await?;
        if transitioned {
            tracing::info!(token_id = %id, "token unlocked");
            metrics::record_lock_transition("unlocked");
        } else {
            tracing::warn!(token_id = %id, "token was already unlocked or does not exist");
        }
        Ok(transitioned)
    }

    /// Administrative rotation: lock the given token, then hand back a
    /// freshly selected plaintext for the same provider (if any remains).
    pub async fn rotate(
        &self,
        id: TokenId,
        provider: Provider,
    ) -> Result<Option<String>, TokenError> {
        self.lock(id).await?;
        Ok(self
            .get_random_for_provider(provider)
            .await?
            .map(|token| token.value))
    }

    pub async fn delete(&self, id: TokenId) -> Result<(), TokenError> {
        self.store.delete(id).await?;
        tracing::info!(token_id = %id, "token deleted");
        Ok(())
    }

    fn open(&self, row: TokenRow) -> Result<ApiToken, TokenError> {
        let value = self.vault.decrypt(&row.ciphertext)?;
        Ok(ApiToken {
            id: row.id,
            provider: row.provider,
            value,
        })
    }
}
