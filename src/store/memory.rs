//! In-memory token store.
//!
//! Used by tests and ephemeral runs. Per-key map locking gives the same
//! conditional-transition atomicity the durable backend provides.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::store::{
    FailureJournal, FailureRecord, InsertOutcome, StoreError, TokenId, TokenRow, TokenStore,
};
use crate::tokens::Provider;

#[derive(Default)]
pub struct MemoryTokenStore {
    rows: DashMap<TokenId, TokenRow>,
    digests: DashMap<String, TokenId>,
    failures: Mutex<Vec<FailureRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(
        &self,
        ciphertext: Vec<u8>,
        digest: String,
        provider: Provider,
    ) -> Result<InsertOutcome, StoreError> {
        // The digest entry is the uniqueness gate; holding it keeps a
        // concurrent identical insert out until the row exists.
        match self.digests.entry(digest.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::Duplicate),
            Entry::Vacant(slot) => {
                let id = Uuid::new_v4();
                slot.insert(id);
                self.rows.insert(
                    id,
                    TokenRow {
                        id,
                        provider,
                        ciphertext,
                        digest,
                        locked_at: None,
                    },
                );
                Ok(InsertOutcome::Inserted(id))
            }
        }
    }

    async fn fetch_by_id(&self, id: TokenId) -> Result<Option<TokenRow>, StoreError> {
        Ok(self.rows.get(&id).map(|row| row.clone()))
    }

    async fn fetch_random_unlocked(
        &self,
        provider: Provider,
    ) -> Result<Option<TokenRow>, StoreError> {
        let candidates: Vec<TokenRow> = self
            .rows
            .iter()
            .filter(|row| row.provider == provider && row.locked_at.is_none())
            .map(|row| row.clone())
            .collect();
        Ok(candidates.choose(&mut rand::thread_rng()).cloned())
    }

    async fn fetch_all_locked(
        &self,
        provider: Option<Provider>,
    ) -> Result<Vec<TokenRow>, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|row| {
                row.locked_at.is_some() && provider.map_or(true, |p| row.provider == p)
            })
            .map(|row| row.clone())
            .collect())
    }

    async fn lock(&self, id: TokenId) -> Result<bool, StoreError> {
        match self.rows.get_mut(&id) {
            Some(mut row) if row.locked_at.is_none() => {
                row.locked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unlock(&self, id: TokenId) -> Result<bool, StoreError> {
        match self.rows.get_mut(&id) {
            Some(mut row) if row.locked_at.is_some() => {
                row.locked_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: TokenId) -> Result<(), StoreError> {
        if let Some((_, row)) = self.rows.remove(&id) {
            self.digests.remove(&row.digest);
        }
        Ok(())
    }
}

#[async_trait]
impl FailureJournal for MemoryTokenStore {
    async fn record_failure(&self, provider: Provider, detail: &str) -> Result<(), StoreError> {
        let mut failures = self
            .failures
            .lock()
            .map_err(|_| StoreError::Backend("failure journal poisoned".into()))?;
        failures.push(FailureRecord {
            provider,
            detail: detail.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }

    async fn recent_failures(&self, limit: usize) -> Result<Vec<FailureRecord>, StoreError> {
        let failures = self
            .failures
            .lock()
            .map_err(|_| StoreError::Backend("failure journal poisoned".into()))?;
        Ok(failures.iter().rev().take(limit).cloned().collect())
    }
}
