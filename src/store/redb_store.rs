//! Durable token store backed by an embedded redb database.
//!
//! # Design Decisions
//! - One write transaction per conditional operation; redb's transaction
//!   commit is the atomicity boundary the contract requires
//! - Digest uniqueness lives in a secondary digest → id table maintained
//!   inside the same transaction as the token row
//! - Table creation at open replaces migration scripts

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::store::{
    FailureJournal, FailureRecord, InsertOutcome, StoreError, TokenId, TokenRow, TokenStore,
};
use crate::tokens::Provider;

const TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("tokens");
const DIGESTS: TableDefinition<&str, &str> = TableDefinition::new("token_digests");
const FAILURES: TableDefinition<u64, &[u8]> = TableDefinition::new("upstream_failures");

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn decode_row(bytes: &[u8]) -> Result<TokenRow, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Decode(e.to_string()))
}

fn encode_row(row: &TokenRow) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(row).map_err(|e| StoreError::Decode(e.to_string()))
}

pub struct RedbTokenStore {
    db: Arc<Database>,
}

impl RedbTokenStore {
    /// Open (or create) the database file and ensure all tables exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(backend)?;

        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(TOKENS).map_err(backend)?;
        txn.open_table(DIGESTS).map_err(backend)?;
        txn.open_table(FAILURES).map_err(backend)?;
        txn.commit().map_err(backend)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn fetch_decoded<F>(&self, mut keep: F) -> Result<Vec<TokenRow>, StoreError>
    where
        F: FnMut(&TokenRow) -> bool,
    {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(TOKENS).map_err(backend)?;

        let mut rows = Vec::new();
        for entry in table.iter().map_err(backend)? {
            let (_, value) = entry.map_err(backend)?;
            let row = decode_row(value.value())?;
            if keep(&row) {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl TokenStore for RedbTokenStore {
    async fn insert(
        &self,
        ciphertext: Vec<u8>,
        digest: String,
        provider: Provider,
    ) -> Result<InsertOutcome, StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        let id = Uuid::new_v4();
        {
            let mut digests = txn.open_table(DIGESTS).map_err(backend)?;
            if digests.get(digest.as_str()).map_err(backend)?.is_some() {
                // Dropping the transaction without commit leaves no trace.
                return Ok(InsertOutcome::Duplicate);
            }
            let id_text = id.to_string();
            digests
                .insert(digest.as_str(), id_text.as_str())
                .map_err(backend)?;

            let row = TokenRow {
                id,
                provider,
                ciphertext,
                digest,
                locked_at: None,
            };
            let mut tokens = txn.open_table(TOKENS).map_err(backend)?;
            tokens
                .insert(id_text.as_str(), encode_row(&row)?.as_slice())
                .map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(InsertOutcome::Inserted(id))
    }

    async fn fetch_by_id(&self, id: TokenId) -> Result<Option<TokenRow>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(TOKENS).map_err(backend)?;
        match table.get(id.to_string().as_str()).map_err(backend)? {
            Some(value) => Ok(Some(decode_row(value.value())?)),
            None => Ok(None),
        }
    }

    async fn fetch_random_unlocked(
        &self,
        provider: Provider,
    ) -> Result<Option<TokenRow>, StoreError> {
        let candidates =
            self.fetch_decoded(|row| row.provider == provider && row.locked_at.is_none())?;
        Ok(candidates.choose(&mut rand::thread_rng()).cloned())
    }

    async fn fetch_all_locked(
        &self,
        provider: Option<Provider>,
    ) -> Result<Vec<TokenRow>, StoreError> {
        self.fetch_decoded(|row| {
            row.locked_at.is_some() && provider.map_or(true, |p| row.provider == p)
        })
    }

    async fn lock(&self, id: TokenId) -> Result<bool, StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        let id_text = id.to_string();
        {
            let mut table = txn.open_table(TOKENS).map_err(backend)?;
            let mut row = {
                match table.get(id_text.as_str()).map_err(backend)? {
                    Some(value) => decode_row(value.value())?,
                    None => return Ok(false),
                }
            };
            if row.locked_at.is_some() {
                return Ok(false);
            }
            row.locked_at = Some(Utc::now());
            table
                .insert(id_text.as_str(), encode_row(&row)?.as_slice())
                .map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(true)
    }

    async fn unlock(&self, id: TokenId) -> Result<bool, StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        let id_text = id.to_string();
        {
            let mut table = txn.open_table(TOKENS).map_err(backend)?;
            let mut row = {
                match table.get(id_text.as_str()).map_err(backend)? {
                    Some(value) => decode_row(value.value())?,
                    None => return Ok(false),
                }
            };
            if row.locked_at.is_none() {
                return Ok(false);
            }
            row.locked_at = None;
            table
                .insert(id_text.as_str(), encode_row(&row)?.as_slice())
                .map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(true)
    }

    async fn delete(&self, id: TokenId) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        let id_text = id.to_string();
        {
            let mut tokens = txn.open_table(TOKENS).map_err(backend)?;
            let removed = {
                match tokens.remove(id_text.as_str()).map_err(backend)? {
                    Some(value) => Some(decode_row(value.value())?),
                    None => None,
                }
            };
            if let Some(row) = removed {
                let mut digests = txn.open_table(DIGESTS).map_err(backend)?;
                digests.remove(row.digest.as_str()).map_err(backend)?;
            }
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl FailureJournal for RedbTokenStore {
    async fn record_failure(&self, provider: Provider, detail: &str) -> Result<(), StoreError> {
        let record = FailureRecord {
            provider,
            detail: detail.to_string(),
            at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&record).map_err(|e| StoreError::Decode(e.to_string()))?;

        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(FAILURES).map_err(backend)?;
            let next = match table.last().map_err(backend)? {
                Some((key, _)) => key.value() + 1,
                None => 0,
            };
            table.insert(next, bytes.as_slice()).map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }

    async fn recent_failures(&self, limit: usize) -> Result<Vec<FailureRecord>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(FAILURES).map_err(backend)?;

        let mut records = Vec::new();
        for entry in table.iter().map_err(backend)?.rev().take(limit) {
            let (_, value) = entry.map_err(backend)?;
            let record: FailureRecord = serde_json::from_slice(value.value())
                .map_err(|e| StoreError::Decode(e.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (RedbTokenStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbTokenStore::open(dir.path().join("tokens.redb")).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn insert_and_fetch_roundtrip() {
        let (store, _dir) = store();
        let InsertOutcome::Inserted(id) = store
            .insert(vec![1, 2, 3], "digest-a".into(), Provider::OpenRouter)
            .await
            .unwrap()
        else {
            panic!("expected insert");
        };

        let row = store.fetch_by_id(id).await.unwrap().unwrap();
        assert_eq!(row.ciphertext, vec![1, 2, 3]);
        assert_eq!(row.provider, Provider::OpenRouter);
        assert!(row.locked_at.is_none());
    }

    #[tokio::test]
    async fn duplicate_digest_writes_nothing() {
        let (store, _dir) = store();
        store
            .insert(vec![1], "digest-b".into(), Provider::OpenRouter)
            .await
            .unwrap();
        let outcome = store
            .insert(vec![2], "digest-b".into(), Provider::OpenAi)
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Duplicate);

        let locked = store.fetch_all_locked(None).await.unwrap();
        assert!(locked.is_empty());
        assert!(store
            .fetch_random_unlocked(Provider::OpenAi)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn conditional_lock_and_unlock() {
        let (store, _dir) = store();
        let InsertOutcome::Inserted(id) = store
            .insert(vec![1], "digest-c".into(), Provider::OpenRouter)
            .await
            .unwrap()
        else {
            panic!("expected insert");
        };

        assert!(store.lock(id).await.unwrap());
        let stamped = store.fetch_by_id(id).await.unwrap().unwrap().locked_at;
        assert!(stamped.is_some());

        assert!(!store.lock(id).await.unwrap());
        assert_eq!(store.fetch_by_id(id).await.unwrap().unwrap().locked_at, stamped);

        assert!(store.unlock(id).await.unwrap());
        assert!(!store.unlock(id).await.unwrap());
    }

    #[tokio::test]
    async fn locked_rows_are_listed_per_provider() {
        let (store, _dir) = store();
        let InsertOutcome::Inserted(a) = store
            .insert(vec![1], "digest-d".into(), Provider::OpenRouter)
            .await
            .unwrap()
        else {
            panic!("expected insert");
        };
        let InsertOutcome::Inserted(b) = store
            .insert(vec![2], "digest-e".into(), Provider::OpenAi)
            .await
            .unwrap()
        else {
            panic!("expected insert");
        };

        store.lock(a).await.unwrap();
        store.lock(b).await.unwrap();

        assert_eq!(store.fetch_all_locked(None).await.unwrap().len(), 2);
        let router_only = store
            .fetch_all_locked(Some(Provider::OpenRouter))
            .await
            .unwrap();
        assert_eq!(router_only.len(), 1);
        assert_eq!(router_only[0].id, a);
    }

    #[tokio::test]
    async fn delete_releases_digest() {
        let (store, _dir) = store();
        let InsertOutcome::Inserted(id) = store
            .insert(vec![1], "digest-f".into(), Provider::OpenRouter)
            .await
            .unwrap()
        else {
            panic!("expected insert");
        };
        store.delete(id).await.unwrap();
        assert!(store.fetch_by_id(id).await.unwrap().is_none());

        let again = store
            .insert(vec![3], "digest-f".into(), Provider::OpenRouter)
            .await
            .unwrap();
        assert!(matches!(again, InsertOutcome::Inserted(_)));
    }

    #[tokio::test]
    async fn failure_journal_persists_in_order() {
        let (store, _dir) = store();
        store
            .record_failure(Provider::OpenRouter, "status 429")
            .await
            .unwrap();
        store
            .record_failure(Provider::OpenAi, "status 500")
            .await
            .unwrap();

        let recent = store.recent_failures(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].detail, "status 500");
        assert_eq!(recent[1].detail, "status 429");
    }
}
