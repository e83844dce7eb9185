//! In-memory [`CacheStore`] implementation for testing.
//!
//! Records live in a `HashMap` behind `std::sync::RwLock`. Claims take the
//! write lock for the whole check-and-mark, which gives the same atomicity
//! the SQLite store gets from its conditional `UPDATE`.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{CacheRecord, ClaimOutcome, FileState, NewRecord, RecordUpdate};

use super::{canonical_order, CacheStore};

/// In-memory cache store.
pub struct InMemoryCacheStore {
    records: RwLock<HashMap<String, CacheRecord>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a fully formed record, replacing any with the same id.
    pub fn put(&self, record: CacheRecord) {
        self.records
            .write()
            .unwrap()
            .insert(record.id.clone(), record);
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

fn best_active<'a>(
    records: impl Iterator<Item = &'a CacheRecord>,
    hash: &str,
    exclude_id: &str,
) -> Option<CacheRecord> {
    records
        .filter(|r| r.id != exclude_id)
        .filter(|r| r.is_servable())
        .filter(|r| r.file_hash_sha256.as_deref() == Some(hash))
        .min_by(|a, b| canonical_order(a, b))
        .cloned()
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn insert_record(&self, new: &NewRecord) -> Result<CacheRecord> {
        let record = CacheRecord {
            id: Uuid::new_v4().to_string(),
            display_name: new.display_name.clone(),
            original_path: new.original_path.clone(),
            mime_type: new.mime_type.clone(),
            file_size_bytes: new.file_size_bytes,
            file_hash_sha256: None,
            gemini_name: None,
            gemini_uri: None,
            gemini_file_state: FileState::None,
            reused_from: None,
            claimed_at: None,
            processed_at: None,
            error_message: None,
            created_at: Utc::now(),
        };
        self.put(record.clone());
        Ok(record)
    }

    async fn get_record(&self, id: &str) -> Result<Option<CacheRecord>> {
        Ok(self.records.read().unwrap().get(id).cloned())
    }

    async fn find_active_by_hash(
        &self,
        hash: &str,
        exclude_id: &str,
    ) -> Result<Option<CacheRecord>> {
        let records = self.records.read().unwrap();
        Ok(best_active(records.values(), hash, exclude_id))
    }

    async fn claim_hash(
        &self,
        id: &str,
        hash: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let mut records = self.records.write().unwrap();

        let Some(target) = records.get(id) else {
            bail!("cache record not found: {}", id);
        };
        if target.holds_live_claim(stale_before) {
            return Ok(ClaimOutcome::InFlight(target.clone()));
        }
        if target.is_servable() {
            return Ok(ClaimOutcome::AlreadyActive(target.clone()));
        }

        if let Some(active) = best_active(records.values(), hash, id) {
            return Ok(ClaimOutcome::AlreadyActive(active));
        }

        let holder = records
            .values()
            .filter(|r| r.id != id)
            .filter(|r| r.file_hash_sha256.as_deref() == Some(hash))
            .find(|r| r.holds_live_claim(stale_before))
            .cloned();
        if let Some(holder) = holder {
            return Ok(ClaimOutcome::InFlight(holder));
        }

        if let Some(record) = records.get_mut(id) {
            record.gemini_file_state = FileState::Processing;
            record.file_hash_sha256 = Some(hash.to_string());
            record.claimed_at = Some(now);
        }
        Ok(ClaimOutcome::Claimed)
    }

    async fn apply_update(&self, id: &str, update: &RecordUpdate) -> Result<()> {
        let mut records = self.records.write().unwrap();
        let Some(record) = records.get_mut(id) else {
            bail!("cache record not found: {}", id);
        };

        match update {
            RecordUpdate::Reused {
                hash,
                remote,
                source_id,
                processed_at,
            } => {
                record.gemini_name = Some(remote.name.clone());
                record.gemini_uri = Some(remote.uri.clone());
                record.gemini_file_state = FileState::Active;
                record.file_hash_sha256 = Some(hash.clone());
                record.reused_from = Some(source_id.clone());
                record.processed_at = Some(*processed_at);
                record.error_message = None;
                record.claimed_at = None;
            }
            RecordUpdate::Activated {
                remote,
                processed_at,
            } => {
                record.gemini_name = Some(remote.name.clone());
                record.gemini_uri = Some(remote.uri.clone());
                record.gemini_file_state = FileState::Active;
                record.reused_from = None;
                record.processed_at = Some(*processed_at);
                record.error_message = None;
                record.claimed_at = None;
            }
            RecordUpdate::Failed { message } => {
                record.gemini_file_state = FileState::Failed;
                record.error_message = Some(message.clone());
                record.claimed_at = None;
            }
        }
        Ok(())
    }

    async fn list_records(&self, state: Option<FileState>) -> Result<Vec<CacheRecord>> {
        let records = self.records.read().unwrap();
        let mut out: Vec<CacheRecord> = records
            .values()
            .filter(|r| state.is_none_or(|s| r.gemini_file_state == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemoteRef;
    use chrono::Duration;

    fn new_record(name: &str) -> NewRecord {
        NewRecord {
            display_name: name.to_string(),
            original_path: format!("docs/{}", name),
            mime_type: "text/plain".to_string(),
            file_size_bytes: Some(5),
        }
    }

    fn remote(name: &str) -> RemoteRef {
        RemoteRef {
            name: name.to_string(),
            uri: format!("https://vendor.test/{}", name),
        }
    }

    #[tokio::test]
    async fn second_claim_on_same_hash_is_in_flight() {
        let store = InMemoryCacheStore::new();
        let a = store.insert_record(&new_record("a.txt")).await.unwrap();
        let b = store.insert_record(&new_record("b.txt")).await.unwrap();
        let now = Utc::now();
        let stale_before = now - Duration::seconds(300);

        let first = store.claim_hash(&a.id, "h", now, stale_before).await.unwrap();
        assert_eq!(first, ClaimOutcome::Claimed);

        match store.claim_hash(&b.id, "h", now, stale_before).await.unwrap() {
            ClaimOutcome::InFlight(holder) => assert_eq!(holder.id, a.id),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn record_with_live_claim_cannot_be_claimed_again() {
        let store = InMemoryCacheStore::new();
        let a = store.insert_record(&new_record("a.txt")).await.unwrap();
        let now = Utc::now();
        let stale_before = now - Duration::seconds(300);

        assert_eq!(
            store.claim_hash(&a.id, "h", now, stale_before).await.unwrap(),
            ClaimOutcome::Claimed
        );
        match store.claim_hash(&a.id, "h", now, stale_before).await.unwrap() {
            ClaimOutcome::InFlight(holder) => assert_eq!(holder.id, a.id),
            other => panic!("unexpected outcome: {:?}", other),
        }

        // Once the lease runs out the same record may claim again
        let later = now + Duration::seconds(600);
        assert_eq!(
            store
                .claim_hash(&a.id, "h", later, later - Duration::seconds(300))
                .await
                .unwrap(),
            ClaimOutcome::Claimed
        );

        store
            .apply_update(
                &a.id,
                &RecordUpdate::Activated {
                    remote: remote("files/a"),
                    processed_at: later,
                },
            )
            .await
            .unwrap();
        match store
            .claim_hash(&a.id, "h", later, later - Duration::seconds(300))
            .await
            .unwrap()
        {
            ClaimOutcome::AlreadyActive(rec) => assert_eq!(rec.id, a.id),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn active_record_without_identifiers_is_not_a_reuse_source() {
        let store = InMemoryCacheStore::new();
        let a = store.insert_record(&new_record("a.txt")).await.unwrap();
        let b = store.insert_record(&new_record("b.txt")).await.unwrap();
        let mut broken = store.get_record(&a.id).await.unwrap().unwrap();
        broken.file_hash_sha256 = Some("h".to_string());
        broken.gemini_file_state = FileState::Active;
        store.put(broken);

        assert!(store.find_active_by_hash("h", &b.id).await.unwrap().is_none());
        let now = Utc::now();
        assert_eq!(
            store.claim_hash(&b.id, "h", now, now).await.unwrap(),
            ClaimOutcome::Claimed
        );
    }

    #[tokio::test]
    async fn stale_claim_can_be_taken_over() {
        let store = InMemoryCacheStore::new();
        let a = store.insert_record(&new_record("a.txt")).await.unwrap();
        let b = store.insert_record(&new_record("b.txt")).await.unwrap();
        let long_ago = Utc::now() - Duration::hours(2);
        store
            .claim_hash(&a.id, "h", long_ago, long_ago - Duration::seconds(300))
            .await
            .unwrap();

        let now = Utc::now();
        let outcome = store
            .claim_hash(&b.id, "h", now, now - Duration::seconds(300))
            .await
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::Claimed);
    }

    #[tokio::test]
    async fn claim_reports_active_holder() {
        let store = InMemoryCacheStore::new();
        let a = store.insert_record(&new_record("a.txt")).await.unwrap();
        let b = store.insert_record(&new_record("b.txt")).await.unwrap();
        let now = Utc::now();
        store.claim_hash(&a.id, "h", now, now).await.unwrap();
        store
            .apply_update(
                &a.id,
                &RecordUpdate::Activated {
                    remote: remote("files/a"),
                    processed_at: now,
                },
            )
            .await
            .unwrap();

        match store.claim_hash(&b.id, "h", now, now).await.unwrap() {
            ClaimOutcome::AlreadyActive(rec) => assert_eq!(rec.id, a.id),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn find_active_prefers_canonical_record() {
        let store = InMemoryCacheStore::new();
        let a = store.insert_record(&new_record("a.txt")).await.unwrap();
        let b = store.insert_record(&new_record("b.txt")).await.unwrap();
        let c = store.insert_record(&new_record("c.txt")).await.unwrap();
        let now = Utc::now();

        store
            .apply_update(
                &b.id,
                &RecordUpdate::Reused {
                    hash: "h".to_string(),
                    remote: remote("files/a"),
                    source_id: a.id.clone(),
                    processed_at: now - Duration::seconds(10),
                },
            )
            .await
            .unwrap();
        let mut canonical = store.get_record(&a.id).await.unwrap().unwrap();
        canonical.file_hash_sha256 = Some("h".to_string());
        canonical.gemini_file_state = FileState::Active;
        canonical.gemini_name = Some("files/a".to_string());
        canonical.gemini_uri = Some("https://vendor.test/files/a".to_string());
        canonical.processed_at = Some(now);
        store.put(canonical);

        let found = store.find_active_by_hash("h", &c.id).await.unwrap().unwrap();
        assert_eq!(found.id, a.id);
        assert!(found.is_canonical());
    }

    #[tokio::test]
    async fn failed_update_keeps_hash() {
        let store = InMemoryCacheStore::new();
        let a = store.insert_record(&new_record("a.txt")).await.unwrap();
        let now = Utc::now();
        store.claim_hash(&a.id, "h", now, now).await.unwrap();
        store
            .apply_update(
                &a.id,
                &RecordUpdate::Failed {
                    message: "boom".to_string(),
                },
            )
            .await
            .unwrap();

        let rec = store.get_record(&a.id).await.unwrap().unwrap();
        assert_eq!(rec.gemini_file_state, FileState::Failed);
        assert_eq!(rec.file_hash_sha256.as_deref(), Some("h"));
        assert_eq!(rec.error_message.as_deref(), Some("boom"));
        assert!(rec.claimed_at.is_none());
    }

    #[tokio::test]
    async fn update_of_missing_record_fails() {
        let store = InMemoryCacheStore::new();
        let err = store
            .apply_update(
                "nope",
                &RecordUpdate::Failed {
                    message: "x".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn list_filters_by_state() {
        let store = InMemoryCacheStore::new();
        let a = store.insert_record(&new_record("a.txt")).await.unwrap();
        store.insert_record(&new_record("b.txt")).await.unwrap();
        let now = Utc::now();
        store.claim_hash(&a.id, "h", now, now).await.unwrap();

        assert_eq!(store.list_records(None).await.unwrap().len(), 2);
        let processing = store
            .list_records(Some(FileState::Processing))
            .await
            .unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, a.id);
    }
}
