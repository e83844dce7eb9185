//! SQLite-backed [`CacheStore`] implementation.
//!
//! Maps each [`CacheStore`] operation onto the `gemini_file_cache` table
//! created by [`migrate`](crate::migrate). Timestamps are stored as Unix
//! milliseconds.
//!
//! The hash claim is a single conditional `UPDATE`: SQLite serialises
//! writers, so the `NOT EXISTS` check and the write happen atomically and
//! at most one of several racing reconcilers sees `rows_affected() == 1`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use doc_cache_core::models::{CacheRecord, ClaimOutcome, FileState, NewRecord, RecordUpdate};
use doc_cache_core::store::CacheStore;

const RECORD_COLUMNS: &str = "id, display_name, original_path, mime_type, file_size_bytes, \
    file_hash_sha256, gemini_name, gemini_uri, gemini_file_state, reused_from, claimed_at, \
    processed_at, error_message, created_at";

/// ACTIVE with both remote identifiers: the only rows worth reusing.
const SERVABLE: &str =
    "gemini_file_state = 'ACTIVE' AND gemini_name != '' AND gemini_uri != ''";

/// Canonical records first, then oldest activation, then id.
const CANONICAL_ORDER: &str =
    "ORDER BY (reused_from IS NULL) DESC, processed_at IS NULL, processed_at ASC, id ASC";

/// SQLite implementation of the [`CacheStore`] trait.
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn find_processing_holder(
        &self,
        hash: &str,
        exclude_id: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<CacheRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM gemini_file_cache \
             WHERE file_hash_sha256 = ? AND id != ? AND gemini_file_state = 'PROCESSING' \
             AND claimed_at > ? ORDER BY claimed_at ASC LIMIT 1",
            RECORD_COLUMNS
        ))
        .bind(hash)
        .bind(exclude_id)
        .bind(stale_before.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }
}

fn ts_from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

fn record_from_row(row: &SqliteRow) -> Result<CacheRecord> {
    let state: Option<String> = row.try_get("gemini_file_state")?;
    let created_ms: i64 = row.try_get("created_at")?;

    Ok(CacheRecord {
        id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        original_path: row.try_get("original_path")?,
        mime_type: row.try_get("mime_type")?,
        file_size_bytes: row.try_get("file_size_bytes")?,
        file_hash_sha256: row.try_get("file_hash_sha256")?,
        gemini_name: row.try_get("gemini_name")?,
        gemini_uri: row.try_get("gemini_uri")?,
        gemini_file_state: FileState::from_db(state.as_deref()),
        reused_from: row.try_get("reused_from")?,
        claimed_at: ts_from_millis(row.try_get("claimed_at")?),
        processed_at: ts_from_millis(row.try_get("processed_at")?),
        error_message: row.try_get("error_message")?,
        created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or_default(),
    })
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn insert_record(&self, new: &NewRecord) -> Result<CacheRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO gemini_file_cache (id, display_name, original_path, mime_type,
                                           file_size_bytes, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.display_name)
        .bind(&new.original_path)
        .bind(&new.mime_type)
        .bind(new.file_size_bytes)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        match self.get_record(&id).await? {
            Some(record) => Ok(record),
            None => bail!("inserted record {} could not be read back", id),
        }
    }

    async fn get_record(&self, id: &str) -> Result<Option<CacheRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM gemini_file_cache WHERE id = ?",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_active_by_hash(
        &self,
        hash: &str,
        exclude_id: &str,
    ) -> Result<Option<CacheRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM gemini_file_cache \
             WHERE file_hash_sha256 = ? AND {} AND id != ? \
             {} LIMIT 1",
            RECORD_COLUMNS, SERVABLE, CANONICAL_ORDER
        ))
        .bind(hash)
        .bind(exclude_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn claim_hash(
        &self,
        id: &str,
        hash: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let stale_ms = stale_before.timestamp_millis();
        let result = sqlx::query(&format!(
            r#"
            UPDATE gemini_file_cache
            SET gemini_file_state = 'PROCESSING', file_hash_sha256 = ?, claimed_at = ?
            WHERE id = ?
              AND NOT (gemini_file_state IS 'PROCESSING'
                       AND claimed_at IS NOT NULL AND claimed_at > ?)
              AND NOT COALESCE({servable}, 0)
              AND NOT EXISTS (
                SELECT 1 FROM gemini_file_cache other
                WHERE other.file_hash_sha256 = ?
                  AND other.id != ?
                  AND (({servable})
                       OR (other.gemini_file_state = 'PROCESSING' AND other.claimed_at > ?))
              )
            "#,
            servable = SERVABLE
        ))
        .bind(hash)
        .bind(now.timestamp_millis())
        .bind(id)
        .bind(stale_ms)
        .bind(hash)
        .bind(id)
        .bind(stale_ms)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(ClaimOutcome::Claimed);
        }

        // Lost the claim: report who holds it
        let Some(target) = self.get_record(id).await? else {
            bail!("cache record not found: {}", id);
        };
        if target.holds_live_claim(stale_before) {
            return Ok(ClaimOutcome::InFlight(target));
        }
        if target.is_servable() {
            return Ok(ClaimOutcome::AlreadyActive(target));
        }
        if let Some(active) = self.find_active_by_hash(hash, id).await? {
            return Ok(ClaimOutcome::AlreadyActive(active));
        }
        if let Some(holder) = self.find_processing_holder(hash, id, stale_before).await? {
            return Ok(ClaimOutcome::InFlight(holder));
        }
        bail!("claim on hash {} for record {} was not applied", hash, id)
    }

    async fn apply_update(&self, id: &str, update: &RecordUpdate) -> Result<()> {
        let result = match update {
            RecordUpdate::Reused {
                hash,
                remote,
                source_id,
                processed_at,
            } => {
                sqlx::query(
                    r#"
                    UPDATE gemini_file_cache
                    SET gemini_name = ?, gemini_uri = ?, gemini_file_state = 'ACTIVE',
                        file_hash_sha256 = ?, reused_from = ?, processed_at = ?,
                        error_message = NULL, claimed_at = NULL
                    WHERE id = ?
                    "#,
                )
                .bind(&remote.name)
                .bind(&remote.uri)
                .bind(hash)
                .bind(source_id)
                .bind(processed_at.timestamp_millis())
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            RecordUpdate::Activated {
                remote,
                processed_at,
            } => {
                sqlx::query(
                    r#"
                    UPDATE gemini_file_cache
                    SET gemini_name = ?, gemini_uri = ?, gemini_file_state = 'ACTIVE',
                        reused_from = NULL, processed_at = ?, error_message = NULL,
                        claimed_at = NULL
                    WHERE id = ?
                    "#,
                )
                .bind(&remote.name)
                .bind(&remote.uri)
                .bind(processed_at.timestamp_millis())
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            RecordUpdate::Failed { message } => {
                sqlx::query(
                    r#"
                    UPDATE gemini_file_cache
                    SET gemini_file_state = 'FAILED', error_message = ?, claimed_at = NULL
                    WHERE id = ?
                    "#,
                )
                .bind(message)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            bail!("cache record not found: {}", id);
        }
        Ok(())
    }

    async fn list_records(&self, state: Option<FileState>) -> Result<Vec<CacheRecord>> {
        let rows = match state {
            Some(FileState::None) => {
                sqlx::query(&format!(
                    "SELECT {} FROM gemini_file_cache WHERE gemini_file_state IS NULL \
                     ORDER BY created_at DESC, id ASC",
                    RECORD_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
            Some(s) => {
                sqlx::query(&format!(
                    "SELECT {} FROM gemini_file_cache WHERE gemini_file_state = ? \
                     ORDER BY created_at DESC, id ASC",
                    RECORD_COLUMNS
                ))
                .bind(s.as_db_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM gemini_file_cache ORDER BY created_at DESC, id ASC",
                    RECORD_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(record_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::apply_schema;
    use chrono::Duration;
    use doc_cache_core::models::RemoteRef;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> SqliteCacheStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        SqliteCacheStore::new(pool)
    }

    fn new_record(name: &str) -> NewRecord {
        NewRecord {
            display_name: name.to_string(),
            original_path: format!("docs/{}", name),
            mime_type: "text/markdown".to_string(),
            file_size_bytes: Some(5),
        }
    }

    fn remote(name: &str) -> RemoteRef {
        RemoteRef {
            name: name.to_string(),
            uri: format!("https://vendor.test/v1beta/{}", name),
        }
    }

    #[tokio::test]
    async fn insert_and_read_back() {
        let store = memory_store().await;
        let rec = store.insert_record(&new_record("faq.md")).await.unwrap();
        assert_eq!(rec.gemini_file_state, FileState::None);
        assert_eq!(rec.file_size_bytes, Some(5));

        let again = store.get_record(&rec.id).await.unwrap().unwrap();
        assert_eq!(again, rec);
        assert!(store.get_record("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_then_activate_then_reuse_lookup() {
        let store = memory_store().await;
        let a = store.insert_record(&new_record("a.md")).await.unwrap();
        let b = store.insert_record(&new_record("b.md")).await.unwrap();
        let now = Utc::now();
        let stale_before = now - Duration::seconds(300);

        assert_eq!(
            store.claim_hash(&a.id, "h1", now, stale_before).await.unwrap(),
            ClaimOutcome::Claimed
        );
        match store.claim_hash(&b.id, "h1", now, stale_before).await.unwrap() {
            ClaimOutcome::InFlight(holder) => assert_eq!(holder.id, a.id),
            other => panic!("unexpected outcome: {:?}", other),
        }

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

        let found = store.find_active_by_hash("h1", &b.id).await.unwrap().unwrap();
        assert_eq!(found.id, a.id);
        assert_eq!(found.gemini_name.as_deref(), Some("files/a"));
        assert!(found.claimed_at.is_none());

        match store.claim_hash(&b.id, "h1", now, stale_before).await.unwrap() {
            ClaimOutcome::AlreadyActive(rec) => assert_eq!(rec.id, a.id),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn live_claim_blocks_the_same_record() {
        let store = memory_store().await;
        let a = store.insert_record(&new_record("a.md")).await.unwrap();
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
    async fn active_row_without_identifiers_does_not_block_claims() {
        let store = memory_store().await;
        let a = store.insert_record(&new_record("a.md")).await.unwrap();
        let b = store.insert_record(&new_record("b.md")).await.unwrap();
        sqlx::query(
            "UPDATE gemini_file_cache SET gemini_file_state = 'ACTIVE', file_hash_sha256 = 'h' \
             WHERE id = ?",
        )
        .bind(&a.id)
        .execute(store.pool())
        .await
        .unwrap();

        assert!(store.find_active_by_hash("h", &b.id).await.unwrap().is_none());
        let now = Utc::now();
        assert_eq!(
            store
                .claim_hash(&b.id, "h", now, now - Duration::seconds(300))
                .await
                .unwrap(),
            ClaimOutcome::Claimed
        );
        store
            .apply_update(
                &b.id,
                &RecordUpdate::Activated {
                    remote: remote("files/b"),
                    processed_at: now,
                },
            )
            .await
            .unwrap();
        let found = store.find_active_by_hash("h", &a.id).await.unwrap().unwrap();
        assert_eq!(found.id, b.id);
    }

    #[tokio::test]
    async fn stale_claim_is_taken_over() {
        let store = memory_store().await;
        let a = store.insert_record(&new_record("a.md")).await.unwrap();
        let b = store.insert_record(&new_record("b.md")).await.unwrap();
        let old = Utc::now() - Duration::hours(1);
        store
            .claim_hash(&a.id, "h", old, old - Duration::seconds(300))
            .await
            .unwrap();

        let now = Utc::now();
        assert_eq!(
            store
                .claim_hash(&b.id, "h", now, now - Duration::seconds(300))
                .await
                .unwrap(),
            ClaimOutcome::Claimed
        );
    }

    #[tokio::test]
    async fn reused_records_do_not_violate_canonical_index() {
        let store = memory_store().await;
        let a = store.insert_record(&new_record("a.md")).await.unwrap();
        let b = store.insert_record(&new_record("b.md")).await.unwrap();
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
        store
            .apply_update(
                &b.id,
                &RecordUpdate::Reused {
                    hash: "h".to_string(),
                    remote: remote("files/a"),
                    source_id: a.id.clone(),
                    processed_at: now,
                },
            )
            .await
            .unwrap();

        let active = store.list_records(Some(FileState::Active)).await.unwrap();
        assert_eq!(active.len(), 2);
        let b_rec = store.get_record(&b.id).await.unwrap().unwrap();
        assert_eq!(b_rec.reused_from.as_deref(), Some(a.id.as_str()));
        assert_eq!(b_rec.gemini_uri, store.get_record(&a.id).await.unwrap().unwrap().gemini_uri);
    }

    #[tokio::test]
    async fn failed_update_keeps_hash_and_sets_message() {
        let store = memory_store().await;
        let a = store.insert_record(&new_record("a.md")).await.unwrap();
        let now = Utc::now();
        store.claim_hash(&a.id, "h", now, now).await.unwrap();
        store
            .apply_update(
                &a.id,
                &RecordUpdate::Failed {
                    message: "upload failed: HTTP 500".to_string(),
                },
            )
            .await
            .unwrap();

        let rec = store.get_record(&a.id).await.unwrap().unwrap();
        assert_eq!(rec.gemini_file_state, FileState::Failed);
        assert_eq!(rec.file_hash_sha256.as_deref(), Some("h"));
        assert_eq!(rec.error_message.as_deref(), Some("upload failed: HTTP 500"));

        let none = store.list_records(Some(FileState::None)).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn updating_missing_record_errors() {
        let store = memory_store().await;
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
}
