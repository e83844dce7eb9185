//! Cache store abstraction.
//!
//! The [`CacheStore`] trait covers every operation the reconciler and the
//! intake flow perform against the `gemini_file_cache` table, so the same
//! reconciliation logic runs against SQLite in production and against
//! [`memory::InMemoryCacheStore`] in tests.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`insert_record`](CacheStore::insert_record) | Intake: create a record |
//! | [`get_record`](CacheStore::get_record) | Select by id |
//! | [`find_active_by_hash`](CacheStore::find_active_by_hash) | Dedup lookup |
//! | [`claim_hash`](CacheStore::claim_hash) | Atomic check-and-mark-PROCESSING |
//! | [`apply_update`](CacheStore::apply_update) | Persist a reconciler outcome |
//! | [`list_records`](CacheStore::list_records) | Listing, optionally by state |
//!
//! # Claims
//!
//! `claim_hash` must be atomic with respect to other claims: two
//! reconcilers racing on identical bytes may not both get
//! [`ClaimOutcome::Claimed`]. A PROCESSING record whose `claimed_at` is at or
//! before `stale_before` no longer blocks a claim.

pub mod memory;

use std::cmp::Ordering;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{CacheRecord, ClaimOutcome, FileState, NewRecord, RecordUpdate};

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create a record in state `None`. The store assigns the id.
    async fn insert_record(&self, new: &NewRecord) -> Result<CacheRecord>;

    async fn get_record(&self, id: &str) -> Result<Option<CacheRecord>>;

    /// Best ACTIVE record with this hash other than `exclude_id`.
    ///
    /// Candidates are ranked by [`canonical_order`].
    async fn find_active_by_hash(
        &self,
        hash: &str,
        exclude_id: &str,
    ) -> Result<Option<CacheRecord>>;

    /// Atomically mark `id` PROCESSING with `hash`, unless another record
    /// already holds the hash.
    async fn claim_hash(
        &self,
        id: &str,
        hash: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimOutcome>;

    /// Write a reconciler outcome. Fails if the record does not exist.
    async fn apply_update(&self, id: &str, update: &RecordUpdate) -> Result<()>;

    /// All records, newest first, optionally filtered by state.
    async fn list_records(&self, state: Option<FileState>) -> Result<Vec<CacheRecord>>;
}

/// Ranking among ACTIVE records sharing a hash: canonical first, then the
/// earliest `processed_at`, then the smallest id.
pub fn canonical_order(a: &CacheRecord, b: &CacheRecord) -> Ordering {
    b.is_canonical()
        .cmp(&a.is_canonical())
        .then_with(|| match (a.processed_at, b.processed_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.id.cmp(&b.id))
}
