//! Document cache reconciliation.
//!
//! [`Reconciler::reconcile`] drives one cache record to a servable state:
//!
//! ```text
//! get record ──▶ ACTIVE with name+uri? ──yes──▶ AlreadyActive
//!      │                  no
//!      ▼
//! download blob ──▶ sha256 (blocking pool) ──▶ ACTIVE record with same hash?
//!                                                  │yes            │no
//!                                                  ▼               ▼
//!                                              Reused        claim hash ──InFlight──▶ 409
//!                                                               │Claimed
//!                                                               ▼
//!                                                    upload (multipart | poll)
//!                                                        │ok          │err
//!                                                        ▼            ▼
//!                                                    Activated      FAILED
//! ```
//!
//! Vendor failures are written to the record as FAILED (best effort) and
//! then returned. A cache write that fails after the vendor accepted the
//! file only produces a [`ReconcileEvent::PersistenceFailed`]; the caller
//! still gets the remote identifiers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use doc_cache_core::blob::BlobStore;
use doc_cache_core::hash::sha256_hex;
use doc_cache_core::models::ClaimOutcome;
use doc_cache_core::store::CacheStore;
use doc_cache_core::{
    CacheRecord, FileApi, FileState, ReconcileError, RecordUpdate, RemoteFile, RemoteRef,
    RemoteState, UploadRequest, UploadStrategy,
};

use crate::blobs::create_blob_store;
use crate::config::Config;
use crate::db;
use crate::events::{NoEvents, ReconcileEvent, ReconcileObserver};
use crate::sqlite_store::SqliteCacheStore;
use crate::vendor::GeminiFileApi;

const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(300);

/// How a successful reconciliation obtained its remote file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The record was already ACTIVE; nothing was downloaded or uploaded.
    AlreadyActive,
    /// Linked to an existing upload of identical bytes.
    Reused { source_id: String },
    /// Uploaded to the vendor.
    Uploaded,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::AlreadyActive => "already_active",
            ReconcileOutcome::Reused { .. } => "reused",
            ReconcileOutcome::Uploaded => "uploaded",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ReconcileOutcome::AlreadyActive => "File already processed",
            ReconcileOutcome::Reused { .. } => "File reused from cache",
            ReconcileOutcome::Uploaded => "File uploaded successfully",
        }
    }
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub record_id: String,
    pub display_name: String,
    pub remote: RemoteRef,
    pub outcome: ReconcileOutcome,
    /// False when the vendor succeeded but the cache write did not.
    pub persisted: bool,
}

impl ReconcileReport {
    /// Always ACTIVE: failures are returned as errors.
    pub fn file_state(&self) -> FileState {
        FileState::Active
    }
}

/// Outcome of one record in a [`Reconciler::reconcile_pending`] pass.
#[derive(Debug)]
pub struct PendingResult {
    pub record_id: String,
    pub display_name: String,
    pub result: Result<ReconcileReport, ReconcileError>,
}

/// Reconciles cache records against the vendor file store.
pub struct Reconciler {
    store: Arc<dyn CacheStore>,
    blobs: Arc<dyn BlobStore>,
    files: Arc<dyn FileApi>,
    strategy: UploadStrategy,
    claim_lease: Duration,
    events: Arc<dyn ReconcileObserver>,
}

impl Reconciler {
    /// Synchronous multipart strategy, default claim lease, no events.
    pub fn new(
        store: Arc<dyn CacheStore>,
        blobs: Arc<dyn BlobStore>,
        files: Arc<dyn FileApi>,
    ) -> Self {
        Self {
            store,
            blobs,
            files,
            strategy: UploadStrategy::default(),
            claim_lease: DEFAULT_CLAIM_LEASE,
            events: Arc::new(NoEvents),
        }
    }

    pub fn with_strategy(mut self, strategy: UploadStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn with_observer(mut self, events: Arc<dyn ReconcileObserver>) -> Self {
        self.events = events;
        self
    }

    /// Wire the SQLite store, configured blob store, and Gemini client.
    pub fn from_config(
        config: &Config,
        pool: SqlitePool,
        events: Arc<dyn ReconcileObserver>,
    ) -> Result<Self> {
        let store = Arc::new(SqliteCacheStore::new(pool));
        let blobs = create_blob_store(&config.blobs)?;
        let files = Arc::new(GeminiFileApi::new(&config.vendor)?);

        Ok(Self::new(store, blobs, files)
            .with_strategy(config.vendor.upload_strategy()?)
            .with_claim_lease(Duration::from_secs(config.reconcile.claim_lease_secs))
            .with_observer(events))
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Make record `id` servable, reusing or uploading as needed.
    pub async fn reconcile(&self, id: &str) -> Result<ReconcileReport, ReconcileError> {
        let record = self
            .store
            .get_record(id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| ReconcileError::RecordNotFound(id.to_string()))?;

        if let (true, Some(remote)) = (record.is_servable(), record.remote()) {
            return Ok(ReconcileReport {
                record_id: record.id,
                display_name: record.display_name,
                remote,
                outcome: ReconcileOutcome::AlreadyActive,
                persisted: true,
            });
        }

        let blob = self
            .blobs
            .download(&record.original_path)
            .await
            .map_err(|e| {
                ReconcileError::BlobNotFound(format!("{} ({:#})", record.original_path, e))
            })?
            .ok_or_else(|| ReconcileError::BlobNotFound(record.original_path.clone()))?;

        self.events.report(ReconcileEvent::BlobFetched {
            record_id: record.id.clone(),
            path: record.original_path.clone(),
            bytes: blob.bytes.len() as u64,
        });

        let (bytes, hash) = hash_on_worker(blob.bytes).await?;

        self.events.report(ReconcileEvent::HashComputed {
            record_id: record.id.clone(),
            hash: hash.clone(),
        });

        if let Some(source) = self
            .store
            .find_active_by_hash(&hash, &record.id)
            .await
            .map_err(store_error)?
        {
            return self.reuse(&record, &source, hash).await;
        }

        self.events.report(ReconcileEvent::CacheMiss {
            record_id: record.id.clone(),
            hash: hash.clone(),
        });

        let now = Utc::now();
        let claim = self
            .store
            .claim_hash(&record.id, &hash, now, self.stale_before(now))
            .await
            .map_err(store_error)?;

        match claim {
            ClaimOutcome::Claimed => {
                self.transition(&record.id, record.gemini_file_state, FileState::Processing);
            }
            // Another reconciliation of this record finished first
            ClaimOutcome::AlreadyActive(current) if current.id == record.id => {
                let remote = current.remote().ok_or_else(|| {
                    ReconcileError::Store(format!(
                        "ACTIVE record {} has no remote identifiers",
                        current.id
                    ))
                })?;
                return Ok(ReconcileReport {
                    record_id: current.id,
                    display_name: current.display_name,
                    remote,
                    outcome: ReconcileOutcome::AlreadyActive,
                    persisted: true,
                });
            }
            ClaimOutcome::AlreadyActive(source) => {
                return self.reuse(&record, &source, hash).await;
            }
            ClaimOutcome::InFlight(holder) => {
                self.events.report(ReconcileEvent::ClaimContended {
                    record_id: record.id.clone(),
                    holder_id: holder.id.clone(),
                });
                return Err(ReconcileError::UploadInProgress {
                    holder_id: holder.id,
                });
            }
        }

        match self.upload(&record, &bytes).await {
            Ok(file) => {
                let remote = file.remote_ref();
                let update = RecordUpdate::Activated {
                    remote: remote.clone(),
                    processed_at: Utc::now(),
                };
                let persisted = self.persist_success(&record.id, &update).await;
                if persisted {
                    self.transition(&record.id, FileState::Processing, FileState::Active);
                }
                Ok(ReconcileReport {
                    record_id: record.id,
                    display_name: record.display_name,
                    remote,
                    outcome: ReconcileOutcome::Uploaded,
                    persisted,
                })
            }
            Err(err) => {
                self.events.report(ReconcileEvent::UploadFailed {
                    record_id: record.id.clone(),
                    code: err.code(),
                    message: err.to_string(),
                    details: err.details().map(str::to_string),
                });
                if err.marks_record_failed() {
                    self.mark_failed(&record.id, &err).await;
                }
                Err(err)
            }
        }
    }

    /// Reconcile every record that is not yet servable, one at a time.
    /// Records another reconciler is currently uploading are skipped.
    pub async fn reconcile_pending(&self) -> Result<Vec<PendingResult>, ReconcileError> {
        let records = self.store.list_records(None).await.map_err(store_error)?;
        let stale_before = self.stale_before(Utc::now());

        let mut results = Vec::new();
        for record in records
            .into_iter()
            .filter(|r| !r.is_servable() && !r.holds_live_claim(stale_before))
        {
            let result = self.reconcile(&record.id).await;
            results.push(PendingResult {
                record_id: record.id,
                display_name: record.display_name,
                result,
            });
        }
        Ok(results)
    }

    async fn reuse(
        &self,
        record: &CacheRecord,
        source: &CacheRecord,
        hash: String,
    ) -> Result<ReconcileReport, ReconcileError> {
        let remote = source.remote().ok_or_else(|| {
            ReconcileError::Store(format!(
                "ACTIVE record {} has no remote identifiers",
                source.id
            ))
        })?;
        // Link to the canonical upload, never to another link
        let source_id = source
            .reused_from
            .clone()
            .unwrap_or_else(|| source.id.clone());

        self.events.report(ReconcileEvent::CacheHit {
            record_id: record.id.clone(),
            source_id: source_id.clone(),
        });

        let update = RecordUpdate::Reused {
            hash,
            remote: remote.clone(),
            source_id: source_id.clone(),
            processed_at: Utc::now(),
        };
        let persisted = self.persist_success(&record.id, &update).await;
        if persisted {
            self.transition(&record.id, record.gemini_file_state, FileState::Active);
        }

        Ok(ReconcileReport {
            record_id: record.id.clone(),
            display_name: record.display_name.clone(),
            remote,
            outcome: ReconcileOutcome::Reused { source_id },
            persisted,
        })
    }

    async fn upload(&self, record: &CacheRecord, bytes: &[u8]) -> Result<RemoteFile, ReconcileError> {
        self.events.report(ReconcileEvent::UploadStarted {
            record_id: record.id.clone(),
            strategy: self.strategy.label(),
            bytes: bytes.len() as u64,
        });

        let file = self
            .files
            .upload(UploadRequest {
                display_name: &record.display_name,
                mime_type: &record.mime_type,
                bytes,
            })
            .await?;

        let file = match self.strategy {
            UploadStrategy::SynchronousMultipart => file,
            UploadStrategy::PollUntilActive {
                max_attempts,
                interval,
            } => self.poll(&record.id, file, max_attempts, interval).await?,
        };

        self.events.report(ReconcileEvent::UploadFinished {
            record_id: record.id.clone(),
            name: file.name.clone(),
            state: file.state.as_str(),
        });

        if file.state == RemoteState::Failed {
            return Err(ReconcileError::RemoteProcessing {
                message: file
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "remote file processing failed".to_string()),
                name: file.name,
            });
        }

        Ok(file)
    }

    async fn poll(
        &self,
        record_id: &str,
        mut file: RemoteFile,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<RemoteFile, ReconcileError> {
        let mut attempts = 0;
        while file.state == RemoteState::Processing {
            if attempts >= max_attempts {
                return Err(ReconcileError::RemoteTimeout {
                    name: file.name,
                    attempts,
                });
            }
            // First check right after the upload, then wait between checks
            if attempts > 0 {
                tokio::time::sleep(interval).await;
            }
            attempts += 1;

            file = self.files.get_file(&file.name).await?;
            self.events.report(ReconcileEvent::PollAttempt {
                record_id: record_id.to_string(),
                name: file.name.clone(),
                attempt: attempts,
                state: file.state.as_str(),
            });
        }
        Ok(file)
    }

    /// Write a success update; a failure is reported, not returned.
    async fn persist_success(&self, record_id: &str, update: &RecordUpdate) -> bool {
        match self.store.apply_update(record_id, update).await {
            Ok(()) => true,
            Err(e) => {
                let err = ReconcileError::CachePersistence(format!("{:#}", e));
                self.events.report(ReconcileEvent::PersistenceFailed {
                    record_id: record_id.to_string(),
                    message: err.to_string(),
                });
                false
            }
        }
    }

    async fn mark_failed(&self, record_id: &str, err: &ReconcileError) {
        let update = RecordUpdate::Failed {
            message: err.to_string(),
        };
        if self.persist_success(record_id, &update).await {
            self.transition(record_id, FileState::Processing, FileState::Failed);
        }
    }

    fn transition(&self, record_id: &str, from: FileState, to: FileState) {
        self.events.report(ReconcileEvent::StateTransition {
            record_id: record_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.claim_lease)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// `dcache reconcile <id>`.
pub async fn run_reconcile(
    config: &Config,
    id: &str,
    events: Arc<dyn ReconcileObserver>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let reconciler = Reconciler::from_config(config, pool.clone(), events)?;

    let result = reconciler.reconcile(id).await;
    pool.close().await;

    let report = result?;
    print_report(&report);
    Ok(())
}

/// `dcache reconcile-pending`. Fails if any record failed.
pub async fn run_reconcile_pending(
    config: &Config,
    events: Arc<dyn ReconcileObserver>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let reconciler = Reconciler::from_config(config, pool.clone(), events)?;

    let results = reconciler.reconcile_pending().await;
    pool.close().await;
    let results = results?;

    let mut failed = 0;
    for item in &results {
        match &item.result {
            Ok(report) => print_report(report),
            Err(e) => {
                failed += 1;
                println!("{:<14}  {}  {}: {}", "failed", item.record_id, item.display_name, e);
            }
        }
    }

    println!();
    println!(
        "{} record(s) reconciled, {} failed",
        results.len() - failed,
        failed
    );

    if failed > 0 {
        bail!("{} of {} record(s) failed to reconcile", failed, results.len());
    }
    Ok(())
}

fn print_report(report: &ReconcileReport) {
    println!(
        "{:<14}  {}  {}  {}",
        report.outcome.as_str(),
        report.record_id,
        report.remote.name,
        report.remote.uri
    );
    if !report.persisted {
        println!("  warning: cache record could not be updated");
    }
}

async fn hash_on_worker(bytes: Vec<u8>) -> Result<(Vec<u8>, String), ReconcileError> {
    tokio::task::spawn_blocking(move || {
        let hash = sha256_hex(&bytes);
        (bytes, hash)
    })
    .await
    .map_err(|e| ReconcileError::HashComputation(e.to_string()))
}

fn store_error(err: anyhow::Error) -> ReconcileError {
    ReconcileError::Store(format!("{:#}", err))
}
