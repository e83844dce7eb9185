//! Reconciliation event reporting.
//!
//! The reconciler emits one [`ReconcileEvent`] per observable step (blob
//! fetched, hash computed, cache hit or miss, upload, each poll, state
//! transitions, upload and persistence failures). Events go to **stderr** so
//! stdout stays parseable for scripts. Event payloads carry identifiers,
//! sizes, short hashes, states and vendor response bodies; never document
//! bytes or credentials.

use std::io::Write;

use doc_cache_core::hash::short_hash;

/// A single observable reconciliation step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReconcileEvent {
    BlobFetched {
        record_id: String,
        path: String,
        bytes: u64,
    },
    HashComputed {
        record_id: String,
        hash: String,
    },
    /// An ACTIVE record with identical content was found and reused.
    CacheHit {
        record_id: String,
        source_id: String,
    },
    CacheMiss {
        record_id: String,
        hash: String,
    },
    /// Another reconciliation holds the claim for this hash.
    ClaimContended {
        record_id: String,
        holder_id: String,
    },
    UploadStarted {
        record_id: String,
        strategy: &'static str,
        bytes: u64,
    },
    PollAttempt {
        record_id: String,
        name: String,
        attempt: u32,
        state: &'static str,
    },
    UploadFinished {
        record_id: String,
        name: String,
        state: &'static str,
    },
    StateTransition {
        record_id: String,
        from: String,
        to: String,
    },
    /// Upload or processing failed. `details` is the full vendor body.
    UploadFailed {
        record_id: String,
        code: &'static str,
        message: String,
        details: Option<String>,
    },
    /// The vendor accepted the file but the cache write failed.
    PersistenceFailed {
        record_id: String,
        message: String,
    },
}

impl ReconcileEvent {
    fn kind(&self) -> &'static str {
        match self {
            ReconcileEvent::BlobFetched { .. } => "blob_fetched",
            ReconcileEvent::HashComputed { .. } => "hash_computed",
            ReconcileEvent::CacheHit { .. } => "cache_hit",
            ReconcileEvent::CacheMiss { .. } => "cache_miss",
            ReconcileEvent::ClaimContended { .. } => "claim_contended",
            ReconcileEvent::UploadStarted { .. } => "upload_started",
            ReconcileEvent::PollAttempt { .. } => "poll_attempt",
            ReconcileEvent::UploadFinished { .. } => "upload_finished",
            ReconcileEvent::StateTransition { .. } => "state_transition",
            ReconcileEvent::UploadFailed { .. } => "upload_failed",
            ReconcileEvent::PersistenceFailed { .. } => "persistence_failed",
        }
    }

    /// Structured form used by [`JsonEvents`].
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = match self {
            ReconcileEvent::BlobFetched {
                record_id,
                path,
                bytes,
            } => serde_json::json!({ "record_id": record_id, "path": path, "bytes": bytes }),
            ReconcileEvent::HashComputed { record_id, hash }
            | ReconcileEvent::CacheMiss { record_id, hash } => {
                serde_json::json!({ "record_id": record_id, "hash": short_hash(hash) })
            }
            ReconcileEvent::CacheHit {
                record_id,
                source_id,
            } => serde_json::json!({ "record_id": record_id, "source_id": source_id }),
            ReconcileEvent::ClaimContended {
                record_id,
                holder_id,
            } => serde_json::json!({ "record_id": record_id, "holder_id": holder_id }),
            ReconcileEvent::UploadStarted {
                record_id,
                strategy,
                bytes,
            } => serde_json::json!({
                "record_id": record_id,
                "strategy": strategy,
                "bytes": bytes
            }),
            ReconcileEvent::PollAttempt {
                record_id,
                name,
                attempt,
                state,
            } => serde_json::json!({
                "record_id": record_id,
                "name": name,
                "attempt": attempt,
                "state": state
            }),
            ReconcileEvent::UploadFinished {
                record_id,
                name,
                state,
            } => serde_json::json!({ "record_id": record_id, "name": name, "state": state }),
            ReconcileEvent::StateTransition {
                record_id,
                from,
                to,
            } => serde_json::json!({ "record_id": record_id, "from": from, "to": to }),
            ReconcileEvent::UploadFailed {
                record_id,
                code,
                message,
                details,
            } => serde_json::json!({
                "record_id": record_id,
                "code": code,
                "message": message,
                "details": details
            }),
            ReconcileEvent::PersistenceFailed { record_id, message } => {
                serde_json::json!({ "record_id": record_id, "message": message })
            }
        };
        obj["event"] = serde_json::Value::from(self.kind());
        obj
    }
}

/// Receives reconciliation events.
pub trait ReconcileObserver: Send + Sync {
    fn report(&self, event: ReconcileEvent);
}

/// Human-friendly lines on stderr: "reconcile 1f2e…  uploading  12.4 KB (multipart)".
pub struct StderrEvents;

impl ReconcileObserver for StderrEvents {
    fn report(&self, event: ReconcileEvent) {
        let line = match &event {
            ReconcileEvent::BlobFetched {
                record_id,
                path,
                bytes,
            } => format!(
                "reconcile {}  fetched {}  {}\n",
                record_id,
                path,
                format_bytes(*bytes)
            ),
            ReconcileEvent::HashComputed { record_id, hash } => {
                format!("reconcile {}  sha256 {}\n", record_id, short_hash(hash))
            }
            ReconcileEvent::CacheHit {
                record_id,
                source_id,
            } => format!("reconcile {}  cache hit (from {})\n", record_id, source_id),
            ReconcileEvent::CacheMiss { record_id, .. } => {
                format!("reconcile {}  cache miss\n", record_id)
            }
            ReconcileEvent::ClaimContended {
                record_id,
                holder_id,
            } => format!(
                "reconcile {}  upload already in progress (record {})\n",
                record_id, holder_id
            ),
            ReconcileEvent::UploadStarted {
                record_id,
                strategy,
                bytes,
            } => format!(
                "reconcile {}  uploading  {} ({})\n",
                record_id,
                format_bytes(*bytes),
                strategy
            ),
            ReconcileEvent::PollAttempt {
                record_id,
                name,
                attempt,
                state,
            } => format!(
                "reconcile {}  poll #{} {}  {}\n",
                record_id, attempt, name, state
            ),
            ReconcileEvent::UploadFinished {
                record_id,
                name,
                state,
            } => format!("reconcile {}  uploaded {}  {}\n", record_id, name, state),
            ReconcileEvent::StateTransition {
                record_id,
                from,
                to,
            } => format!("reconcile {}  {} -> {}\n", record_id, from, to),
            ReconcileEvent::UploadFailed {
                record_id,
                code,
                message,
                details,
            } => match details {
                Some(body) => format!(
                    "reconcile {}  error [{}]: {}\n  response: {}\n",
                    record_id, code, message, body
                ),
                None => format!("reconcile {}  error [{}]: {}\n", record_id, code, message),
            },
            ReconcileEvent::PersistenceFailed { record_id, message } => format!(
                "reconcile {}  warning: cache write failed: {}\n",
                record_id, message
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable events: one JSON object per line on stderr.
pub struct JsonEvents;

impl ReconcileObserver for JsonEvents {
    fn report(&self, event: ReconcileEvent) {
        if let Ok(line) = serde_json::to_string(&event.to_json()) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op observer when events are disabled.
pub struct NoEvents;

impl ReconcileObserver for NoEvents {
    fn report(&self, _event: ReconcileEvent) {}
}

fn format_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Event mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventMode {
    Off,
    Human,
    Json,
}

impl EventMode {
    /// Default: human events when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            EventMode::Human
        } else {
            EventMode::Off
        }
    }

    pub fn observer(&self) -> Box<dyn ReconcileObserver> {
        match self {
            EventMode::Off => Box::new(NoEvents),
            EventMode::Human => Box::new(StderrEvents),
            EventMode::Json => Box::new(JsonEvents),
        }
    }
}
