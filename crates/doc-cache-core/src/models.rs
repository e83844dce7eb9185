//! Cache record types.
//!
//! A [`CacheRecord`] tracks one logical document and the lifecycle of its
//! copy in the vendor's remote file store. Records are created by intake
//! ([`NewRecord`]) and afterwards only mutated through [`RecordUpdate`]s
//! issued by the reconciler.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the remote copy of a document.
///
/// `None` is the state of a freshly registered record that no reconciler
/// has touched yet. It is stored as SQL `NULL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileState {
    None,
    Processing,
    Active,
    Failed,
}

impl FileState {
    /// Column value, or `None` for the untouched state.
    pub fn as_db_str(&self) -> Option<&'static str> {
        match self {
            FileState::None => None,
            FileState::Processing => Some("PROCESSING"),
            FileState::Active => Some("ACTIVE"),
            FileState::Failed => Some("FAILED"),
        }
    }

    pub fn from_db(value: Option<&str>) -> Self {
        match value {
            Some("PROCESSING") => FileState::Processing,
            Some("ACTIVE") => FileState::Active,
            Some("FAILED") => FileState::Failed,
            _ => FileState::None,
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_db_str().unwrap_or("NONE"))
    }
}

impl FromStr for FileState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(FileState::None),
            "PROCESSING" => Ok(FileState::Processing),
            "ACTIVE" => Ok(FileState::Active),
            "FAILED" => Ok(FileState::Failed),
            other => Err(format!(
                "unknown file state '{}': expected none, processing, active, or failed",
                other
            )),
        }
    }
}

/// One row of the `gemini_file_cache` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheRecord {
    pub id: String,
    pub display_name: String,
    pub original_path: String,
    pub mime_type: String,
    pub file_size_bytes: Option<i64>,
    pub file_hash_sha256: Option<String>,
    pub gemini_name: Option<String>,
    pub gemini_uri: Option<String>,
    pub gemini_file_state: FileState,
    /// Record whose upload this record links to; `None` for canonical records.
    pub reused_from: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CacheRecord {
    /// Remote identifiers, if both are present.
    pub fn remote(&self) -> Option<RemoteRef> {
        match (&self.gemini_name, &self.gemini_uri) {
            (Some(name), Some(uri)) if !name.is_empty() && !uri.is_empty() => Some(RemoteRef {
                name: name.clone(),
                uri: uri.clone(),
            }),
            _ => None,
        }
    }

    /// True when the record can be served without touching the vendor.
    pub fn is_servable(&self) -> bool {
        self.gemini_file_state == FileState::Active && self.remote().is_some()
    }

    pub fn is_canonical(&self) -> bool {
        self.reused_from.is_none()
    }

    /// PROCESSING under a claim taken after `stale_before`.
    pub fn holds_live_claim(&self, stale_before: DateTime<Utc>) -> bool {
        self.gemini_file_state == FileState::Processing
            && self.claimed_at.is_some_and(|at| at > stale_before)
    }
}

/// Input for intake: everything the store needs to create a record.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub display_name: String,
    pub original_path: String,
    pub mime_type: String,
    pub file_size_bytes: Option<i64>,
}

/// Remote file-store identifiers of an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteRef {
    pub name: String,
    pub uri: String,
}

/// Field sets the reconciler writes back to a record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordUpdate {
    /// Linked to another record's upload of identical bytes.
    Reused {
        hash: String,
        remote: RemoteRef,
        source_id: String,
        processed_at: DateTime<Utc>,
    },
    /// Own upload finished and the remote file is usable.
    Activated {
        remote: RemoteRef,
        processed_at: DateTime<Utc>,
    },
    /// Upload or remote processing failed. The stored hash is kept.
    Failed { message: String },
}

/// Result of trying to claim a content hash for upload.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller owns the hash; state is now PROCESSING.
    Claimed,
    /// Another record already holds an ACTIVE copy of the same bytes.
    AlreadyActive(CacheRecord),
    /// Another record is uploading the same bytes under a live claim.
    InFlight(CacheRecord),
}

/// How the vendor upload is driven to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStrategy {
    /// Single multipart POST with `upload, finalize`; the response is final.
    #[default]
    SynchronousMultipart,
    /// Upload, then poll the file until it leaves PROCESSING.
    PollUntilActive {
        max_attempts: u32,
        interval: Duration,
    },
}

impl UploadStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            UploadStrategy::SynchronousMultipart => "multipart",
            UploadStrategy::PollUntilActive { .. } => "poll",
        }
    }
}
