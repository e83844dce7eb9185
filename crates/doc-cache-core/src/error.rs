//! Error taxonomy for reconciliation.

use thiserror::Error;

/// Longest slice of a vendor body carried in an error message.
const BODY_EXCERPT_CHARS: usize = 500;

/// Trimmed vendor body, cut to [`BODY_EXCERPT_CHARS`] characters.
pub fn body_excerpt(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(BODY_EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Failures talking to the vendor File API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VendorError {
    #[error("upload failed: HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed vendor response: {reason}")]
    MalformedResponse { reason: String, body: String },

    #[error("vendor request failed: {0}")]
    Transport(String),
}

/// Everything that can end a reconciliation early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("cache record not found: {0}")]
    RecordNotFound(String),

    #[error("blob not found: {0}")]
    BlobNotFound(String),

    #[error("hash computation failed: {0}")]
    HashComputation(String),

    #[error("upload failed: HTTP {status} - {}", body_excerpt(.body))]
    Upload { status: u16, body: String },

    #[error("malformed vendor response: {reason}")]
    MalformedResponse { reason: String, body: String },

    #[error("remote processing failed for {name}: {message}")]
    RemoteProcessing { name: String, message: String },

    #[error("remote file {name} still processing after {attempts} polls")]
    RemoteTimeout { name: String, attempts: u32 },

    #[error("upload of identical content already in progress (record {holder_id})")]
    UploadInProgress { holder_id: String },

    #[error("vendor request failed: {0}")]
    Transport(String),

    #[error("cache store error: {0}")]
    Store(String),

    #[error("cache persistence failed: {0}")]
    CachePersistence(String),
}

impl ReconcileError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RecordNotFound(_) => "record_not_found",
            Self::BlobNotFound(_) => "blob_not_found",
            Self::HashComputation(_) => "hash_computation",
            Self::Upload { .. } => "upload_failed",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::RemoteProcessing { .. } => "remote_processing_failed",
            Self::RemoteTimeout { .. } => "remote_timeout",
            Self::UploadInProgress { .. } => "upload_in_progress",
            Self::Transport(_) => "vendor_unreachable",
            Self::Store(_) => "store_error",
            Self::CachePersistence(_) => "cache_persistence",
        }
    }

    /// HTTP status the server answers with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::RecordNotFound(_) | Self::BlobNotFound(_) => 404,
            Self::UploadInProgress { .. } => 409,
            Self::Upload { .. }
            | Self::MalformedResponse { .. }
            | Self::RemoteProcessing { .. }
            | Self::RemoteTimeout { .. }
            | Self::Transport(_) => 502,
            Self::HashComputation(_) | Self::Store(_) | Self::CachePersistence(_) => 500,
        }
    }

    /// Raw diagnostic text (vendor response bodies), if any.
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Upload { body, .. } | Self::MalformedResponse { body, .. } => Some(body),
            _ => None,
        }
    }

    /// True for failures that should be recorded on the record as FAILED.
    pub fn marks_record_failed(&self) -> bool {
        matches!(
            self,
            Self::Upload { .. }
                | Self::MalformedResponse { .. }
                | Self::RemoteProcessing { .. }
                | Self::RemoteTimeout { .. }
                | Self::Transport(_)
        )
    }
}

impl From<VendorError> for ReconcileError {
    fn from(err: VendorError) -> Self {
        match err {
            VendorError::Http { status, body } => ReconcileError::Upload { status, body },
            VendorError::MalformedResponse { reason, body } => {
                ReconcileError::MalformedResponse { reason, body }
            }
            VendorError::Transport(msg) => ReconcileError::Transport(msg),
        }
    }
}
