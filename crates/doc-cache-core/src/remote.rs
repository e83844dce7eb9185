//! Vendor File API boundary.
//!
//! Defines the [`FileApi`] trait the reconciler uploads through and the
//! strict parser that turns a vendor response body into a [`RemoteFile`].
//! Nothing downstream ever sees untyped JSON: a payload without a usable
//! `name` and `uri` is rejected here as [`VendorError::MalformedResponse`].
//!
//! Accepted shapes:
//!
//! ```json
//! { "file": { "name": "files/abc", "uri": "https://...", "state": "ACTIVE" } }
//! { "name": "files/abc", "uri": "https://...", "state": "PROCESSING" }
//! ```
//!
//! The first is returned by the upload endpoint, the second by
//! `GET /v1beta/files/<name>`.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::VendorError;
use crate::models::RemoteRef;

/// Processing state reported by the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Processing,
    Active,
    Failed,
    /// Missing or unrecognised; treated like ACTIVE by the synchronous path.
    Unspecified,
}

impl RemoteState {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("PROCESSING") => RemoteState::Processing,
            Some("ACTIVE") => RemoteState::Active,
            Some("FAILED") => RemoteState::Failed,
            _ => RemoteState::Unspecified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteState::Processing => "PROCESSING",
            RemoteState::Active => "ACTIVE",
            RemoteState::Failed => "FAILED",
            RemoteState::Unspecified => "STATE_UNSPECIFIED",
        }
    }
}

/// A validated vendor file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub uri: String,
    pub state: RemoteState,
    pub mime_type: Option<String>,
    /// Vendor-supplied failure reason when `state` is FAILED.
    pub error_message: Option<String>,
}

impl RemoteFile {
    pub fn remote_ref(&self) -> RemoteRef {
        RemoteRef {
            name: self.name.clone(),
            uri: self.uri.clone(),
        }
    }
}

/// What to upload.
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    pub display_name: &'a str,
    pub mime_type: &'a str,
    pub bytes: &'a [u8],
}

/// The vendor's remote file store.
#[async_trait]
pub trait FileApi: Send + Sync {
    /// Upload bytes in a single multipart request.
    async fn upload(&self, request: UploadRequest<'_>) -> Result<RemoteFile, VendorError>;

    /// Fetch the current state of a previously uploaded file.
    async fn get_file(&self, name: &str) -> Result<RemoteFile, VendorError>;
}

#[derive(Deserialize)]
struct Envelope {
    file: Option<RawFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFile {
    name: Option<String>,
    uri: Option<String>,
    state: Option<String>,
    mime_type: Option<String>,
    error: Option<RawStatus>,
}

#[derive(Deserialize)]
struct RawStatus {
    message: Option<String>,
}

/// Parse a vendor response body into a [`RemoteFile`].
pub fn parse_file_response(body: &str) -> Result<RemoteFile, VendorError> {
    let malformed = |reason: &str| VendorError::MalformedResponse {
        reason: reason.to_string(),
        body: body.to_string(),
    };

    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| malformed(&format!("invalid JSON: {}", e)))?;

    let raw: RawFile = if value.get("file").is_some() {
        serde_json::from_value::<Envelope>(value)
            .map_err(|e| malformed(&format!("unexpected file shape: {}", e)))?
            .file
            .ok_or_else(|| malformed("file is null"))?
    } else {
        serde_json::from_value(value).map_err(|e| malformed(&format!("unexpected file shape: {}", e)))?
    };

    let name = non_empty(raw.name).ok_or_else(|| malformed("missing file.name"))?;
    let uri = non_empty(raw.uri).ok_or_else(|| malformed("missing file.uri"))?;

    Ok(RemoteFile {
        name,
        uri,
        state: RemoteState::parse(raw.state.as_deref()),
        mime_type: raw.mime_type,
        error_message: raw.error.and_then(|e| e.message),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
