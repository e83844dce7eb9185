//! Blob store backends.
//!
//! Two [`BlobStore`] implementations back the reconciler's download step:
//!
//! - **[`FilesystemBlobStore`]**: reads `original_path` relative to a local
//!   root directory. The content type is inferred from the extension.
//! - **[`SupabaseBlobStore`]**: downloads from a Supabase Storage bucket via
//!   `GET <url>/storage/v1/object/<bucket>/<path>`, authenticated with the
//!   service role key. The content type comes from the response header.
//!
//! Use [`create_blob_store`] to build the configured backend.
//!
//! # Content Type Detection
//!
//! | Extension | MIME Type |
//! |-----------|----------|
//! | `.pdf` | `application/pdf` |
//! | `.md` | `text/markdown` |
//! | `.txt` | `text/plain` |
//! | `.json` | `application/json` |
//! | `.csv` | `text/csv` |
//! | `.html`, `.htm` | `text/html` |
//! | `.docx` | `application/vnd.openxmlformats-officedocument.wordprocessingml.document` |
//! | Other | `application/octet-stream` |

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;

use doc_cache_core::blob::{Blob, BlobStore};

use crate::config::BlobsConfig;

/// Blob store rooted at a local directory.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `path` under the root, refusing anything that escapes it.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => bail!("blob path must be relative and stay inside the root: {}", path),
            }
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn download(&self, path: &str) -> Result<Option<Blob>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(Blob {
                bytes,
                content_type: Some(detect_content_type(path).to_string()),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read blob {}", full.display())),
        }
    }
}

/// Blob store backed by Supabase Storage.
pub struct SupabaseBlobStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    service_key: String,
}

impl SupabaseBlobStore {
    /// Build from config. Reads the service key from `config.key_env`.
    pub fn new(config: &BlobsConfig) -> Result<Self> {
        let base_url = config
            .url
            .clone()
            .ok_or_else(|| anyhow!("blobs.url required for supabase provider"))?;
        let service_key = std::env::var(&config.key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.key_env))?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            service_key,
        })
    }

    fn object_url(&self, path: &str) -> String {
        let encoded = path
            .trim_start_matches('/')
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            uri_encode(&self.bucket),
            encoded
        )
    }
}

#[async_trait]
impl BlobStore for SupabaseBlobStore {
    async fn download(&self, path: &str) -> Result<Option<Blob>> {
        let resp = self
            .client
            .get(self.object_url(path))
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("apikey", &self.service_key)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to download {}/{}: {}", self.bucket, path, e))?;

        let status = resp.status();
        // Storage answers 400 with an "Object not found" body for missing keys
        if status.as_u16() == 404 || status.as_u16() == 400 {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Storage download failed (HTTP {}) for '{}': {}", status, path, body);
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await?.to_vec();

        Ok(Some(Blob {
            bytes,
            content_type,
        }))
    }
}

/// Create the configured [`BlobStore`].
pub fn create_blob_store(config: &BlobsConfig) -> Result<Arc<dyn BlobStore>> {
    match config.provider.as_str() {
        "filesystem" => {
            let root = config
                .root
                .clone()
                .ok_or_else(|| anyhow!("blobs.root required for filesystem provider"))?;
            Ok(Arc::new(FilesystemBlobStore::new(root)))
        }
        "supabase" => Ok(Arc::new(SupabaseBlobStore::new(config)?)),
        other => bail!("Unknown blob provider: {}", other),
    }
}

/// Map a path's extension to a MIME type.
pub fn detect_content_type(path: &str) -> &'static str {
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("md") => "text/markdown",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        Some("html" | "htm") => "text/html",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// Percent-encode one path segment (RFC 3986 unreserved characters pass through).
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
