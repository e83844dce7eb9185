//! Document intake.
//!
//! Registers a blob that already exists in storage as a new cache record in
//! state `None`. The size and, unless overridden, the MIME type come from
//! the blob store; the display name defaults to the path's last segment.

use anyhow::{bail, Context, Result};

use doc_cache_core::blob::BlobStore;
use doc_cache_core::store::CacheStore;
use doc_cache_core::{CacheRecord, NewRecord};

use crate::blobs::create_blob_store;
use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteCacheStore;

/// Optional overrides for [`register_document`].
#[derive(Debug, Default, Clone)]
pub struct IntakeOptions {
    pub display_name: Option<String>,
    pub mime_type: Option<String>,
}

pub async fn register_document(
    store: &dyn CacheStore,
    blobs: &dyn BlobStore,
    path: &str,
    options: IntakeOptions,
) -> Result<CacheRecord> {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        bail!("Document path must not be empty");
    }

    let blob = blobs
        .download(path)
        .await
        .with_context(|| format!("Failed to read {}", path))?;
    let Some(blob) = blob else {
        bail!("No blob stored at {}", path);
    };

    let display_name = options
        .display_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| path.rsplit('/').next().unwrap_or(path).to_string());

    let mime_type = options
        .mime_type
        .or(blob.content_type)
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let new = NewRecord {
        display_name,
        original_path: path.to_string(),
        mime_type,
        file_size_bytes: Some(blob.bytes.len() as i64),
    };

    store.insert_record(&new).await
}

/// `dcache register`: create a record and print its id.
pub async fn run_register(config: &Config, path: &str, options: IntakeOptions) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteCacheStore::new(pool.clone());
    let blobs = create_blob_store(&config.blobs)?;

    let record = register_document(&store, blobs.as_ref(), path, options).await?;

    println!("Registered {}", record.id);
    println!("  name: {}", record.display_name);
    println!("  path: {}", record.original_path);
    println!("  mime: {}", record.mime_type);
    if let Some(size) = record.file_size_bytes {
        println!("  size: {} bytes", size);
    }

    pool.close().await;
    Ok(())
}
