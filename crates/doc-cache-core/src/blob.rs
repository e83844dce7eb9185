//! Durable blob storage abstraction.
//!
//! The reconciler only needs one capability from blob storage: download the
//! raw bytes stored at a record's `original_path`, together with the content
//! type the store reports for them.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

/// Downloaded blob contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Read access to durable blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Download the blob at `path`. Returns `Ok(None)` when nothing is stored there.
    async fn download(&self, path: &str) -> Result<Option<Blob>>;
}

/// In-memory [`BlobStore`] for tests.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Blob>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, bytes: &[u8], content_type: Option<&str>) {
        self.blobs.write().unwrap().insert(
            path.to_string(),
            Blob {
                bytes: bytes.to_vec(),
                content_type: content_type.map(str::to_string),
            },
        );
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn download(&self, path: &str) -> Result<Option<Blob>> {
        Ok(self.blobs.read().unwrap().get(path).cloned())
    }
}
