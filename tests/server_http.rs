//! HTTP surface tests: the axum router served on an ephemeral port, backed
//! by in-memory stores and a scripted vendor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use doc_cache::reconcile::Reconciler;
use doc_cache::server::router;
use doc_cache_core::blob::InMemoryBlobStore;
use doc_cache_core::store::memory::InMemoryCacheStore;
use doc_cache_core::store::CacheStore;
use doc_cache_core::{FileApi, NewRecord, RemoteFile, RemoteState, UploadRequest, VendorError};

#[derive(Default)]
struct ScriptedVendor {
    uploads: AtomicUsize,
    fail_next: Mutex<Option<VendorError>>,
}

#[async_trait]
impl FileApi for ScriptedVendor {
    async fn upload(&self, _request: UploadRequest<'_>) -> Result<RemoteFile, VendorError> {
        if let Some(err) = self.fail_next.lock().unwrap().take() {
            return Err(err);
        }
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RemoteFile {
            name: format!("files/srv-{}", n),
            uri: format!("https://vendor.test/v1beta/files/srv-{}", n),
            state: RemoteState::Active,
            mime_type: None,
            error_message: None,
        })
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile, VendorError> {
        Err(VendorError::Transport(format!("unexpected poll of {}", name)))
    }
}

struct TestServer {
    base: String,
    store: Arc<InMemoryCacheStore>,
    blobs: Arc<InMemoryBlobStore>,
    vendor: Arc<ScriptedVendor>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        let store = Arc::new(InMemoryCacheStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let vendor = Arc::new(ScriptedVendor::default());
        let reconciler = Reconciler::new(store.clone(), blobs.clone(), vendor.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::new(reconciler));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            store,
            blobs,
            vendor,
            client: reqwest::Client::new(),
        }
    }

    async fn register(&self, path: &str, bytes: &[u8]) -> String {
        self.blobs.put(path, bytes, Some("application/pdf"));
        self.store
            .insert_record(&NewRecord {
                display_name: path.to_string(),
                original_path: path.to_string(),
                mime_type: "application/pdf".to_string(),
                file_size_bytes: Some(bytes.len() as i64),
            })
            .await
            .unwrap()
            .id
    }

    async fn upload(&self, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}/upload-gemini-files", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

#[tokio::test]
async fn test_upload_then_reuse() {
    let srv = TestServer::start().await;
    let a = srv.register("manual.pdf", b"%PDF-1.4 manual").await;
    let b = srv.register("manual-copy.pdf", b"%PDF-1.4 manual").await;

    let (status, body) = srv.upload(json!({ "fileId": a })).await;
    assert_eq!(status, 200, "body: {}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["outcome"], "uploaded");
    assert_eq!(body["message"], "File uploaded successfully");
    assert_eq!(body["gemini_name"], "files/srv-1");
    assert_eq!(body["gemini_uri"], "https://vendor.test/v1beta/files/srv-1");
    assert_eq!(body["file_state"], "ACTIVE");
    assert_eq!(body["display_name"], "manual.pdf");

    let (status, body) = srv.upload(json!({ "fileId": b })).await;
    assert_eq!(status, 200);
    assert_eq!(body["outcome"], "reused");
    assert_eq!(body["gemini_name"], "files/srv-1");

    let (_, body) = srv.upload(json!({ "fileId": a })).await;
    assert_eq!(body["outcome"], "already_active");
    assert_eq!(body["message"], "File already processed");

    assert_eq!(srv.vendor.uploads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_file_id_is_400() {
    let srv = TestServer::start().await;

    let (status, body) = srv.upload(json!({})).await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "bad_request");

    let (status, _) = srv.upload(json!({ "fileId": "  " })).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_unknown_record_is_404() {
    let srv = TestServer::start().await;

    let (status, body) = srv.upload(json!({ "fileId": "nope" })).await;
    assert_eq!(status, 404);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "record_not_found");
}

#[tokio::test]
async fn test_vendor_failure_is_502_with_details() {
    let srv = TestServer::start().await;
    let id = srv.register("manual.pdf", b"bytes").await;
    *srv.vendor.fail_next.lock().unwrap() = Some(VendorError::Http {
        status: 500,
        body: "{\"error\":{\"message\":\"backend down\"}}".to_string(),
    });

    let (status, body) = srv.upload(json!({ "fileId": id })).await;

    assert_eq!(status, 502);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "upload_failed");
    assert!(body["details"].as_str().unwrap().contains("backend down"));

    let stored = srv.store.get_record(&id).await.unwrap().unwrap();
    assert_eq!(stored.gemini_file_state, doc_cache_core::FileState::Failed);
}

#[tokio::test]
async fn test_active_files_as_prompt_parts() {
    let srv = TestServer::start().await;
    let a = srv.register("manual.pdf", b"one").await;
    srv.register("pending.pdf", b"two").await;
    srv.upload(json!({ "fileId": a })).await;

    let resp = srv
        .client
        .get(format!("{}/files/active", srv.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let parts: Value = resp.json().await.unwrap();
    let parts = parts.as_array().unwrap();

    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0]["displayName"], "manual.pdf");
    assert_eq!(
        parts[0]["fileData"]["fileUri"],
        "https://vendor.test/v1beta/files/srv-1"
    );
    assert_eq!(parts[0]["fileData"]["mimeType"], "application/pdf");
}

#[tokio::test]
async fn test_health_and_cors() {
    let srv = TestServer::start().await;

    let resp = srv
        .client
        .get(format!("{}/health", srv.base))
        .header("Origin", "https://admin.example.com")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["access-control-allow-origin"].to_str().unwrap(),
        "*"
    );
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}
