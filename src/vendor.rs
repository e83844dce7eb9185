//! Gemini File API client.
//!
//! [`GeminiFileApi`] implements [`FileApi`] over reqwest:
//!
//! - **Upload**: `POST {base}/upload/v1beta/files?key=<key>` with a hand-built
//!   `multipart/related` body and the headers
//!   `X-Goog-Upload-Protocol: multipart` and
//!   `X-Goog-Upload-Command: upload, finalize`.
//! - **Poll**: `GET {base}/v1beta/files/<id>?key=<key>`.
//!
//! Both responses go through [`parse_file_response`], so a 2xx body without
//! a usable `name`/`uri` surfaces as [`VendorError::MalformedResponse`].
//! Non-2xx responses carry their raw body in [`VendorError::Http`].
//!
//! The API key is read from the environment variable named by
//! `vendor.api_key_env` and is never logged.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use doc_cache_core::multipart::encode_upload;
use doc_cache_core::remote::parse_file_response;
use doc_cache_core::{FileApi, RemoteFile, UploadRequest, VendorError};

use crate::config::VendorConfig;

pub struct GeminiFileApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiFileApi {
    /// Build a client from config.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key variable is unset or empty.
    pub fn new(config: &VendorConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("{} environment variable not set", config.api_key_env))?;
        Self::with_key(config, api_key)
    }

    /// Build a client with an explicit key.
    pub fn with_key(config: &VendorConfig, api_key: impl Into<String>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/v1beta/files", self.base_url)
    }

    fn file_url(&self, name: &str) -> String {
        if name.starts_with("files/") {
            format!("{}/v1beta/{}", self.base_url, name)
        } else {
            format!("{}/v1beta/files/{}", self.base_url, name)
        }
    }

    async fn read_file(resp: reqwest::Response) -> Result<RemoteFile, VendorError> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| VendorError::Transport(strip_key(e)))?;

        if !status.is_success() {
            return Err(VendorError::Http {
                status: status.as_u16(),
                body,
            });
        }

        parse_file_response(&body)
    }
}

#[async_trait]
impl FileApi for GeminiFileApi {
    async fn upload(&self, request: UploadRequest<'_>) -> Result<RemoteFile, VendorError> {
        let body = encode_upload(request.display_name, request.mime_type, request.bytes);

        let resp = self
            .client
            .post(self.upload_url())
            .query(&[("key", self.api_key.as_str())])
            .header("Content-Type", body.content_type())
            .header("Content-Length", body.len())
            .header("X-Goog-Upload-Protocol", "multipart")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(body.bytes)
            .send()
            .await
            .map_err(|e| VendorError::Transport(strip_key(e)))?;

        Self::read_file(resp).await
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile, VendorError> {
        let resp = self
            .client
            .get(self.file_url(name))
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| VendorError::Transport(strip_key(e)))?;

        Self::read_file(resp).await
    }
}

/// reqwest errors embed the request URL, which carries the key.
fn strip_key(err: reqwest::Error) -> String {
    err.without_url().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base: &str) -> GeminiFileApi {
        let config = VendorConfig {
            base_url: base.to_string(),
            ..VendorConfig::default()
        };
        GeminiFileApi::with_key(&config, "test-key").unwrap()
    }

    #[test]
    fn file_url_accepts_both_name_forms() {
        let api = api("https://vendor.test/");
        assert_eq!(api.file_url("files/abc"), "https://vendor.test/v1beta/files/abc");
        assert_eq!(api.file_url("abc"), "https://vendor.test/v1beta/files/abc");
        assert_eq!(api.upload_url(), "https://vendor.test/upload/v1beta/files");
    }

    #[test]
    fn missing_key_is_an_error() {
        let config = VendorConfig {
            api_key_env: "DOC_CACHE_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..VendorConfig::default()
        };
        let err = GeminiFileApi::new(&config).err().unwrap();
        assert!(err.to_string().contains("DOC_CACHE_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[tokio::test]
    async fn transport_errors_do_not_leak_the_key() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let api = api(&format!("http://127.0.0.1:{}", port));
        let err = api.get_file("files/abc").await.unwrap_err();
        match err {
            VendorError::Transport(msg) => assert!(!msg.contains("test-key")),
            other => panic!("expected transport error, got {:?}", other),
        }
    }
}
