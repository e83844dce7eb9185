//! Configuration parsing and validation.
//!
//! doc-cache is configured via a TOML file (default: `config/dcache.toml`).
//!
//! ```toml
//! [db]
//! path = "./data/doc-cache.sqlite"
//!
//! [blobs]
//! provider = "filesystem"          # or "supabase"
//! root = "./documentos"
//!
//! [vendor]
//! base_url = "https://generativelanguage.googleapis.com"
//! api_key_env = "GEMINI_API_KEY"
//! strategy = "multipart"           # or "poll"
//! poll_max_attempts = 30
//! poll_interval_secs = 2
//!
//! [reconcile]
//! claim_lease_secs = 300
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```
//!
//! Secrets (vendor API key, storage service key) are never stored in the
//! file; the config names the environment variables that hold them.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use doc_cache_core::UploadStrategy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub blobs: BlobsConfig,
    #[serde(default)]
    pub vendor: VendorConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobsConfig {
    #[serde(default = "default_blob_provider")]
    pub provider: String,
    /// Root directory for the filesystem provider.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Project URL for the supabase provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_key_env")]
    pub key_env: String,
}

fn default_blob_provider() -> String {
    "filesystem".to_string()
}
fn default_bucket() -> String {
    "documentos".to_string()
}
fn default_key_env() -> String {
    "SUPABASE_SERVICE_ROLE_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct VendorConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Overall HTTP timeout; unset means the client default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            strategy: default_strategy(),
            poll_max_attempts: default_poll_max_attempts(),
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: None,
        }
    }
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_strategy() -> String {
    "multipart".to_string()
}
fn default_poll_max_attempts() -> u32 {
    30
}
fn default_poll_interval_secs() -> u64 {
    2
}

impl VendorConfig {
    /// The configured [`UploadStrategy`].
    pub fn upload_strategy(&self) -> Result<UploadStrategy> {
        match self.strategy.as_str() {
            "multipart" => Ok(UploadStrategy::SynchronousMultipart),
            "poll" => Ok(UploadStrategy::PollUntilActive {
                max_attempts: self.poll_max_attempts,
                interval: Duration::from_secs(self.poll_interval_secs),
            }),
            other => bail!(
                "Unknown vendor strategy: '{}'. Must be multipart or poll.",
                other
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            claim_lease_secs: default_claim_lease_secs(),
        }
    }
}

fn default_claim_lease_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    match config.blobs.provider.as_str() {
        "filesystem" => {
            if config.blobs.root.is_none() {
                bail!("blobs.root must be set when provider is 'filesystem'");
            }
        }
        "supabase" => {
            if config.blobs.url.as_deref().is_none_or(str::is_empty) {
                bail!("blobs.url must be set when provider is 'supabase'");
            }
        }
        other => bail!(
            "Unknown blob provider: '{}'. Must be filesystem or supabase.",
            other
        ),
    }

    config.vendor.upload_strategy()?;

    if config.vendor.strategy == "poll" {
        if config.vendor.poll_max_attempts == 0 {
            bail!("vendor.poll_max_attempts must be > 0");
        }
        if config.vendor.poll_interval_secs == 0 {
            bail!("vendor.poll_interval_secs must be > 0");
        }
    }

    if config.vendor.timeout_secs == Some(0) {
        bail!("vendor.timeout_secs must be > 0 when set");
    }

    if config.reconcile.claim_lease_secs == 0 {
        bail!("reconcile.claim_lease_secs must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/doc-cache.sqlite"

[blobs]
root = "./documentos"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.blobs.provider, "filesystem");
        assert_eq!(cfg.vendor.api_key_env, "GEMINI_API_KEY");
        assert_eq!(
            cfg.vendor.upload_strategy().unwrap(),
            UploadStrategy::SynchronousMultipart
        );
        assert_eq!(cfg.reconcile.claim_lease_secs, 300);
        assert_eq!(cfg.server.bind, "127.0.0.1:7340");
    }

    #[test]
    fn poll_strategy_uses_attempts_and_interval() {
        let text = format!(
            "{}\n[vendor]\nstrategy = \"poll\"\npoll_max_attempts = 5\npoll_interval_secs = 1\n",
            MINIMAL
        );
        let cfg = parse_config(&text).unwrap();
        assert_eq!(
            cfg.vendor.upload_strategy().unwrap(),
            UploadStrategy::PollUntilActive {
                max_attempts: 5,
                interval: Duration::from_secs(1),
            }
        );
    }

    #[test]
    fn rejects_unknown_strategy() {
        let text = format!("{}\n[vendor]\nstrategy = \"resumable\"\n", MINIMAL);
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("Unknown vendor strategy"));
    }

    #[test]
    fn supabase_provider_requires_url() {
        let text = r#"
[db]
path = "x.sqlite"

[blobs]
provider = "supabase"
"#;
        let err = parse_config(text).unwrap_err();
        assert!(err.to_string().contains("blobs.url"));
    }

    #[test]
    fn filesystem_provider_requires_root() {
        let text = "[db]\npath = \"x.sqlite\"\n\n[blobs]\nprovider = \"filesystem\"\n";
        assert!(parse_config(text).is_err());
    }

    #[test]
    fn zero_lease_is_rejected() {
        let text = format!("{}\n[reconcile]\nclaim_lease_secs = 0\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }
}
