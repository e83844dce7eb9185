//! # doc-cache core
//!
//! Runtime-agnostic logic for the document cache reconciler: cache record
//! models, content hashing, the vendor multipart encoder, strict parsing of
//! vendor File API responses, the error taxonomy, and the storage traits the
//! reconciler runs against.
//!
//! This crate contains no tokio, sqlx, or HTTP client dependencies. The
//! native runtime (SQLite store, reqwest client, server, CLI) lives in the
//! `doc-cache` crate.

pub mod blob;
pub mod cost;
pub mod error;
pub mod hash;
pub mod models;
pub mod multipart;
pub mod remote;
pub mod store;

pub use error::{ReconcileError, VendorError};
pub use models::{CacheRecord, FileState, NewRecord, RecordUpdate, RemoteRef, UploadStrategy};
pub use remote::{FileApi, RemoteFile, RemoteState, UploadRequest};
