//! # doc-cache
//!
//! A content-addressed document cache that keeps an LLM vendor's File API in
//! sync with documents held in blob storage.
//!
//! Every document registered with the cache gets a record in SQLite. The
//! reconciler downloads the bytes, hashes them, and either links the record
//! to an existing upload of identical content or uploads it once and
//! persists the vendor's identifiers, so the chat backend can attach the
//! document to prompts without re-uploading it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐
//! │ Blob store  │──▶│  Reconciler   │──▶│ Gemini     │
//! │ FS/Supabase │   │ hash+dedup   │   │ File API   │
//! └─────────────┘   └──────┬───────┘   └────────────┘
//!                          │
//!                          ▼
//!                    ┌──────────┐
//!                    │  SQLite  │
//!                    └────┬─────┘
//!                 ┌───────┴────────┐
//!                 ▼                ▼
//!            ┌──────────┐    ┌──────────┐
//!            │   CLI    │    │   HTTP   │
//!            │ (dcache) │    │  (axum)  │
//!            └──────────┘    └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dcache init                          # create database
//! dcache register manuals/faq.pdf      # intake a stored document
//! dcache reconcile <id>                # upload or reuse
//! dcache reconcile-pending             # everything not yet ACTIVE
//! dcache serve                         # POST /upload-gemini-files
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite cache store |
//! | [`blobs`] | Filesystem and Supabase blob stores |
//! | [`vendor`] | Gemini File API client |
//! | [`reconcile`] | Hash, dedup, upload, persist |
//! | [`events`] | Lifecycle event reporting |
//! | [`intake`] | Document registration |
//! | [`server`] | HTTP server |

pub mod blobs;
pub mod config;
pub mod cost_cmd;
pub mod db;
pub mod events;
pub mod intake;
pub mod list;
pub mod migrate;
pub mod reconcile;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod vendor;
