//! Cache record listing for `dcache list`.

use anyhow::Result;

use doc_cache_core::hash::short_hash;
use doc_cache_core::store::CacheStore;
use doc_cache_core::{CacheRecord, FileState};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteCacheStore;

pub async fn run_list(config: &Config, state: Option<FileState>) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteCacheStore::new(pool.clone());
    let records = store.list_records(state).await?;

    if records.is_empty() {
        println!("No records.");
    } else {
        println!(
            "{:<36}  {:<10}  {:<16}  {:<28}  {}",
            "ID", "STATE", "SHA256", "REMOTE", "NAME"
        );
        for record in &records {
            println!("{}", format_row(record));
        }
        println!();
        println!("{} record(s)", records.len());
    }

    pool.close().await;
    Ok(())
}

fn format_row(record: &CacheRecord) -> String {
    let hash = record
        .file_hash_sha256
        .as_deref()
        .map(short_hash)
        .unwrap_or("-");
    let remote = match (&record.gemini_name, &record.reused_from) {
        (Some(name), Some(_)) => format!("{} (reused)", name),
        (Some(name), None) => name.clone(),
        (None, _) => "-".to_string(),
    };
    let mut line = format!(
        "{:<36}  {:<10}  {:<16}  {:<28}  {}",
        record.id, record.gemini_file_state, hash, remote, record.display_name
    );
    if record.gemini_file_state == FileState::Failed {
        if let Some(msg) = &record.error_message {
            line.push_str(&format!("\n{:<38}error: {}", "", msg));
        }
    }
    line
}
