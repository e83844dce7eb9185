//! Cache statistics.
//!
//! Summarises the `gemini_file_cache` table for `dcache stats`: record
//! counts per state, how many ACTIVE records own an upload versus link to
//! one, and how many bytes reuse kept off the wire.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Aggregate counts over the cache table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub active: i64,
    pub failed: i64,
    /// ACTIVE records that own their upload.
    pub canonical: i64,
    /// ACTIVE records linked to another record's upload.
    pub reused: i64,
    /// Sum of `file_size_bytes` over reused records.
    pub bytes_saved: i64,
    /// Unix milliseconds of the most recent activation.
    pub last_processed_at: Option<i64>,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<CacheStats> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(gemini_file_state IS NULL), 0) AS pending,
            COALESCE(SUM(gemini_file_state = 'PROCESSING'), 0) AS processing,
            COALESCE(SUM(gemini_file_state = 'ACTIVE'), 0) AS active,
            COALESCE(SUM(gemini_file_state = 'FAILED'), 0) AS failed,
            COALESCE(SUM(gemini_file_state = 'ACTIVE' AND reused_from IS NULL), 0) AS canonical,
            COALESCE(SUM(gemini_file_state = 'ACTIVE' AND reused_from IS NOT NULL), 0) AS reused,
            COALESCE(SUM(CASE WHEN gemini_file_state = 'ACTIVE' AND reused_from IS NOT NULL
                              THEN file_size_bytes ELSE 0 END), 0) AS bytes_saved,
            MAX(processed_at) AS last_processed_at
        FROM gemini_file_cache
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(CacheStats {
        total: row.try_get("total")?,
        pending: row.try_get("pending")?,
        processing: row.try_get("processing")?,
        active: row.try_get("active")?,
        failed: row.try_get("failed")?,
        canonical: row.try_get("canonical")?,
        reused: row.try_get("reused")?,
        bytes_saved: row.try_get("bytes_saved")?,
        last_processed_at: row.try_get("last_processed_at")?,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("doc-cache: Cache Stats");
    println!("======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Records:     {}", stats.total);
    println!("  Pending:     {}", stats.pending);
    println!("  Processing:  {}", stats.processing);
    println!("  Failed:      {}", stats.failed);
    println!(
        "  Active:      {} ({} uploaded, {} reused)",
        stats.active, stats.canonical, stats.reused
    );
    println!(
        "  Saved:       {} not re-uploaded",
        format_bytes(stats.bytes_saved.max(0) as u64)
    );
    println!(
        "  Last upload: {}",
        stats
            .last_processed_at
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format Unix milliseconds as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts_ms: i64) -> String {
    let delta = (chrono::Utc::now().timestamp_millis() - ts_ms) / 1000;

    if delta < 0 {
        return format_ts_iso(ts_ms);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts_ms)
    }
}

fn format_ts_iso(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}
