use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the cache table and its indexes. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gemini_file_cache (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            original_path TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            file_size_bytes INTEGER,
            file_hash_sha256 TEXT,
            gemini_name TEXT,
            gemini_uri TEXT,
            gemini_file_state TEXT
                CHECK (gemini_file_state IN ('PROCESSING', 'ACTIVE', 'FAILED')),
            reused_from TEXT,
            claimed_at INTEGER,
            processed_at INTEGER,
            error_message TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_file_cache_hash_state ON gemini_file_cache(file_hash_sha256, gemini_file_state)",
    )
    .execute(pool)
    .await?;

    // Superseded by idx_file_cache_canonical_upload
    sqlx::query("DROP INDEX IF EXISTS idx_file_cache_canonical_hash")
        .execute(pool)
        .await?;

    // One canonical ACTIVE upload per content hash
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_file_cache_canonical_upload
        ON gemini_file_cache(file_hash_sha256)
        WHERE gemini_file_state = 'ACTIVE' AND reused_from IS NULL AND gemini_uri IS NOT NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_file_cache_created_at ON gemini_file_cache(created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
