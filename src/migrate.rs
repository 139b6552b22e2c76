//! Database schema migrations.
//!
//! Every statement is `CREATE … IF NOT EXISTS`, so migrations are
//! idempotent and safe to run on every start.
//!
//! Uniqueness that the ingest engine relies on is enforced here, not in
//! application code:
//!
//! | Table | Unique key |
//! |-------|------------|
//! | `seeds` | `normalized_seed` |
//! | `variations` | `(seed_id, normalized_variation)` |
//! | `miners` | `miner_external_id` |
//! | `batches` | `batch_name` |
//! | `source_files` | `(batch_id, file_checksum)` |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS seeds (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        seed_text TEXT NOT NULL,
        normalized_seed TEXT NOT NULL UNIQUE,
        seed_hash TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS variations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        seed_id INTEGER NOT NULL REFERENCES seeds(id) ON DELETE CASCADE,
        variation_text TEXT NOT NULL,
        normalized_variation TEXT NOT NULL,
        variation_hash TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(seed_id, normalized_variation)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS miners (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        miner_external_id TEXT NOT NULL UNIQUE,
        display_name TEXT,
        meta TEXT,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS batches (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        batch_name TEXT NOT NULL UNIQUE,
        source_system TEXT,
        ingested_at INTEGER NOT NULL,
        meta TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS source_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        batch_id INTEGER NOT NULL REFERENCES batches(id) ON DELETE CASCADE,
        file_path TEXT NOT NULL,
        file_checksum TEXT NOT NULL,
        record_count INTEGER,
        processed_at INTEGER NOT NULL,
        UNIQUE(batch_id, file_checksum)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS observations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        seed_id INTEGER NOT NULL REFERENCES seeds(id) ON DELETE CASCADE,
        variation_id INTEGER NOT NULL REFERENCES variations(id) ON DELETE CASCADE,
        miner_id INTEGER REFERENCES miners(id) ON DELETE SET NULL,
        batch_id INTEGER REFERENCES batches(id) ON DELETE SET NULL,
        source_file_id INTEGER REFERENCES source_files(id) ON DELETE SET NULL,
        score REAL,
        observed_at INTEGER NOT NULL,
        raw_payload TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_variation_seed ON variations(seed_id)",
    "CREATE INDEX IF NOT EXISTS ix_variation_norm ON variations(normalized_variation)",
    "CREATE INDEX IF NOT EXISTS ix_seed_hash ON seeds(seed_hash)",
    "CREATE INDEX IF NOT EXISTS ix_observation_seed_var ON observations(seed_id, variation_id)",
    "CREATE INDEX IF NOT EXISTS ix_observation_seed_score ON observations(seed_id, score)",
    "CREATE INDEX IF NOT EXISTS ix_observation_batch ON observations(batch_id)",
    "CREATE INDEX IF NOT EXISTS ix_observation_miner ON observations(miner_id)",
];

/// Connect using `config` and apply the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = migrate_pool(&pool).await;
    pool.close().await;
    result
}

/// Apply the schema to an already-open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}
