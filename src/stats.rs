//! Database statistics overview.
//!
//! Provides a quick summary of what's been ingested: row counts per entity
//! and a per-batch breakdown. Used by `seedctl stats` to confirm that
//! ingest runs landed where expected.

use anyhow::Result;
use sqlx::Row;

use seed_pipeline_core::store::Store;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Per-batch breakdown of files and observations.
struct BatchStats {
    name: String,
    source_system: Option<String>,
    file_count: i64,
    observation_count: i64,
    ingested_at: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let result = print_stats(config, &store).await;
    store.close().await;
    result
}

async fn print_stats(config: &Config, store: &SqliteStore) -> Result<()> {
    let counts = store.counts().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Seed Pipeline — Database Stats");
    println!("==============================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Seeds:         {}", counts.seeds);
    println!("  Variations:    {}", counts.variations);
    println!("  Miners:        {}", counts.miners);
    println!("  Batches:       {}", counts.batches);
    println!("  Source files:  {}", counts.source_files);
    println!("  Observations:  {}", counts.observations);

    let rows = sqlx::query(
        r#"
        SELECT
            b.batch_name,
            b.source_system,
            b.ingested_at,
            (SELECT COUNT(*) FROM source_files sf WHERE sf.batch_id = b.id) AS file_count,
            (SELECT COUNT(*) FROM observations o WHERE o.batch_id = b.id) AS observation_count
        FROM batches b
        ORDER BY b.ingested_at DESC, b.id DESC
        "#,
    )
    .fetch_all(store.pool())
    .await?;

    let batches: Vec<BatchStats> = rows
        .iter()
        .map(|row| BatchStats {
            name: row.get("batch_name"),
            source_system: row.get("source_system"),
            file_count: row.get("file_count"),
            observation_count: row.get("observation_count"),
            ingested_at: row.get("ingested_at"),
        })
        .collect();

    if !batches.is_empty() {
        println!();
        println!("  By batch:");
        println!(
            "  {:<24} {:<12} {:>6} {:>13}   {}",
            "BATCH", "SOURCE", "FILES", "OBSERVATIONS", "CREATED"
        );
        println!("  {}", "-".repeat(76));

        for b in &batches {
            println!(
                "  {:<24} {:<12} {:>6} {:>13}   {}",
                b.name,
                b.source_system.as_deref().unwrap_or("-"),
                b.file_count,
                b.observation_count,
                format_ts_relative(b.ingested_at)
            );
        }
    }

    println!();
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

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
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
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
