//! SQLite-backed [`Store`] implementation.
//!
//! Every get-or-create is a lookup, then `INSERT … ON CONFLICT DO NOTHING`,
//! then a re-read. If another writer inserted the same key between the
//! lookup and the insert, the insert affects zero rows and the re-read
//! returns the winner's row; the race is resolved by the unique index
//! rather than surfacing as an error.
//!
//! Write transactions start with `BEGIN IMMEDIATE`. A deferred transaction
//! that has already read would pin a WAL snapshot, and its first write
//! after another writer's commit fails with `SQLITE_BUSY_SNAPSHOT` before
//! the conflict clause is reached. Taking the write lock up front makes a
//! second writer wait (up to the busy timeout) for the first to finish.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use seed_pipeline_core::models::{
    Batch, Miner, NewObservation, Seed, SourceFile, StoreCounts, Upserted, Variation,
};
use seed_pipeline_core::store::{Store, StoreTx};

use crate::config::Config;
use crate::db;
use crate::migrate;

/// Keeps `IN (…)` lists well under SQLite's bound-parameter limit.
const IN_CHUNK: usize = 500;

/// SQLite implementation of the [`Store`] trait.
///
/// Wraps a [`SqlitePool`]; each [`StoreTx`] holds one pooled connection
/// inside an open transaction.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and apply migrations.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool)
            .await
            .context("Failed to apply schema migrations")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

const SEED_COLUMNS: &str = "id, seed_text, normalized_seed, seed_hash, created_at";
const VARIATION_COLUMNS: &str =
    "id, seed_id, variation_text, normalized_variation, variation_hash, created_at";
const MINER_COLUMNS: &str = "id, miner_external_id, display_name, meta, created_at";
const BATCH_COLUMNS: &str = "id, batch_name, source_system, ingested_at, meta";
const SOURCE_FILE_COLUMNS: &str =
    "id, batch_id, file_path, file_checksum, record_count, processed_at";

fn seed_from_row(row: &SqliteRow) -> Result<Seed> {
    Ok(Seed {
        id: row.try_get("id")?,
        seed_text: row.try_get("seed_text")?,
        normalized_seed: row.try_get("normalized_seed")?,
        seed_hash: row.try_get("seed_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn variation_from_row(row: &SqliteRow) -> Result<Variation> {
    Ok(Variation {
        id: row.try_get("id")?,
        seed_id: row.try_get("seed_id")?,
        variation_text: row.try_get("variation_text")?,
        normalized_variation: row.try_get("normalized_variation")?,
        variation_hash: row.try_get("variation_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn miner_from_row(row: &SqliteRow) -> Result<Miner> {
    Ok(Miner {
        id: row.try_get("id")?,
        miner_external_id: row.try_get("miner_external_id")?,
        display_name: row.try_get("display_name")?,
        meta: row.try_get("meta")?,
        created_at: row.try_get("created_at")?,
    })
}

fn batch_from_row(row: &SqliteRow) -> Result<Batch> {
    Ok(Batch {
        id: row.try_get("id")?,
        batch_name: row.try_get("batch_name")?,
        source_system: row.try_get("source_system")?,
        ingested_at: row.try_get("ingested_at")?,
        meta: row.try_get("meta")?,
    })
}

fn source_file_from_row(row: &SqliteRow) -> Result<SourceFile> {
    Ok(SourceFile {
        id: row.try_get("id")?,
        batch_id: row.try_get("batch_id")?,
        file_path: row.try_get("file_path")?,
        file_checksum: row.try_get("file_checksum")?,
        record_count: row.try_get("record_count")?,
        processed_at: row.try_get("processed_at")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        Ok(Box::new(SqliteTx { tx }))
    }

    async fn find_seed(&self, normalized: &str) -> Result<Option<Seed>> {
        let sql = format!("SELECT {} FROM seeds WHERE normalized_seed = ?", SEED_COLUMNS);
        sqlx::query(&sql)
            .bind(normalized)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| seed_from_row(&row))
            .transpose()
    }

    async fn find_seeds(&self, normalized: &[String]) -> Result<Vec<Seed>> {
        let unique: Vec<&String> = {
            let mut seen = HashSet::new();
            normalized.iter().filter(|n| seen.insert(*n)).collect()
        };

        let mut seeds = Vec::new();
        for chunk in unique.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT {} FROM seeds WHERE normalized_seed IN ({})",
                SEED_COLUMNS,
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for n in chunk {
                query = query.bind(n.as_str());
            }
            for row in query.fetch_all(&self.pool).await? {
                seeds.push(seed_from_row(&row)?);
            }
        }
        Ok(seeds)
    }

    async fn variation_counts(&self, seed_ids: &[i64]) -> Result<HashMap<i64, i64>> {
        let mut counts = HashMap::new();
        for chunk in seed_ids.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT seed_id, COUNT(id) AS n FROM variations WHERE seed_id IN ({}) GROUP BY seed_id",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(*id);
            }
            for row in query.fetch_all(&self.pool).await? {
                counts.insert(row.try_get("seed_id")?, row.try_get("n")?);
            }
        }
        Ok(counts)
    }

    async fn existing_variations(
        &self,
        seed_id: i64,
        normalized: &[String],
    ) -> Result<HashSet<String>> {
        let mut existing = HashSet::new();
        for chunk in normalized.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT normalized_variation FROM variations WHERE seed_id = ? AND normalized_variation IN ({})",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query_scalar::<_, String>(&sql).bind(seed_id);
            for n in chunk {
                query = query.bind(n.as_str());
            }
            existing.extend(query.fetch_all(&self.pool).await?);
        }
        Ok(existing)
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let mut counts = StoreCounts::default();
        for (table, slot) in [
            ("seeds", &mut counts.seeds),
            ("variations", &mut counts.variations),
            ("miners", &mut counts.miners),
            ("batches", &mut counts.batches),
            ("source_files", &mut counts.source_files),
            ("observations", &mut counts.observations),
        ] {
            *slot = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&self.pool)
                .await?;
        }
        Ok(counts)
    }
}

/// One open SQLite transaction. Dropping it rolls back.
struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteTx {
    async fn seed_by_norm(&mut self, normalized: &str) -> Result<Option<Seed>> {
        let sql = format!("SELECT {} FROM seeds WHERE normalized_seed = ?", SEED_COLUMNS);
        sqlx::query(&sql)
            .bind(normalized)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|row| seed_from_row(&row))
            .transpose()
    }

    async fn variation_by_key(&mut self, seed_id: i64, normalized: &str) -> Result<Option<Variation>> {
        let sql = format!(
            "SELECT {} FROM variations WHERE seed_id = ? AND normalized_variation = ?",
            VARIATION_COLUMNS
        );
        sqlx::query(&sql)
            .bind(seed_id)
            .bind(normalized)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|row| variation_from_row(&row))
            .transpose()
    }

    async fn miner_by_ext(&mut self, external_id: &str) -> Result<Option<Miner>> {
        let sql = format!("SELECT {} FROM miners WHERE miner_external_id = ?", MINER_COLUMNS);
        sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|row| miner_from_row(&row))
            .transpose()
    }

    async fn batch_by_name(&mut self, name: &str) -> Result<Option<Batch>> {
        let sql = format!("SELECT {} FROM batches WHERE batch_name = ?", BATCH_COLUMNS);
        sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|row| batch_from_row(&row))
            .transpose()
    }
}

#[async_trait]
impl StoreTx for SqliteTx {
    async fn get_or_create_seed(
        &mut self,
        raw: &str,
        normalized: &str,
        hash: &str,
    ) -> Result<Upserted<Seed>> {
        if let Some(seed) = self.seed_by_norm(normalized).await? {
            return Ok(Upserted::existing(seed));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO seeds (seed_text, normalized_seed, seed_hash, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(normalized_seed) DO NOTHING
            "#,
        )
        .bind(raw)
        .bind(normalized)
        .bind(hash)
        .bind(now())
        .execute(&mut *self.tx)
        .await?
        .rows_affected()
            == 1;

        let seed = self
            .seed_by_norm(normalized)
            .await?
            .with_context(|| format!("seed '{}' missing after upsert", normalized))?;
        Ok(Upserted {
            value: seed,
            created: inserted,
        })
    }

    async fn get_or_create_variation(
        &mut self,
        seed: &Seed,
        raw: &str,
        normalized: &str,
        hash: &str,
    ) -> Result<Upserted<Variation>> {
        if let Some(variation) = self.variation_by_key(seed.id, normalized).await? {
            return Ok(Upserted::existing(variation));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO variations (seed_id, variation_text, normalized_variation, variation_hash, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(seed_id, normalized_variation) DO NOTHING
            "#,
        )
        .bind(seed.id)
        .bind(raw)
        .bind(normalized)
        .bind(hash)
        .bind(now())
        .execute(&mut *self.tx)
        .await?
        .rows_affected()
            == 1;

        let variation = self
            .variation_by_key(seed.id, normalized)
            .await?
            .with_context(|| format!("variation '{}' missing after upsert", normalized))?;
        Ok(Upserted {
            value: variation,
            created: inserted,
        })
    }

    async fn get_or_create_miner(&mut self, external_id: Option<&str>) -> Result<Option<Miner>> {
        let ext = match external_id {
            Some(ext) if !ext.is_empty() => ext,
            _ => return Ok(None),
        };
        if let Some(miner) = self.miner_by_ext(ext).await? {
            return Ok(Some(miner));
        }

        sqlx::query(
            r#"
            INSERT INTO miners (miner_external_id, created_at)
            VALUES (?, ?)
            ON CONFLICT(miner_external_id) DO NOTHING
            "#,
        )
        .bind(ext)
        .bind(now())
        .execute(&mut *self.tx)
        .await?;

        let miner = self
            .miner_by_ext(ext)
            .await?
            .with_context(|| format!("miner '{}' missing after upsert", ext))?;
        Ok(Some(miner))
    }

    async fn get_or_create_batch(
        &mut self,
        name: &str,
        source_system: Option<&str>,
    ) -> Result<Upserted<Batch>> {
        if let Some(batch) = self.batch_by_name(name).await? {
            return Ok(Upserted::existing(batch));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO batches (batch_name, source_system, ingested_at)
            VALUES (?, ?, ?)
            ON CONFLICT(batch_name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(source_system)
        .bind(now())
        .execute(&mut *self.tx)
        .await?
        .rows_affected()
            == 1;

        let batch = self
            .batch_by_name(name)
            .await?
            .with_context(|| format!("batch '{}' missing after upsert", name))?;
        Ok(Upserted {
            value: batch,
            created: inserted,
        })
    }

    async fn find_source_file(
        &mut self,
        batch_id: i64,
        checksum: &str,
    ) -> Result<Option<SourceFile>> {
        let sql = format!(
            "SELECT {} FROM source_files WHERE batch_id = ? AND file_checksum = ?",
            SOURCE_FILE_COLUMNS
        );
        sqlx::query(&sql)
            .bind(batch_id)
            .bind(checksum)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|row| source_file_from_row(&row))
            .transpose()
    }

    async fn create_source_file(
        &mut self,
        batch_id: i64,
        path: &str,
        checksum: &str,
    ) -> Result<SourceFile> {
        // Reprocessing the same content under --no-resume replaces the earlier row.
        sqlx::query(
            r#"
            INSERT INTO source_files (batch_id, file_path, file_checksum, processed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(batch_id, file_checksum) DO UPDATE SET
                file_path = excluded.file_path,
                record_count = NULL,
                processed_at = excluded.processed_at
            "#,
        )
        .bind(batch_id)
        .bind(path)
        .bind(checksum)
        .bind(now())
        .execute(&mut *self.tx)
        .await?;

        self.find_source_file(batch_id, checksum)
            .await?
            .with_context(|| format!("source file '{}' missing after insert", path))
    }

    async fn set_record_count(&mut self, source_file_id: i64, count: i64) -> Result<()> {
        sqlx::query("UPDATE source_files SET record_count = ? WHERE id = ?")
            .bind(count)
            .bind(source_file_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn record_observation(&mut self, obs: &NewObservation) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO observations (seed_id, variation_id, miner_id, batch_id, source_file_id,
                                      score, observed_at, raw_payload)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(obs.seed_id)
        .bind(obs.variation_id)
        .bind(obs.miner_id)
        .bind(obs.batch_id)
        .bind(obs.source_file_id)
        .bind(obs.score)
        .bind(now())
        .bind(&obs.raw_payload)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let SqliteTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let SqliteTx { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
