//! Storage abstraction for Seed Pipeline.
//!
//! The [`Store`] trait is the handle an ingest run or query server owns;
//! [`StoreTx`] is one unit of work opened from it. All entity writes go
//! through a transaction so a file's rows commit or vanish together.
//!
//! Every `get_or_create_*` operation must be atomic with respect to its
//! uniqueness key: when two writers race to create the same logical row,
//! exactly one insert wins and both callers get the winner's row back.
//! Losing the race is never an error.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Batch, Miner, NewObservation, Seed, SourceFile, StoreCounts, Upserted, Variation,
};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`begin`](Store::begin) | Open a transaction for entity writes |
/// | [`find_seed`](Store::find_seed) | Look up one seed by normalized text |
/// | [`find_seeds`](Store::find_seeds) | Look up many seeds by normalized text |
/// | [`variation_counts`](Store::variation_counts) | Variations per seed id |
/// | [`existing_variations`](Store::existing_variations) | Which normalized variations a seed already has |
/// | [`counts`](Store::counts) | Row counts per entity |
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction. Dropping it without [`StoreTx::commit`] discards
    /// every write made through it.
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;

    async fn find_seed(&self, normalized: &str) -> Result<Option<Seed>>;

    async fn find_seeds(&self, normalized: &[String]) -> Result<Vec<Seed>>;

    /// Number of variations per seed id. Seeds without variations are absent.
    async fn variation_counts(&self, seed_ids: &[i64]) -> Result<HashMap<i64, i64>>;

    /// The subset of `normalized` already stored as variations of `seed_id`.
    async fn existing_variations(
        &self,
        seed_id: i64,
        normalized: &[String],
    ) -> Result<HashSet<String>>;

    async fn counts(&self) -> Result<StoreCounts>;
}

/// A unit of work against a [`Store`].
///
/// Reads made through a transaction see its own uncommitted writes.
#[async_trait]
pub trait StoreTx: Send {
    /// Get the seed with this normalized text, inserting it if absent.
    async fn get_or_create_seed(
        &mut self,
        raw: &str,
        normalized: &str,
        hash: &str,
    ) -> Result<Upserted<Seed>>;

    /// Get the variation of `seed` with this normalized text, inserting it if absent.
    async fn get_or_create_variation(
        &mut self,
        seed: &Seed,
        raw: &str,
        normalized: &str,
        hash: &str,
    ) -> Result<Upserted<Variation>>;

    /// Returns `None` for an absent or empty external id.
    async fn get_or_create_miner(&mut self, external_id: Option<&str>) -> Result<Option<Miner>>;

    async fn get_or_create_batch(
        &mut self,
        name: &str,
        source_system: Option<&str>,
    ) -> Result<Upserted<Batch>>;

    async fn find_source_file(&mut self, batch_id: i64, checksum: &str)
        -> Result<Option<SourceFile>>;

    async fn create_source_file(
        &mut self,
        batch_id: i64,
        path: &str,
        checksum: &str,
    ) -> Result<SourceFile>;

    async fn set_record_count(&mut self, source_file_id: i64, count: i64) -> Result<()>;

    /// Append an observation. Never deduplicated. Returns the new row id.
    async fn record_observation(&mut self, obs: &NewObservation) -> Result<i64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
