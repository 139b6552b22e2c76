//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Tables live in `Vec`s with `HashMap` unique indexes behind a
//! `std::sync::RwLock`. A transaction works on a private copy of the
//! tables; `commit` installs the copy only if no other transaction has
//! committed since `begin` (optimistic concurrency). A losing commit fails
//! and leaves the store untouched, so the caller can retry its unit of work.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{
    Batch, Miner, NewObservation, Observation, Seed, SourceFile, StoreCounts, Upserted,
    Variation,
};

use super::{Store, StoreTx};

#[derive(Debug, Clone, Default)]
struct Tables {
    seeds: Vec<Seed>,
    seed_by_norm: HashMap<String, usize>,
    variations: Vec<Variation>,
    variation_by_key: HashMap<(i64, String), usize>,
    miners: Vec<Miner>,
    miner_by_ext: HashMap<String, usize>,
    batches: Vec<Batch>,
    batch_by_name: HashMap<String, usize>,
    source_files: Vec<SourceFile>,
    observations: Vec<Observation>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: Tables,
    version: u64,
}

/// In-memory store. Cloning yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<RwLock<Shared>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Shared>> {
        self.shared
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    /// All seeds in insertion order.
    pub fn seeds(&self) -> Result<Vec<Seed>> {
        Ok(self.read()?.tables.seeds.clone())
    }

    /// All variations in insertion order.
    pub fn variations(&self) -> Result<Vec<Variation>> {
        Ok(self.read()?.tables.variations.clone())
    }

    /// All observations in insertion order.
    pub fn observations(&self) -> Result<Vec<Observation>> {
        Ok(self.read()?.tables.observations.clone())
    }

    /// All source files in insertion order.
    pub fn source_files(&self) -> Result<Vec<SourceFile>> {
        Ok(self.read()?.tables.source_files.clone())
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn next_id(len: usize) -> i64 {
    len as i64 + 1
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let shared = self.read()?;
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.shared),
            base_version: shared.version,
            tables: shared.tables.clone(),
        }))
    }

    async fn find_seed(&self, normalized: &str) -> Result<Option<Seed>> {
        let shared = self.read()?;
        let t = &shared.tables;
        Ok(t.seed_by_norm.get(normalized).map(|&i| t.seeds[i].clone()))
    }

    async fn find_seeds(&self, normalized: &[String]) -> Result<Vec<Seed>> {
        let shared = self.read()?;
        let t = &shared.tables;
        let mut seen = HashSet::new();
        Ok(normalized
            .iter()
            .filter(|n| seen.insert(n.as_str()))
            .filter_map(|n| t.seed_by_norm.get(n).map(|&i| t.seeds[i].clone()))
            .collect())
    }

    async fn variation_counts(&self, seed_ids: &[i64]) -> Result<HashMap<i64, i64>> {
        let shared = self.read()?;
        let wanted: HashSet<i64> = seed_ids.iter().copied().collect();
        let mut counts = HashMap::new();
        for v in &shared.tables.variations {
            if wanted.contains(&v.seed_id) {
                *counts.entry(v.seed_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn existing_variations(
        &self,
        seed_id: i64,
        normalized: &[String],
    ) -> Result<HashSet<String>> {
        let shared = self.read()?;
        let t = &shared.tables;
        Ok(normalized
            .iter()
            .filter(|n| t.variation_by_key.contains_key(&(seed_id, (*n).clone())))
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let shared = self.read()?;
        let t = &shared.tables;
        Ok(StoreCounts {
            seeds: t.seeds.len() as i64,
            variations: t.variations.len() as i64,
            miners: t.miners.len() as i64,
            batches: t.batches.len() as i64,
            source_files: t.source_files.len() as i64,
            observations: t.observations.len() as i64,
        })
    }
}

/// Transaction over a private copy of the tables.
struct MemoryTx {
    shared: Arc<RwLock<Shared>>,
    base_version: u64,
    tables: Tables,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn get_or_create_seed(
        &mut self,
        raw: &str,
        normalized: &str,
        hash: &str,
    ) -> Result<Upserted<Seed>> {
        let t = &mut self.tables;
        if let Some(&i) = t.seed_by_norm.get(normalized) {
            return Ok(Upserted::existing(t.seeds[i].clone()));
        }
        let seed = Seed {
            id: next_id(t.seeds.len()),
            seed_text: raw.to_string(),
            normalized_seed: normalized.to_string(),
            seed_hash: hash.to_string(),
            created_at: now(),
        };
        t.seed_by_norm.insert(normalized.to_string(), t.seeds.len());
        t.seeds.push(seed.clone());
        Ok(Upserted::new(seed))
    }

    async fn get_or_create_variation(
        &mut self,
        seed: &Seed,
        raw: &str,
        normalized: &str,
        hash: &str,
    ) -> Result<Upserted<Variation>> {
        let t = &mut self.tables;
        let key = (seed.id, normalized.to_string());
        if let Some(&i) = t.variation_by_key.get(&key) {
            return Ok(Upserted::existing(t.variations[i].clone()));
        }
        let variation = Variation {
            id: next_id(t.variations.len()),
            seed_id: seed.id,
            variation_text: raw.to_string(),
            normalized_variation: normalized.to_string(),
            variation_hash: hash.to_string(),
            created_at: now(),
        };
        t.variation_by_key.insert(key, t.variations.len());
        t.variations.push(variation.clone());
        Ok(Upserted::new(variation))
    }

    async fn get_or_create_miner(&mut self, external_id: Option<&str>) -> Result<Option<Miner>> {
        let ext = match external_id {
            Some(ext) if !ext.is_empty() => ext,
            _ => return Ok(None),
        };
        let t = &mut self.tables;
        if let Some(&i) = t.miner_by_ext.get(ext) {
            return Ok(Some(t.miners[i].clone()));
        }
        let miner = Miner {
            id: next_id(t.miners.len()),
            miner_external_id: ext.to_string(),
            display_name: None,
            meta: None,
            created_at: now(),
        };
        t.miner_by_ext.insert(ext.to_string(), t.miners.len());
        t.miners.push(miner.clone());
        Ok(Some(miner))
    }

    async fn get_or_create_batch(
        &mut self,
        name: &str,
        source_system: Option<&str>,
    ) -> Result<Upserted<Batch>> {
        let t = &mut self.tables;
        if let Some(&i) = t.batch_by_name.get(name) {
            return Ok(Upserted::existing(t.batches[i].clone()));
        }
        let batch = Batch {
            id: next_id(t.batches.len()),
            batch_name: name.to_string(),
            source_system: source_system.map(str::to_string),
            ingested_at: now(),
            meta: None,
        };
        t.batch_by_name.insert(name.to_string(), t.batches.len());
        t.batches.push(batch.clone());
        Ok(Upserted::new(batch))
    }

    async fn find_source_file(
        &mut self,
        batch_id: i64,
        checksum: &str,
    ) -> Result<Option<SourceFile>> {
        Ok(self
            .tables
            .source_files
            .iter()
            .find(|f| f.batch_id == batch_id && f.file_checksum == checksum)
            .cloned())
    }

    async fn create_source_file(
        &mut self,
        batch_id: i64,
        path: &str,
        checksum: &str,
    ) -> Result<SourceFile> {
        let t = &mut self.tables;
        if let Some(existing) = t
            .source_files
            .iter_mut()
            .find(|f| f.batch_id == batch_id && f.file_checksum == checksum)
        {
            existing.file_path = path.to_string();
            existing.record_count = None;
            existing.processed_at = now();
            return Ok(existing.clone());
        }

        let file = SourceFile {
            id: next_id(t.source_files.len()),
            batch_id,
            file_path: path.to_string(),
            file_checksum: checksum.to_string(),
            record_count: None,
            processed_at: now(),
        };
        t.source_files.push(file.clone());
        Ok(file)
    }

    async fn set_record_count(&mut self, source_file_id: i64, count: i64) -> Result<()> {
        let file = self
            .tables
            .source_files
            .iter_mut()
            .find(|f| f.id == source_file_id)
            .ok_or_else(|| anyhow!("source file {} not found", source_file_id))?;
        file.record_count = Some(count);
        Ok(())
    }

    async fn record_observation(&mut self, obs: &NewObservation) -> Result<i64> {
        let t = &mut self.tables;
        let id = next_id(t.observations.len());
        t.observations.push(Observation {
            id,
            seed_id: obs.seed_id,
            variation_id: obs.variation_id,
            miner_id: obs.miner_id,
            batch_id: obs.batch_id,
            source_file_id: obs.source_file_id,
            score: obs.score,
            observed_at: now(),
            raw_payload: obs.raw_payload.clone(),
        });
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx {
            shared,
            base_version,
            tables,
        } = *self;
        let mut guard = shared
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        if guard.version != base_version {
            bail!("write conflict: another transaction committed first; retry the unit of work");
        }
        guard.tables = tables;
        guard.version += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_in_tx(tx: &mut Box<dyn StoreTx>, raw: &str, norm: &str) -> Upserted<Seed> {
        tx.get_or_create_seed(raw, norm, "h").await.unwrap()
    }

    #[tokio::test]
    async fn test_seed_get_or_create_is_idempotent() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let first = seed_in_tx(&mut tx, "Michaël", "michael").await;
        let second = seed_in_tx(&mut tx, "MICHAEL", "michael").await;
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.value.id, second.value.id);
        assert_eq!(second.value.seed_text, "Michaël");
        tx.commit().await.unwrap();

        assert_eq!(store.counts().await.unwrap().seeds, 1);
    }

    #[tokio::test]
    async fn test_variation_scoped_by_seed() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let a = seed_in_tx(&mut tx, "Ahmed", "ahmed").await.value;
        let b = seed_in_tx(&mut tx, "Ahmet", "ahmet").await.value;
        let va = tx.get_or_create_variation(&a, "Amed", "amed", "h").await.unwrap();
        let vb = tx.get_or_create_variation(&b, "Amed", "amed", "h").await.unwrap();
        let va2 = tx.get_or_create_variation(&a, "AMED", "amed", "h").await.unwrap();
        assert!(va.created && vb.created && !va2.created);
        assert_ne!(va.value.id, vb.value.id);
        assert_eq!(va.value.id, va2.value.id);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_miner_none_for_empty_id() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_or_create_miner(None).await.unwrap().is_none());
        assert!(tx.get_or_create_miner(Some("")).await.unwrap().is_none());
        let m1 = tx.get_or_create_miner(Some("0xabc")).await.unwrap().unwrap();
        let m2 = tx.get_or_create_miner(Some("0xabc")).await.unwrap().unwrap();
        assert_eq!(m1.id, m2.id);
    }

    #[tokio::test]
    async fn test_dropped_tx_discards_writes() {
        let store = InMemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            seed_in_tx(&mut tx, "Ana", "ana").await;
            tx.get_or_create_batch("b1", None).await.unwrap();
        }
        let mut tx = store.begin().await.unwrap();
        seed_in_tx(&mut tx, "Ana", "ana").await;
        tx.rollback().await.unwrap();

        assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
    }

    #[tokio::test]
    async fn test_concurrent_commit_conflicts() {
        let store = InMemoryStore::new();
        let mut t1 = store.begin().await.unwrap();
        let mut t2 = store.begin().await.unwrap();
        seed_in_tx(&mut t1, "Ana", "ana").await;
        seed_in_tx(&mut t2, "Ana", "ana").await;
        t1.commit().await.unwrap();
        assert!(t2.commit().await.is_err());

        // retry sees the winner's row
        let mut t3 = store.begin().await.unwrap();
        let again = seed_in_tx(&mut t3, "ANA", "ana").await;
        assert!(!again.created);
        t3.commit().await.unwrap();
        assert_eq!(store.counts().await.unwrap().seeds, 1);
    }

    #[tokio::test]
    async fn test_source_file_lookup_and_record_count() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let batch = tx.get_or_create_batch("b1", Some("subnet")).await.unwrap().value;
        assert_eq!(batch.source_system.as_deref(), Some("subnet"));
        let f = tx.create_source_file(batch.id, "a.json", "abc").await.unwrap();
        tx.set_record_count(f.id, 4).await.unwrap();
        let found = tx.find_source_file(batch.id, "abc").await.unwrap().unwrap();
        assert_eq!(found.record_count, Some(4));
        assert!(tx.find_source_file(batch.id + 1, "abc").await.unwrap().is_none());
        tx.commit().await.unwrap();
        assert_eq!(store.source_files().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_observations_are_never_deduplicated() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let seed = seed_in_tx(&mut tx, "Ana", "ana").await.value;
        let var = tx.get_or_create_variation(&seed, "Anna", "anna", "h").await.unwrap().value;
        let obs = NewObservation {
            seed_id: seed.id,
            variation_id: var.id,
            miner_id: None,
            batch_id: None,
            source_file_id: None,
            score: Some(0.5),
            raw_payload: None,
        };
        let a = tx.record_observation(&obs).await.unwrap();
        let b = tx.record_observation(&obs).await.unwrap();
        assert_ne!(a, b);
        tx.commit().await.unwrap();
        assert_eq!(store.observations().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_read_queries() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let seed = seed_in_tx(&mut tx, "Ahmed", "ahmed").await.value;
        tx.get_or_create_variation(&seed, "ahmad", "ahmad", "h").await.unwrap();
        tx.get_or_create_variation(&seed, "amed", "amed", "h").await.unwrap();
        tx.commit().await.unwrap();

        let found = store
            .find_seeds(&["ahmed".to_string(), "ahmed".to_string(), "zed".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        let counts = store.variation_counts(&[seed.id]).await.unwrap();
        assert_eq!(counts[&seed.id], 2);
        let existing = store
            .existing_variations(seed.id, &["ahmad".to_string(), "zed".to_string()])
            .await
            .unwrap();
        assert_eq!(existing, HashSet::from(["ahmad".to_string()]));
        assert!(store.find_seed("zed").await.unwrap().is_none());
    }
}
