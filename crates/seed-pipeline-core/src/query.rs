//! Read-only seed queries.
//!
//! Both operations compare by normalized text and answer in terms of the
//! caller's raw input, preserving its order and casing. Results are keyed
//! by raw string: an input repeated verbatim is answered once, at its first
//! position. Nothing here writes to the store.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde::Serialize;

use crate::normalize::Normalizer;
use crate::store::Store;

/// Existence report for one requested seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedExistence {
    pub seed: String,
    pub exists: bool,
    pub variation_count: i64,
}

/// Partition of candidate variations into known and unseen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedDiff {
    pub existing: Vec<String>,
    pub new: Vec<String>,
}

/// First occurrence of each distinct raw string, in input order.
fn unique_raw(items: &[String]) -> Vec<&String> {
    let mut seen = HashSet::new();
    items.iter().filter(|s| seen.insert(s.as_str())).collect()
}

/// For each raw seed, report whether its normalized form is stored and how
/// many variations it has. Output order follows `seeds`.
pub async fn seeds_exist(
    store: &dyn Store,
    normalizer: &Normalizer,
    seeds: &[String],
) -> Result<Vec<SeedExistence>> {
    let seeds = unique_raw(seeds);
    let normalized: Vec<String> = seeds.iter().map(|s| normalizer.seed(s)).collect();

    let found: HashMap<String, i64> = store
        .find_seeds(&normalized)
        .await?
        .into_iter()
        .map(|s| (s.normalized_seed, s.id))
        .collect();

    let ids: Vec<i64> = found.values().copied().collect();
    let counts = if ids.is_empty() {
        HashMap::new()
    } else {
        store.variation_counts(&ids).await?
    };

    Ok(seeds
        .iter()
        .zip(normalized.iter())
        .map(|(raw, norm)| match found.get(norm) {
            Some(id) => SeedExistence {
                seed: (*raw).clone(),
                exists: true,
                variation_count: counts.get(id).copied().unwrap_or(0),
            },
            None => SeedExistence {
                seed: (*raw).clone(),
                exists: false,
                variation_count: 0,
            },
        })
        .collect())
}

/// Split `variations` into those already stored under `seed` and those not.
///
/// An unknown seed makes every candidate new.
pub async fn seed_diff(
    store: &dyn Store,
    normalizer: &Normalizer,
    seed: &str,
    variations: &[String],
) -> Result<SeedDiff> {
    let variations = unique_raw(variations);
    let seed_row = match store.find_seed(&normalizer.seed(seed)).await? {
        Some(row) => row,
        None => {
            return Ok(SeedDiff {
                existing: Vec::new(),
                new: variations.into_iter().cloned().collect(),
            })
        }
    };

    let normalized: Vec<String> = variations.iter().map(|v| normalizer.variation(v)).collect();
    let known = store.existing_variations(seed_row.id, &normalized).await?;

    let mut diff = SeedDiff::default();
    for (raw, norm) in variations.iter().zip(normalized.iter()) {
        if known.contains(norm) {
            diff.existing.push((*raw).clone());
        } else {
            diff.new.push((*raw).clone());
        }
    }
    Ok(diff)
}
