//! Canonical entity model.
//!
//! These types mirror the relational schema one-to-one. References between
//! entities are plain integer ids; uniqueness is enforced by the store.
//!
//! | Entity | Identity key | Lifecycle |
//! |--------|--------------|-----------|
//! | [`Seed`] | `normalized_seed` | create-once |
//! | [`Variation`] | `(seed_id, normalized_variation)` | create-once, owned by seed |
//! | [`Miner`] | `miner_external_id` | create-once, lazy |
//! | [`Batch`] | `batch_name` | create-once per name |
//! | [`SourceFile`] | `(batch_id, file_checksum)` | one per processed file |
//! | [`Observation`] | none | append-only |

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Seed {
    pub id: i64,
    pub seed_text: String,
    pub normalized_seed: String,
    pub seed_hash: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variation {
    pub id: i64,
    pub seed_id: i64,
    pub variation_text: String,
    pub normalized_variation: String,
    pub variation_hash: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Miner {
    pub id: i64,
    pub miner_external_id: String,
    pub display_name: Option<String>,
    pub meta: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Batch {
    pub id: i64,
    pub batch_name: String,
    pub source_system: Option<String>,
    pub ingested_at: i64,
    pub meta: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFile {
    pub id: i64,
    pub batch_id: i64,
    pub file_path: String,
    pub file_checksum: String,
    pub record_count: Option<i64>,
    pub processed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub id: i64,
    pub seed_id: i64,
    pub variation_id: i64,
    pub miner_id: Option<i64>,
    pub batch_id: Option<i64>,
    pub source_file_id: Option<i64>,
    pub score: Option<f64>,
    pub observed_at: i64,
    pub raw_payload: Option<String>,
}

/// An observation to append. The store assigns `id` and `observed_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
    pub seed_id: i64,
    pub variation_id: i64,
    pub miner_id: Option<i64>,
    pub batch_id: Option<i64>,
    pub source_file_id: Option<i64>,
    pub score: Option<f64>,
    /// Raw adapter payload, already serialized to JSON text.
    pub raw_payload: Option<String>,
}

/// Result of a get-or-create: the row plus whether this call inserted it.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted<T> {
    pub value: T,
    pub created: bool,
}

impl<T> Upserted<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            created: true,
        }
    }

    pub fn existing(value: T) -> Self {
        Self {
            value,
            created: false,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Row counts per entity, as reported by `seedctl stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub seeds: i64,
    pub variations: i64,
    pub miners: i64,
    pub batches: i64,
    pub source_files: i64,
    pub observations: i64,
}
