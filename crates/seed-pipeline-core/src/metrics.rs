//! Ingestion counters.
//!
//! A [`Metrics`] value is the result of every ingest run. Counters only
//! ever go up; each skipped file or record increments exactly one of them,
//! so the summary is a full accounting of the input.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub seeds_new: u64,
    pub seeds_existing: u64,
    pub variations_new: u64,
    pub variations_existing: u64,
    pub observations_inserted: u64,
    pub files_processed: u64,
    pub files_skipped: u64,
    pub invalid_records: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_seed(&mut self, created: bool) {
        if created {
            self.seeds_new += 1;
        } else {
            self.seeds_existing += 1;
        }
    }

    pub fn record_variation(&mut self, created: bool) {
        if created {
            self.variations_new += 1;
        } else {
            self.variations_existing += 1;
        }
    }

    pub fn record_observation(&mut self) {
        self.observations_inserted += 1;
    }

    pub fn record_file_processed(&mut self) {
        self.files_processed += 1;
    }

    pub fn record_file_skipped(&mut self) {
        self.files_skipped += 1;
    }

    pub fn record_invalid(&mut self) {
        self.invalid_records += 1;
    }

    /// Flat key → count mapping, keys in a stable order.
    pub fn as_map(&self) -> BTreeMap<&'static str, u64> {
        BTreeMap::from([
            ("seeds_new", self.seeds_new),
            ("seeds_existing", self.seeds_existing),
            ("variations_new", self.variations_new),
            ("variations_existing", self.variations_existing),
            ("observations_inserted", self.observations_inserted),
            ("files_processed", self.files_processed),
            ("files_skipped", self.files_skipped),
            ("invalid_records", self.invalid_records),
        ])
    }

    /// One-line human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Processed {} file(s), skipped {}. Seeds: {} new, {} existing. \
             Variations: {} new, {} existing. Observations: {}. Invalid records: {}.",
            self.files_processed,
            self.files_skipped,
            self.seeds_new,
            self.seeds_existing,
            self.variations_new,
            self.variations_existing,
            self.observations_inserted,
            self.invalid_records,
        )
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
