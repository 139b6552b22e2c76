//! Source-format adapters.
//!
//! An adapter turns one parsed JSON document into a lazy sequence of
//! [`CanonicalRecord`]s. The iterator borrows from the document, so large
//! files are walked incrementally instead of being copied into a record list.
//!
//! Adapters are looked up by name in an [`AdapterRegistry`]. Two are built in:
//!
//! | Name | Input shape |
//! |------|-------------|
//! | `generic_responses_v1` | `{"responses": {"<id>": {"hotkey", "uid", "variations": {seed: [variation, …]}}}}` |
//! | `canonical_records_v1` | `[{"seed", "variation", "miner_ext_id", "score", "raw"}, …]` or `{"records": [...]}` |

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

use seed_pipeline_core::validate::{is_truthy, CanonicalRecord};

/// Lazy stream of records borrowed from a parsed document.
pub type RecordIter<'a> = Box<dyn Iterator<Item = CanonicalRecord> + 'a>;

/// A named parser from a JSON document to canonical records.
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Records in document order. Documents of the wrong shape yield nothing
    /// or yield records that fail validation; adapters never error.
    fn records<'a>(&self, doc: &'a Value) -> RecordIter<'a>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("unknown adapter '{name}' (available: {})", .available.join(", "))]
    Unknown {
        name: String,
        available: Vec<String>,
    },
}

/// Name → adapter lookup.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Box<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in adapter.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(GenericResponsesV1));
        registry.register(Box::new(CanonicalRecordsV1));
        registry
    }

    /// Add an adapter, replacing any existing one with the same name.
    pub fn register(&mut self, adapter: Box<dyn Adapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Result<&dyn Adapter, AdapterError> {
        self.adapters
            .get(name)
            .map(|a| a.as_ref())
            .ok_or_else(|| AdapterError::Unknown {
                name: name.to_string(),
                available: self.names(),
            })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Adapter> {
        self.adapters.values().map(|a| a.as_ref())
    }
}

/// Run the `adapters` command: print every registered adapter.
pub fn list_adapters(registry: &AdapterRegistry) {
    println!("{:<24} DESCRIPTION", "ADAPTER");
    for adapter in registry.iter() {
        println!("{:<24} {}", adapter.name(), adapter.description());
    }
}

/// Identifier text for a scalar: strings as-is, everything else as JSON.
fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

// ═══════════════════════════════════════════════════════════════════════
// generic_responses_v1
// ═══════════════════════════════════════════════════════════════════════

/// Miner response dumps keyed by response id.
pub struct GenericResponsesV1;

impl GenericResponsesV1 {
    /// `hotkey` when truthy, otherwise `uid` when present.
    fn miner_id(resp: &Map<String, Value>) -> Option<String> {
        if let Some(hotkey) = resp.get("hotkey").filter(|v| is_truthy(v)) {
            return Some(id_text(hotkey));
        }
        resp.get("uid").filter(|v| !v.is_null()).map(id_text)
    }
}

impl Adapter for GenericResponsesV1 {
    fn name(&self) -> &str {
        "generic_responses_v1"
    }

    fn description(&self) -> &str {
        "responses object mapping miner responses to seed → variations lists"
    }

    fn records<'a>(&self, doc: &'a Value) -> RecordIter<'a> {
        let responses = match doc.get("responses").and_then(Value::as_object) {
            Some(r) => r,
            None => return Box::new(std::iter::empty()),
        };

        Box::new(
            responses
                .values()
                .filter_map(Value::as_object)
                .flat_map(|resp| {
                    let miner = Self::miner_id(resp);
                    resp.get("variations")
                        .and_then(Value::as_object)
                        .into_iter()
                        .flat_map(|map| map.iter())
                        .filter_map(|(seed, vals)| vals.as_array().map(|a| (seed, a)))
                        .flat_map(move |(seed, vals)| {
                            let miner = miner.clone();
                            vals.iter()
                                .filter(|v| is_truthy(v))
                                .map(move |v| CanonicalRecord {
                                    seed: Some(seed.clone()),
                                    variation: v.as_str().map(str::to_string),
                                    miner_ext_id: miner.clone(),
                                    score: None,
                                    raw: None,
                                })
                        })
                }),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════
// canonical_records_v1
// ═══════════════════════════════════════════════════════════════════════

/// Pre-canonicalized records, one object per record.
pub struct CanonicalRecordsV1;

impl CanonicalRecordsV1 {
    fn record(item: &Value) -> CanonicalRecord {
        let obj = match item.as_object() {
            Some(o) => o,
            None => return CanonicalRecord::default(),
        };
        CanonicalRecord {
            seed: text(obj.get("seed")),
            variation: text(obj.get("variation")),
            miner_ext_id: obj
                .get("miner_ext_id")
                .filter(|v| !v.is_null())
                .map(id_text),
            score: obj.get("score").and_then(Value::as_f64),
            raw: obj.get("raw").cloned(),
        }
    }
}

impl Adapter for CanonicalRecordsV1 {
    fn name(&self) -> &str {
        "canonical_records_v1"
    }

    fn description(&self) -> &str {
        "array of {seed, variation, miner_ext_id, score, raw} objects"
    }

    fn records<'a>(&self, doc: &'a Value) -> RecordIter<'a> {
        let items = match doc {
            Value::Array(items) => items,
            other => match other.get("records").and_then(Value::as_array) {
                Some(items) => items,
                None => return Box::new(std::iter::empty()),
            },
        };
        Box::new(items.iter().map(Self::record))
    }
}
