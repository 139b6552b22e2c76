//! Canonical records and their structural validation.
//!
//! Adapters turn raw documents into [`CanonicalRecord`]s. Before a record
//! touches storage it must pass [`validate_record`]: `seed` and `variation`
//! are required, everything else is optional and never causes rejection.

use serde_json::Value;
use thiserror::Error;

use crate::normalize::is_space;

/// A format-independent record produced by an adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalRecord {
    pub seed: Option<String>,
    pub variation: Option<String>,
    pub miner_ext_id: Option<String>,
    pub score: Option<f64>,
    /// Opaque payload stored as JSON text on the observation.
    pub raw: Option<serde_json::Value>,
}

impl CanonicalRecord {
    pub fn new(seed: impl Into<String>, variation: impl Into<String>) -> Self {
        Self {
            seed: Some(seed.into()),
            variation: Some(variation.into()),
            ..Default::default()
        }
    }

    pub fn with_miner(mut self, miner_ext_id: impl Into<String>) -> Self {
        self.miner_ext_id = Some(miner_ext_id.into());
        self
    }
}

/// Why a record was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidRecord {
    #[error("missing or invalid seed")]
    MissingSeed,
    #[error("missing or invalid variation")]
    MissingVariation,
}

/// Borrowed view of a record that passed validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidRecord<'a> {
    pub seed: &'a str,
    pub variation: &'a str,
    pub miner_ext_id: Option<&'a str>,
    pub score: Option<f64>,
    pub raw: Option<&'a serde_json::Value>,
}

/// Check that `seed` and `variation` are present and not blank.
pub fn validate_record(record: &CanonicalRecord) -> Result<ValidRecord<'_>, InvalidRecord> {
    let seed = non_blank(record.seed.as_deref()).ok_or(InvalidRecord::MissingSeed)?;
    let variation =
        non_blank(record.variation.as_deref()).ok_or(InvalidRecord::MissingVariation)?;

    Ok(ValidRecord {
        seed,
        variation,
        miner_ext_id: record.miner_ext_id.as_deref().filter(|s| !s.is_empty()),
        score: record.score,
        raw: record.raw.as_ref().filter(|v| is_truthy(v)),
    })
}

/// JSON truthiness: null, false, zero, and empty strings/containers are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim_matches(is_space).is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_minimal_record() {
        let rec = CanonicalRecord::new("Michael", "Micheal");
        let valid = validate_record(&rec).unwrap();
        assert_eq!(valid.seed, "Michael");
        assert_eq!(valid.variation, "Micheal");
        assert!(valid.miner_ext_id.is_none());
        assert!(valid.score.is_none());
        assert!(valid.raw.is_none());
    }

    #[test]
    fn test_missing_seed() {
        let rec = CanonicalRecord {
            variation: Some("x".into()),
            ..Default::default()
        };
        assert_eq!(validate_record(&rec), Err(InvalidRecord::MissingSeed));
    }

    #[test]
    fn test_empty_and_blank_rejected() {
        let rec = CanonicalRecord::new("", "x");
        assert_eq!(validate_record(&rec), Err(InvalidRecord::MissingSeed));

        let rec = CanonicalRecord::new("Ahmed", "   ");
        assert_eq!(validate_record(&rec), Err(InvalidRecord::MissingVariation));
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(InvalidRecord::MissingSeed.to_string(), "missing or invalid seed");
        assert_eq!(
            InvalidRecord::MissingVariation.to_string(),
            "missing or invalid variation"
        );
    }

    #[test]
    fn test_optional_fields_pass_through() {
        let rec = CanonicalRecord {
            score: Some(0.75),
            raw: Some(json!({"uid": 7})),
            ..CanonicalRecord::new("Ahmed", "Ahmad").with_miner("0xabc")
        };
        let valid = validate_record(&rec).unwrap();
        assert_eq!(valid.miner_ext_id, Some("0xabc"));
        assert_eq!(valid.score, Some(0.75));
        assert_eq!(valid.raw, Some(&json!({"uid": 7})));
    }

    #[test]
    fn test_separator_only_variation_is_blank() {
        let rec = CanonicalRecord::new("Ahmed", "\u{1f}\u{1c} ");
        assert_eq!(validate_record(&rec), Err(InvalidRecord::MissingVariation));
    }

    #[test]
    fn test_falsy_raw_payload_dropped() {
        for raw in [json!(null), json!({}), json!([]), json!(0), json!(""), json!(false)] {
            let rec = CanonicalRecord {
                raw: Some(raw),
                ..CanonicalRecord::new("Ahmed", "Ahmad")
            };
            assert!(validate_record(&rec).unwrap().raw.is_none());
        }
        assert!(is_truthy(&json!({"uid": 0})));
        assert!(is_truthy(&json!(0.5)));
    }

    #[test]
    fn test_empty_miner_treated_as_absent() {
        let rec = CanonicalRecord::new("Ahmed", "Ahmad").with_miner("");
        assert!(validate_record(&rec).unwrap().miner_ext_id.is_none());
    }
}
