//! Canonical Serialization and Result Hashing
//!
//! Deterministic JSON serialization and SHA-256 digests for structured
//! engine output. The digest over the canonical form is the binding
//! commitment the chain verifies, so two honest workers producing the same
//! structured output must reach byte-identical canonical text here.
//!
//! # Canonical Format
//!
//! 1. **Key Ordering**: object keys sorted lexicographically (UTF-8 byte
//!    order) at every nesting level
//! 2. **No Whitespace**: compact representation
//! 3. **Number Format**: shortest round-trip decimal; floats keep their
//!    fractional form (`3.0` stays `3.0`, never coerced to `3`)
//! 4. **Arrays**: order preserved; batch and output order are significant
//! 5. **No Null Values**: object fields holding null are omitted
//!
//! Non-finite numbers (NaN, ±Inf) are rejected before they can enter a
//! document; their textual form is not stable across platforms.

pub mod document;

use serde_json::{Map, Number, Value};
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Non-finite number cannot be canonicalized: {0}")]
    NonFiniteNumber(f64),

    #[error("Malformed tensor {name}: shape {shape:?} does not hold {values} values")]
    MalformedTensor {
        name: String,
        shape: Vec<usize>,
        values: usize,
    },

    #[error("Invalid digest string: {0}")]
    InvalidDigest(String),
}

pub type Result<T> = std::result::Result<T, CanonError>;

/// 32-byte SHA-256 digest of a canonical document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// `0x`-prefixed lowercase hex, exactly 66 characters
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self> {
        let bare = s
            .strip_prefix("0x")
            .ok_or_else(|| CanonError::InvalidDigest(s.to_string()))?;
        let raw = hex::decode(bare).map_err(|_| CanonError::InvalidDigest(s.to_string()))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| CanonError::InvalidDigest(s.to_string()))?;
        Ok(Digest(bytes))
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Serialize a JSON value to its canonical string form
pub fn to_canonical_json(value: &Value) -> Result<String> {
    let canonical = canonicalize_value(value.clone());
    Ok(serde_json::to_string(&canonical)?)
}

/// SHA-256 over the UTF-8 bytes of the canonical form
pub fn hash_value(value: &Value) -> Result<Digest> {
    let canonical = to_canonical_json(value)?;
    Ok(hash_canonical_text(&canonical))
}

/// Digest of already-canonical text; exposed for verification paths
pub fn hash_canonical_text(text: &str) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    Digest(hasher.finalize().into())
}

/// Convert a float into a canonical JSON number, rejecting NaN/Inf
pub fn finite_number(value: f64) -> Result<Number> {
    Number::from_f64(value).ok_or(CanonError::NonFiniteNumber(value))
}

fn canonicalize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: BTreeMap<String, Value> = BTreeMap::new();
            for (k, v) in map {
                // Null fields are omitted from the canonical form
                if !v.is_null() {
                    sorted.insert(k, canonicalize_value(v));
                }
            }

            let mut canonical_map = Map::new();
            for (k, v) in sorted {
                canonical_map.insert(k, v);
            }

            Value::Object(canonical_map)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize_value).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_ordering() {
        let value = json!({
            "z_field": "last",
            "a_field": "first",
            "nested": {
                "z_inner": 2,
                "a_inner": 1,
            }
        });

        let canonical = to_canonical_json(&value).unwrap();

        assert!(canonical.starts_with(r#"{"a_field":"#));
        assert!(canonical.contains(r#"{"a_inner":1,"z_inner":2}"#));
    }

    #[test]
    fn test_no_whitespace() {
        let value = json!({ "a": [1, 2], "b": "text with spaces" });
        let canonical = to_canonical_json(&value).unwrap();
        assert_eq!(canonical, r#"{"a":[1,2],"b":"text with spaces"}"#);
    }

    #[test]
    fn test_hash_independent_of_insertion_order() {
        let mut forward = Map::new();
        forward.insert("alpha".into(), json!(1));
        forward.insert("beta".into(), json!(2));

        let mut reverse = Map::new();
        reverse.insert("beta".into(), json!(2));
        reverse.insert("alpha".into(), json!(1));

        let h1 = hash_value(&Value::Object(forward)).unwrap();
        let h2 = hash_value(&Value::Object(reverse)).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_hash_is_stable_across_calls() {
        let value = json!({"outputs": ["a", "b"], "model": "m"});
        let h1 = hash_value(&value).unwrap();
        let h2 = hash_value(&value).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_float_keeps_fractional_form() {
        let value = json!({"y": [[3.0]]});
        let canonical = to_canonical_json(&value).unwrap();
        assert_eq!(canonical, r#"{"y":[[3.0]]}"#);
    }

    #[test]
    fn test_array_order_preserved() {
        let value = json!({"items": [3, 1, 4, 1, 5, 9]});
        let canonical = to_canonical_json(&value).unwrap();
        assert!(canonical.contains("[3,1,4,1,5,9]"));
    }

    #[test]
    fn test_null_fields_omitted() {
        let value = json!({"present": "value", "missing": null});
        let canonical = to_canonical_json(&value).unwrap();
        assert!(!canonical.contains("missing"));
        assert!(canonical.contains("present"));
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(matches!(
            finite_number(f64::NAN),
            Err(CanonError::NonFiniteNumber(_))
        ));
        assert!(matches!(
            finite_number(f64::INFINITY),
            Err(CanonError::NonFiniteNumber(_))
        ));
        assert!(matches!(
            finite_number(f64::NEG_INFINITY),
            Err(CanonError::NonFiniteNumber(_))
        ));
        assert!(finite_number(0.0).is_ok());
    }

    #[test]
    fn test_pinned_reference_hash() {
        // Fixed reference value: sha256 of the exact canonical bytes of
        // {"y":[[3.0]]}, pinned once and checked byte-for-byte.
        let value = json!({"y": [[3.0]]});
        let digest = hash_value(&value).unwrap();
        assert_eq!(
            digest.to_hex(),
            "0x333f1d3deec43d6902ccd8c9efb03d97f6a166e74cde711e52117d9104cf8642"
        );
    }

    #[test]
    fn test_digest_format() {
        let digest = hash_value(&json!({})).unwrap();
        let hex = digest.to_hex();
        assert_eq!(hex.len(), 66);
        assert!(hex.starts_with("0x"));
        assert!(hex[2..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_digest_parse_round_trip() {
        let digest = hash_value(&json!({"k": 1})).unwrap();
        let parsed = Digest::parse(&digest.to_hex()).unwrap();
        assert_eq!(parsed, digest);

        assert!(Digest::parse("deadbeef").is_err());
        assert!(Digest::parse("0x1234").is_err());
    }
}
