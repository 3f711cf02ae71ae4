//! SQLite helper utilities for type conversion
//!
//! SQLite doesn't natively support arrays or JSONB like PostgreSQL. This
//! module converts between Rust types and the TEXT columns the catalog uses
//! for language lists, scan error details, and free-form metadata.

use anyhow::{Result, anyhow};
use serde::{Serialize, de::DeserializeOwned};

// ============================================================================
// Array/Vec Helpers (stored as JSON strings in SQLite)
// ============================================================================

/// Serialize a Vec to a JSON string for SQLite storage
#[inline]
pub fn vec_to_json<T: Serialize>(v: &[T]) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

/// Deserialize a JSON string from SQLite to a Vec
#[inline]
pub fn json_to_vec<T: DeserializeOwned>(s: &str) -> Vec<T> {
    serde_json::from_str(s).unwrap_or_default()
}

// ============================================================================
// JSON Value Helpers (stored as TEXT in SQLite)
// ============================================================================

/// Serialize any serializable value to a JSON string
#[inline]
pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Deserialize a JSON string to a value
#[inline]
pub fn from_json<T: DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| anyhow!("JSON parse error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_json_roundtrip() {
        let v = vec!["en".to_string(), "de".to_string()];
        let json = vec_to_json(&v);
        let parsed: Vec<String> = json_to_vec(&json);
        assert_eq!(v, parsed);
    }

    #[test]
    fn test_empty_vec() {
        let v: Vec<String> = vec![];
        let json = vec_to_json(&v);
        assert_eq!(json, "[]");
        let parsed: Vec<String> = json_to_vec(&json);
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_invalid_json_yields_empty_vec() {
        let parsed: Vec<String> = json_to_vec("not json");
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_value_roundtrip() {
        let value = serde_json::json!({"source_missing": true});
        let s = to_json(&value);
        let back: serde_json::Value = from_json(&s).unwrap();
        assert_eq!(value, back);
    }
}
