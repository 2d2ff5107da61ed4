//! Field-level validation of generated queries against the introspected
//! schema.
//!
//! Value normalization (dropping null/empty values) runs before key
//! filtering and is idempotent. The three-way outcome lets the orchestrator
//! distinguish a deliberate match-all query from one the schema rejected
//! entirely.

use serde_json::{Map, Value};
use std::collections::HashSet;

/// Result of normalizing and filtering a generated query.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// The query was empty once empty values were dropped: a valid
    /// match-everything query, executed without regeneration.
    MatchAll,
    /// The query had keys, but none survived schema validation. Indicates
    /// schema drift or a hallucinated field.
    Emptied { removed: Vec<String> },
    /// At least one key survived.
    Kept {
        query: Map<String, Value>,
        removed: Vec<String>,
    },
}

/// Drop null, empty-string and empty-object values. Idempotent.
pub fn drop_empty_values(query: &Map<String, Value>) -> Map<String, Value> {
    query
        .iter()
        .filter(|(_, v)| !is_empty_value(v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

/// A key is valid when it names a schema field exactly, or when it is a
/// dotted path whose prefix before the first `.` does (sub-document filters).
pub fn is_valid_field(key: &str, valid: &HashSet<String>) -> bool {
    if valid.contains(key) {
        return true;
    }
    match key.split_once('.') {
        Some((prefix, _)) => valid.contains(prefix),
        None => false,
    }
}

/// Partition query keys into kept and removed sets.
pub fn filter_fields(
    query: &Map<String, Value>,
    valid: &HashSet<String>,
) -> (Map<String, Value>, Vec<String>) {
    let mut kept = Map::new();
    let mut removed = Vec::new();

    for (key, value) in query {
        if is_valid_field(key, valid) {
            kept.insert(key.clone(), value.clone());
        } else {
            removed.push(key.clone());
        }
    }

    (kept, removed)
}

/// Normalize values, then filter keys against the schema.
pub fn apply(query: &Map<String, Value>, valid: &HashSet<String>) -> FilterOutcome {
    let trimmed = drop_empty_values(query);
    if trimmed.is_empty() {
        return FilterOutcome::MatchAll;
    }

    let (kept, removed) = filter_fields(&trimmed, valid);
    if kept.is_empty() {
        FilterOutcome::Emptied { removed }
    } else {
        FilterOutcome::Kept { query: kept, removed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_set(fields: &[&str]) -> HashSet<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    fn query(json: &str) -> Map<String, Value> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_filtering_is_idempotent() {
        let valid = valid_set(&["name", "calories"]);
        let original = query(r#"{"name": "Pasta", "calories": 400, "ghost": 1}"#);

        let once = match apply(&original, &valid) {
            FilterOutcome::Kept { query, .. } => query,
            other => panic!("expected kept query, got {:?}", other),
        };
        let twice = match apply(&once, &valid) {
            FilterOutcome::Kept { query, .. } => query,
            other => panic!("expected kept query, got {:?}", other),
        };

        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_query_is_match_all() {
        let valid = valid_set(&["name"]);
        assert_eq!(apply(&Map::new(), &valid), FilterOutcome::MatchAll);
    }

    #[test]
    fn test_all_empty_values_is_match_all() {
        let valid = valid_set(&["name", "market"]);
        let q = query(r#"{"name": null, "market": "", "extra": {}}"#);
        assert_eq!(apply(&q, &valid), FilterOutcome::MatchAll);
    }

    #[test]
    fn test_unknown_fields_empty_the_query() {
        let valid = valid_set(&["name"]);
        let q = query(r#"{"nonexistent_field": "x"}"#);

        match apply(&q, &valid) {
            FilterOutcome::Emptied { removed } => {
                assert_eq!(removed, vec!["nonexistent_field".to_string()]);
            }
            other => panic!("expected emptied query, got {:?}", other),
        }
    }

    #[test]
    fn test_dotted_prefix_is_valid() {
        let valid = valid_set(&["nutrition"]);
        assert!(is_valid_field("nutrition.protein_g", &valid));
        assert!(!is_valid_field("macros.protein_g", &valid));
    }

    #[test]
    fn test_drop_empty_values_keeps_zero_and_false() {
        let q = query(r#"{"calories": 0, "vegan": false, "note": ""}"#);
        let trimmed = drop_empty_values(&q);
        assert_eq!(trimmed.len(), 2);
        assert!(trimmed.contains_key("calories"));
        assert!(trimmed.contains_key("vegan"));
    }
}
