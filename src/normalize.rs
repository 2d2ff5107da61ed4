//! Query normalization: pull a wrapped `{collection, query}` object out of
//! raw model text.
//!
//! Model output is unreliable: it may fence the query, prefix it with a
//! language tag, surround it with prose, or return no query at all. This
//! module never fails on malformed input; the worst case is an
//! `Unstructured` fallback carrying the cleaned text.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The canonical query shape used internally regardless of backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WrappedQuery {
    /// Target collection/table. Models trained on SQL schemas sometimes emit
    /// `table` instead; both spellings are accepted.
    #[serde(alias = "table")]
    pub collection: String,
    pub query: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

/// Outcome of normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// A well-formed wrapped query was found.
    Wrapped(WrappedQuery),
    /// No structured query; the cleaned text may still be a literal client
    /// command and is handed back for pattern matching.
    Unstructured(String),
}

/// Strip a fenced code block and a leading `json` language tag.
///
/// Model output is assumed to wrap code in one fenced block, so the segment
/// after the first fence marker is the content of that block.
pub fn strip_fences(raw: &str) -> String {
    let body = if raw.contains("```") {
        raw.split("```").nth(1).unwrap_or(raw)
    } else {
        raw
    };

    let body = body.trim();
    match body.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => body[4..].trim_start().to_string(),
        _ => body.to_string(),
    }
}

/// Extract balanced `{...}` substrings left to right.
///
/// String- and escape-aware depth counting, so nested objects and braces
/// inside string literals do not truncate a candidate.
pub fn balanced_objects(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut candidates = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = scan_object(bytes, i) {
                candidates.push(&text[i..=end]);
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }

    candidates
}

fn scan_object(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}

/// Normalize raw model text into a wrapped query or an unstructured fallback.
///
/// First balanced object that strict-parses with both required keys wins;
/// candidates are tried in order of appearance, not ranked. A bare filter
/// object whose keys identify a collection is wrapped with the inferred
/// target before falling back to plain text.
pub fn normalize(raw: &str) -> Normalized {
    let cleaned = strip_fences(raw);

    for candidate in balanced_objects(&cleaned) {
        if let Ok(wrapped) = serde_json::from_str::<WrappedQuery>(candidate) {
            return Normalized::Wrapped(wrapped);
        }
    }

    for candidate in balanced_objects(&cleaned) {
        if let Ok(Value::Object(filter)) = serde_json::from_str::<Value>(candidate) {
            if let Some(collection) = infer_collection(&filter) {
                return Normalized::Wrapped(WrappedQuery {
                    collection: collection.to_string(),
                    query: filter,
                    limit: None,
                });
            }
        }
    }

    Normalized::Unstructured(cleaned)
}

/// Infer the target collection of a bare filter from its signature field.
fn infer_collection(filter: &Map<String, Value>) -> Option<&'static str> {
    if filter.contains_key("ingredient_name") {
        Some("ingredient_nutrition")
    } else if filter.contains_key("commodity") {
        Some("food_prices")
    } else if filter.contains_key("name") {
        Some("recipes")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences_with_json_tag() {
        let raw = "```json\n{\"collection\": \"recipes\", \"query\": {}}\n```";
        let cleaned = strip_fences(raw);
        assert!(cleaned.starts_with('{'));
        assert!(!cleaned.contains("```"));
    }

    #[test]
    fn test_fenced_block_round_trip() {
        let original = WrappedQuery {
            collection: "recipes".to_string(),
            query: serde_json::from_str(r#"{"name": "Pasta", "calories": 400}"#).unwrap(),
            limit: Some(5),
        };
        let raw = format!("```json\n{}\n```", serde_json::to_string(&original).unwrap());

        match normalize(&raw) {
            Normalized::Wrapped(wrapped) => assert_eq!(wrapped, original),
            other => panic!("expected wrapped query, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_object_survives_extraction() {
        let raw = r#"Here is the query:
{"collection": "recipes", "query": {"calories": {"$lt": 500}}}"#;

        match normalize(raw) {
            Normalized::Wrapped(wrapped) => {
                assert_eq!(wrapped.collection, "recipes");
                assert!(wrapped.query["calories"].is_object());
            }
            other => panic!("expected wrapped query, got {:?}", other),
        }
    }

    #[test]
    fn test_first_valid_candidate_wins() {
        let raw = r#"{"not": "a query"}
{"collection": "recipes", "query": {"name": "A"}}
{"collection": "food_prices", "query": {"market": "B"}}"#;

        match normalize(raw) {
            Normalized::Wrapped(wrapped) => assert_eq!(wrapped.collection, "recipes"),
            other => panic!("expected wrapped query, got {:?}", other),
        }
    }

    #[test]
    fn test_table_alias_accepted() {
        let raw = r#"{"table": "food_prices", "query": {"commodity": "Maize"}}"#;
        match normalize(raw) {
            Normalized::Wrapped(wrapped) => assert_eq!(wrapped.collection, "food_prices"),
            other => panic!("expected wrapped query, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_filter_is_wrapped() {
        let raw = r#"{"commodity": "Maize", "market": "Nairobi"}"#;
        match normalize(raw) {
            Normalized::Wrapped(wrapped) => {
                assert_eq!(wrapped.collection, "food_prices");
                assert_eq!(wrapped.query.len(), 2);
            }
            other => panic!("expected wrapped query, got {:?}", other),
        }
    }

    #[test]
    fn test_prose_falls_back_to_unstructured() {
        let raw = "I could not produce a query for that question.";
        match normalize(raw) {
            Normalized::Unstructured(text) => assert_eq!(text, raw),
            other => panic!("expected unstructured fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_braces_inside_strings_do_not_truncate() {
        let raw = r#"{"collection": "recipes", "query": {"name": "stew {thick}"}}"#;
        match normalize(raw) {
            Normalized::Wrapped(wrapped) => {
                assert_eq!(wrapped.query["name"], "stew {thick}");
            }
            other => panic!("expected wrapped query, got {:?}", other),
        }
    }

    #[test]
    fn test_query_must_be_an_object() {
        let raw = r#"{"collection": "recipes", "query": "name = Pasta"}"#;
        assert!(matches!(normalize(raw), Normalized::Unstructured(_)));
    }
}
