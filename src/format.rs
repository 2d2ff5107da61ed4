//! Rendering query results for display.
//!
//! Pure functions. The empty-result text is distinct from every error
//! message so callers and logs can tell "no data" from "failed".

use crate::backend::Record;
use itertools::Itertools;
use serde_json::Value;

pub const NO_RESULTS: &str = "Query was valid but returned no results.";

/// Render records as a readable list. Internal `_`-prefixed keys are
/// skipped.
pub fn render(records: &[Record]) -> String {
    if records.is_empty() {
        return NO_RESULTS.to_string();
    }

    let lines = records
        .iter()
        .map(|record| {
            let fields = record
                .iter()
                .filter(|(key, _)| !key.starts_with('_'))
                .map(|(key, value)| format!("{}: {}", key, render_value(value)))
                .join(", ");
            format!("- {}", fields)
        })
        .join("\n");

    format!("Query results:\n{}", lines)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(items) => items.iter().map(render_value).join(", "),
        Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: &str) -> Record {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_empty_is_distinct_from_errors() {
        assert_eq!(render(&[]), NO_RESULTS);
    }

    #[test]
    fn test_render_skips_internal_keys() {
        let records = vec![record(r#"{"_id": "abc", "name": "Pasta", "calories": 400}"#)];
        let text = render(&records);
        assert!(text.contains("name: Pasta"));
        assert!(text.contains("calories: 400"));
        assert!(!text.contains("_id"));
    }

    #[test]
    fn test_render_arrays_inline() {
        let records = vec![record(r#"{"name": "Stew", "parts": ["beef", "carrot"]}"#)];
        let text = render(&records);
        assert!(text.contains("parts: beef, carrot"));
    }
}
