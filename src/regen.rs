//! Second-pass query regeneration.
//!
//! Runs when field filtering rejected every key of a generated query. The
//! clarification prompt goes to a separately constructed model client so
//! the retry is not biased by the primary generator's conversational
//! context. The orchestrator performs exactly one attempt per turn.

use crate::error::{AssistantError, Result};
use crate::llm::LanguageModel;
use crate::normalize::{balanced_objects, strip_fences, WrappedQuery};
use crate::prompts;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Map;

lazy_static! {
    // The clarification prompt permits a raw client-command answer for the
    // all-match case; this is the one shape that is accepted.
    static ref FIND_ALL_RE: Regex =
        Regex::new(r"db\.(\w+)\.find\(\s*\{\s*\}\s*\)(?:\.limit\((\d+)\))?")
            .expect("valid regex");
}

/// Ask the syntax model for a corrected wrapped query.
pub async fn regenerate(
    llm: &dyn LanguageModel,
    schema_text: &str,
    user_text: &str,
    rejected: &WrappedQuery,
) -> Result<WrappedQuery> {
    let rejected_text = serde_json::to_string(rejected)?;
    let prompt = prompts::build_clarification_prompt(schema_text, user_text, &rejected_text);

    let response = llm.ask(&prompt).await?;
    parse_regenerated(&response)
}

/// Extract a wrapped query from the regeneration response, accepting the
/// documented `db.<entity>.find({})` special case.
pub fn parse_regenerated(response: &str) -> Result<WrappedQuery> {
    let cleaned = strip_fences(response);

    for candidate in balanced_objects(&cleaned) {
        if let Ok(wrapped) = serde_json::from_str::<WrappedQuery>(candidate) {
            return Ok(wrapped);
        }
    }

    if let Some(captures) = FIND_ALL_RE.captures(&cleaned) {
        let limit = captures.get(2).and_then(|m| m.as_str().parse::<i64>().ok());
        return Ok(WrappedQuery {
            collection: captures[1].to_string(),
            query: Map::new(),
            limit,
        });
    }

    Err(AssistantError::MalformedModelOutput(format!(
        "No parseable query in regeneration response: {}",
        cleaned
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_response() {
        let response = "```json\n{\"collection\": \"recipes\", \"query\": {\"name\": \"Pasta\"}, \"limit\": 1}\n```";
        let wrapped = parse_regenerated(response).unwrap();
        assert_eq!(wrapped.collection, "recipes");
        assert_eq!(wrapped.limit, Some(1));
    }

    #[test]
    fn test_find_all_special_case() {
        let wrapped = parse_regenerated("db.recipes.find({}).limit(1)").unwrap();
        assert_eq!(wrapped.collection, "recipes");
        assert!(wrapped.query.is_empty());
        assert_eq!(wrapped.limit, Some(1));
    }

    #[test]
    fn test_find_all_without_limit() {
        let wrapped = parse_regenerated("db.food_prices.find({})").unwrap();
        assert_eq!(wrapped.collection, "food_prices");
        assert_eq!(wrapped.limit, None);
    }

    #[test]
    fn test_prose_is_failure() {
        let err = parse_regenerated("Sorry, I cannot fix this query.").unwrap_err();
        assert!(matches!(err, AssistantError::MalformedModelOutput(_)));
    }

    #[test]
    fn test_missing_keys_is_failure() {
        let err = parse_regenerated(r#"{"collection": "recipes"}"#).unwrap_err();
        assert!(matches!(err, AssistantError::MalformedModelOutput(_)));
    }
}
