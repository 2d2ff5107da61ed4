//! Structured key=value form input.
//!
//! The direct path for inserts, updates and deletes: no language model, just
//! the grammar `key=value, key=value, ...` with single- or double-quoted
//! values allowed to contain commas.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Number, Value};

lazy_static! {
    static ref PAIR_RE: Regex =
        Regex::new(r#"(\w+)\s*=\s*("[^"]*"|'[^']*'|[^,]*)"#).expect("valid regex");
}

/// Parse the grammar into a record. Returns `None` when the text contains no
/// recognizable pair at all.
pub fn parse_structured(text: &str) -> Option<Map<String, Value>> {
    let mut input = Map::new();

    for captures in PAIR_RE.captures_iter(text) {
        let key = captures[1].trim().to_string();
        let raw = strip_quotes(captures[2].trim());
        input.insert(key.clone(), coerce_value(&key, raw));
    }

    if input.is_empty() {
        None
    } else {
        Some(input)
    }
}

fn strip_quotes(raw: &str) -> &str {
    let stripped = raw
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')));
    stripped.unwrap_or(raw)
}

/// Field-aware coercion: ingredient lists become arrays, dates are
/// normalized, empty values become null, numeric-looking values become
/// numbers.
fn coerce_value(key: &str, raw: &str) -> Value {
    if key == "recipe_ingredient_parts" || key == "recipeingredientparts" {
        let parts: Vec<Value> = raw
            .split(',')
            .map(|part| strip_quotes(part.trim()))
            .filter(|part| !part.is_empty())
            .map(|part| Value::String(part.to_string()))
            .collect();
        return Value::Array(parts);
    }

    if raw.is_empty() {
        return Value::Null;
    }

    if key == "date" {
        return match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) => Value::String(date.format("%Y-%m-%d").to_string()),
            Err(_) => Value::String(raw.to_string()),
        };
    }

    coerce_scalar(raw)
}

/// Numeric-looking text becomes a number; everything else stays a string.
pub fn coerce_scalar(raw: &str) -> Value {
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(Number::from(int));
    }
    if let Ok(float) = raw.parse::<f64>() {
        if let Some(number) = Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    Value::String(raw.to_string())
}

/// Match filter identifying the record an update/delete applies to.
/// Returns `None` when the input lacks the entity's identifying keys.
pub fn match_filter(entity: &str, input: &Map<String, Value>) -> Option<Map<String, Value>> {
    let keys: &[&str] = match entity {
        "recipes" => &["name"],
        "food_prices" => &["commodity", "market"],
        "ingredient_nutrition" => &["ingredient_name"],
        _ => return None,
    };

    let mut filter = Map::new();
    for key in keys {
        match input.get(*key) {
            Some(value) if !value.is_null() => {
                filter.insert(key.to_string(), value.clone());
            }
            _ => return None,
        }
    }
    Some(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs_with_numeric_coercion() {
        let input = parse_structured("name=Pasta, calories=400").expect("pairs expected");
        assert_eq!(input["name"], Value::String("Pasta".to_string()));
        assert_eq!(input["calories"], Value::Number(Number::from(400)));
    }

    #[test]
    fn test_quoted_values_keep_commas() {
        let input =
            parse_structured(r#"name="Soup, hearty", calories=250"#).expect("pairs expected");
        assert_eq!(input["name"], Value::String("Soup, hearty".to_string()));
        assert_eq!(input["calories"], Value::Number(Number::from(250)));
    }

    #[test]
    fn test_ingredient_list_becomes_array() {
        let input = parse_structured(r#"name=Stew, recipe_ingredient_parts="beef, carrot, onion""#)
            .expect("pairs expected");
        let parts = input["recipe_ingredient_parts"].as_array().expect("array");
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], Value::String("carrot".to_string()));
    }

    #[test]
    fn test_empty_value_is_null() {
        let input = parse_structured("name=Pasta, calories=").expect("pairs expected");
        assert!(input["calories"].is_null());
    }

    #[test]
    fn test_date_normalized() {
        let input = parse_structured("date=2024-03-15, market=Nairobi").expect("pairs expected");
        assert_eq!(input["date"], Value::String("2024-03-15".to_string()));
    }

    #[test]
    fn test_float_coercion() {
        let input = parse_structured("price=62.5").expect("pairs expected");
        assert_eq!(input["price"], serde_json::json!(62.5));
    }

    #[test]
    fn test_no_pairs_is_none() {
        assert!(parse_structured("just some text").is_none());
        assert!(parse_structured("= nothing").is_none());
    }

    #[test]
    fn test_match_filter_rules() {
        let input = parse_structured("commodity=Maize, market=Nairobi, field=price, value=70")
            .expect("pairs expected");
        let filter = match_filter("food_prices", &input).expect("filter expected");
        assert_eq!(filter.len(), 2);

        let missing = parse_structured("commodity=Maize, field=price, value=70").unwrap();
        assert!(match_filter("food_prices", &missing).is_none());
        assert!(match_filter("unknown_entity", &input).is_none());
    }
}
