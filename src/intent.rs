//! Intent routing over the lowercased user text.
//!
//! CRUD triggers live in one ordered, declarative table: first match wins,
//! and precedence is auditable by reading the table top to bottom.
//! Matching is keyword containment, like the rest of the router.

use crate::state::OperationKind;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use strsim::jaro_winkler;

/// Similarity threshold for fuzzy entity-name mentions.
const ENTITY_MATCH_THRESHOLD: f64 = 0.85;

/// One row of the CRUD trigger table.
pub struct TriggerRule {
    pub verbs: &'static [&'static str],
    pub noun: &'static str,
    pub entity: &'static str,
    pub operation: OperationKind,
    pub fields: &'static [&'static str],
    pub prompt: &'static str,
}

pub const TRIGGER_RULES: &[TriggerRule] = &[
    TriggerRule {
        verbs: &["add", "insert"],
        noun: "recipe",
        entity: "recipes",
        operation: OperationKind::Insert,
        fields: &[
            "name", "recipe_category", "recipe_ingredient_parts", "calories",
            "fat_g", "carbohydrate_g", "protein_g", "recipe_instructions",
        ],
        prompt: "Please enter values for: name, recipe_category, recipe_ingredient_parts, calories, fat_g, carbohydrate_g, protein_g, recipe_instructions",
    },
    TriggerRule {
        verbs: &["add", "insert"],
        noun: "price",
        entity: "food_prices",
        operation: OperationKind::Insert,
        fields: &[
            "countryiso3", "date", "market", "category", "commodity",
            "unit", "price", "usdprice",
        ],
        prompt: "Please enter values for: countryiso3, date, market, category, commodity, unit, price, usdprice",
    },
    TriggerRule {
        verbs: &["add", "insert"],
        noun: "nutrition",
        entity: "ingredient_nutrition",
        operation: OperationKind::Insert,
        fields: &[
            "ingredient_name", "food_category_id", "category_name",
            "portion_description", "gram_weight", "protein_g", "fat_g",
            "carbohydrate_g",
        ],
        prompt: "Please enter values for: ingredient_name, food_category_id, category_name, portion_description, gram_weight, protein_g, fat_g, carbohydrate_g",
    },
    TriggerRule {
        verbs: &["update", "modify", "change"],
        noun: "recipe",
        entity: "recipes",
        operation: OperationKind::Update,
        fields: &["name", "field", "value"],
        prompt: "Please enter: recipe name, field to update, and the new value.",
    },
    TriggerRule {
        verbs: &["update", "modify", "change"],
        noun: "price",
        entity: "food_prices",
        operation: OperationKind::Update,
        fields: &["commodity", "market", "field", "value"],
        prompt: "Please enter: commodity, market, field to update, and the new value.",
    },
    TriggerRule {
        verbs: &["update", "modify", "change"],
        noun: "nutrition",
        entity: "ingredient_nutrition",
        operation: OperationKind::Update,
        fields: &["ingredient_name", "field", "value"],
        prompt: "Please enter: ingredient name, field to update, and the new value.",
    },
    TriggerRule {
        verbs: &["delete", "remove"],
        noun: "recipe",
        entity: "recipes",
        operation: OperationKind::Delete,
        fields: &["name"],
        prompt: "Please enter the recipe name to delete:",
    },
    TriggerRule {
        verbs: &["delete", "remove"],
        noun: "price",
        entity: "food_prices",
        operation: OperationKind::Delete,
        fields: &["commodity", "market"],
        prompt: "Please enter: commodity and market to delete:",
    },
    TriggerRule {
        verbs: &["delete", "remove"],
        noun: "nutrition",
        entity: "ingredient_nutrition",
        operation: OperationKind::Delete,
        fields: &["ingredient_name"],
        prompt: "Please enter the ingredient name to delete:",
    },
];

/// First trigger rule whose verb and noun both appear in the text.
pub fn match_trigger(uq: &str) -> Option<&'static TriggerRule> {
    TRIGGER_RULES
        .iter()
        .find(|rule| rule.verbs.iter().any(|verb| uq.contains(verb)) && uq.contains(rule.noun))
}

const COLLECTION_KEYWORDS: [&str; 4] = ["table", "tables", "collection", "collections"];
const LISTING_KEYWORDS: [&str; 5] = ["what", "list", "show", "see", "available"];

/// The introspection intent needs both a listing keyword and a
/// collection/table keyword.
pub fn is_introspection(uq: &str) -> bool {
    COLLECTION_KEYWORDS.iter().any(|k| uq.contains(k))
        && LISTING_KEYWORDS.iter().any(|k| uq.contains(k))
}

lazy_static! {
    static ref FIELDS_OF_RE: Regex =
        Regex::new(r"(?:fields|attributes|schema) of (\w+)").expect("valid regex");
    static ref WORD_RE: Regex = Regex::new(r"\w+").expect("valid regex");

    /// Country names appearing in food-price questions, mapped to the ISO3
    /// codes stored in `food_prices.countryiso3`.
    static ref COUNTRY_ISO3: HashMap<&'static str, &'static str> = {
        let mut countries = HashMap::new();
        countries.insert("afghanistan", "AFG");
        countries.insert("bangladesh", "BGD");
        countries.insert("burundi", "BDI");
        countries.insert("cameroon", "CMR");
        countries.insert("chad", "TCD");
        countries.insert("ethiopia", "ETH");
        countries.insert("ghana", "GHA");
        countries.insert("haiti", "HTI");
        countries.insert("india", "IND");
        countries.insert("iraq", "IRQ");
        countries.insert("kenya", "KEN");
        countries.insert("lebanon", "LBN");
        countries.insert("malawi", "MWI");
        countries.insert("mali", "MLI");
        countries.insert("mozambique", "MOZ");
        countries.insert("myanmar", "MMR");
        countries.insert("niger", "NER");
        countries.insert("nigeria", "NGA");
        countries.insert("pakistan", "PAK");
        countries.insert("rwanda", "RWA");
        countries.insert("senegal", "SEN");
        countries.insert("somalia", "SOM");
        countries.insert("sudan", "SDN");
        countries.insert("syria", "SYR");
        countries.insert("uganda", "UGA");
        countries.insert("ukraine", "UKR");
        countries.insert("yemen", "YEM");
        countries.insert("zambia", "ZMB");
        countries.insert("zimbabwe", "ZWE");
        countries
    };
}

/// `fields of recipes` style mention; returns the named entity.
pub fn fields_of(uq: &str) -> Option<String> {
    FIELDS_OF_RE
        .captures(uq)
        .map(|captures| captures[1].to_string())
}

/// Entity named in an introspection question, if any. Containment and
/// singular/plural checks first, then a fuzzy token pass for near-miss
/// spellings.
pub fn named_entity_mention(uq: &str, entities: &[String]) -> Option<String> {
    let mut cleaned = uq.to_string();
    for keyword in COLLECTION_KEYWORDS {
        cleaned = cleaned.replace(keyword, " ");
    }

    for entity in entities {
        let singular = entity.trim_end_matches('s');
        if cleaned.contains(entity.as_str()) || cleaned.contains(singular) {
            return Some(entity.clone());
        }
    }

    for token in WORD_RE.find_iter(&cleaned) {
        for entity in entities {
            if jaro_winkler(token.as_str(), entity) >= ENTITY_MATCH_THRESHOLD {
                return Some(entity.clone());
            }
        }
    }

    None
}

/// Resolve a loosely spelled entity mention against the live entity list.
pub fn resolve_entity(mention: &str, entities: &[String]) -> Option<String> {
    let mention = mention.trim().to_lowercase();
    for entity in entities {
        if *entity == mention || entity.trim_end_matches('s') == mention.trim_end_matches('s') {
            return Some(entity.clone());
        }
    }
    entities
        .iter()
        .find(|entity| jaro_winkler(&mention, entity) >= ENTITY_MATCH_THRESHOLD)
        .cloned()
}

/// Rewrite country names to the ISO3 codes stored in the price data.
/// Short tokens are skipped so words like `is` or `id` stay untouched.
pub fn preprocess_country_names(text: &str) -> String {
    let mut result = text.to_string();
    for token in WORD_RE.find_iter(&text.to_lowercase()) {
        if token.as_str().len() < 4 {
            continue;
        }
        if let Some(iso3) = COUNTRY_ISO3.get(token.as_str()) {
            let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(token.as_str())))
                .expect("escaped pattern is valid");
            result = pattern.replace_all(&result, *iso3).to_string();
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_add_recipe() {
        let rule = match_trigger("add recipe").expect("trigger expected");
        assert_eq!(rule.entity, "recipes");
        assert_eq!(rule.operation, OperationKind::Insert);
        assert!(rule.fields.contains(&"name"));
        assert!(rule.fields.contains(&"recipe_category"));
    }

    #[test]
    fn test_trigger_verbs_and_noun_both_required() {
        assert!(match_trigger("delete the price entry").is_some());
        assert!(match_trigger("tell me about prices").is_none());
        assert!(match_trigger("delete something").is_none());
    }

    #[test]
    fn test_trigger_order_is_declared_order() {
        // "add recipe and price" hits the recipes rule first.
        let rule = match_trigger("add recipe and price").expect("trigger expected");
        assert_eq!(rule.entity, "recipes");
    }

    #[test]
    fn test_introspection_needs_both_keyword_kinds() {
        assert!(is_introspection("what tables are available"));
        assert!(is_introspection("show me the collections"));
        assert!(!is_introspection("tables"));
        assert!(!is_introspection("show me recipes"));
    }

    #[test]
    fn test_named_entity_mention() {
        let entities = vec![
            "recipes".to_string(),
            "ingredient_nutrition".to_string(),
            "food_prices".to_string(),
        ];
        assert_eq!(
            named_entity_mention("show the recipes collection", &entities),
            Some("recipes".to_string())
        );
        assert_eq!(
            named_entity_mention("what collections are there", &entities),
            None
        );
    }

    #[test]
    fn test_fields_of_pattern() {
        assert_eq!(fields_of("fields of recipes"), Some("recipes".to_string()));
        assert_eq!(fields_of("schema of food_prices"), Some("food_prices".to_string()));
        assert_eq!(fields_of("what fields exist"), None);
    }

    #[test]
    fn test_country_rewrite() {
        assert_eq!(
            preprocess_country_names("maize price in Kenya"),
            "maize price in KEN"
        );
        // Short ambiguous words are never rewritten.
        assert_eq!(preprocess_country_names("what is this"), "what is this");
    }

    #[test]
    fn test_resolve_entity_fuzzy() {
        let entities = vec!["recipes".to_string(), "food_prices".to_string()];
        assert_eq!(resolve_entity("recipe", &entities), Some("recipes".to_string()));
        assert_eq!(resolve_entity("recipies", &entities), Some("recipes".to_string()));
        assert_eq!(resolve_entity("unrelated", &entities), None);
    }
}
