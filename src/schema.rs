//! Schema introspection: a live sample record unioned with static defaults.
//!
//! Introspection fails soft. A retrieval error degrades to the default
//! field set, so validation and insert flows for the known entities keep
//! working against an empty or unreachable collection.

use crate::backend::StorageBackend;
use itertools::Itertools;
use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};
use tracing::warn;

pub const KNOWN_ENTITIES: [&str; 3] = ["recipes", "ingredient_nutrition", "food_prices"];

lazy_static! {
    /// Fallback field allow-list per known entity. Always a subset of the
    /// effective valid set.
    static ref FIELD_DEFAULTS: HashMap<&'static str, &'static [&'static str]> = {
        let mut defaults: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        defaults.insert("recipes", &[
            "name", "recipecategory", "recipeingredientparts", "calories",
            "fatcontent", "carbohydratecontent", "proteincontent", "recipeinstructions",
            "aggregatedrating", "reviewcount",
        ]);
        defaults.insert("ingredient_nutrition", &[
            "fdc_id", "ingredient_name", "food_category_id", "category_name",
            "portion_description", "gram_weight", "calcium_mg", "carbohydrate_g",
            "energy_kcal", "energy_kj", "fiber_g", "folate_ug", "iron_mg",
            "magnesium_mg", "potassium_mg", "protein_g", "sodium_mg", "fat_g",
            "vitamin_a_rae_ug", "vitamin_b12_ug", "vitamin_c_ascorbic_ug",
            "vitamin_d_ug", "zinc_mg",
        ]);
        defaults.insert("food_prices", &[
            "countryiso3", "date", "market", "category", "commodity",
            "unit", "price", "usdprice",
        ]);
        defaults
    };
}

/// The static default field set for an entity; empty for unknown entities.
pub fn default_fields(entity: &str) -> HashSet<String> {
    FIELD_DEFAULTS
        .get(entity)
        .map(|fields| fields.iter().map(|f| f.to_string()).collect())
        .unwrap_or_default()
}

/// Valid fields for an entity: sample record keys unioned with defaults.
pub async fn valid_fields(backend: &dyn StorageBackend, entity: &str) -> HashSet<String> {
    let mut fields = default_fields(entity);

    match backend.sample(entity).await {
        Ok(Some(record)) => fields.extend(record.keys().cloned()),
        Ok(None) => {}
        Err(e) => {
            warn!("Sample fetch failed for `{}`, using defaults: {}", entity, e);
        }
    }

    fields
}

/// One-entity summary used by the introspection intent.
pub async fn describe(backend: &dyn StorageBackend, entity: &str) -> String {
    let fields = valid_fields(backend, entity).await;
    if fields.is_empty() {
        format!("Collection: `{}` (no fields found)", entity)
    } else {
        format!(
            "Collection: `{}`\nFields: {}",
            entity,
            fields.iter().sorted().join(", ")
        )
    }
}

/// Summary of every entity the backend serves.
pub async fn describe_all(backend: &dyn StorageBackend) -> String {
    let entities = entity_names(backend).await;
    let mut sections = Vec::new();
    for entity in &entities {
        sections.push(describe(backend, entity).await);
    }
    sections.join("\n\n")
}

/// Schema text substituted into the language-model prompts.
pub async fn schema_context(backend: &dyn StorageBackend) -> String {
    describe_all(backend).await
}

/// Entity list, falling back to the known entities when the backend cannot
/// be asked.
pub async fn entity_names(backend: &dyn StorageBackend) -> Vec<String> {
    match backend.list_entities().await {
        Ok(entities) if !entities.is_empty() => entities,
        Ok(_) => KNOWN_ENTITIES.iter().map(|e| e.to_string()).collect(),
        Err(e) => {
            warn!("Listing entities failed, using known entities: {}", e);
            KNOWN_ENTITIES.iter().map(|e| e.to_string()).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Record, StorageBackend};
    use crate::error::{AssistantError, Result};
    use async_trait::async_trait;
    use serde_json::Value;

    struct BrokenBackend;

    #[async_trait]
    impl StorageBackend for BrokenBackend {
        async fn list_entities(&self) -> Result<Vec<String>> {
            Err(AssistantError::Execution("connection refused".to_string()))
        }
        async fn sample(&self, _entity: &str) -> Result<Option<Record>> {
            Err(AssistantError::Execution("connection refused".to_string()))
        }
        async fn find(&self, _: &str, _: &Record, _: Option<i64>) -> Result<Vec<Record>> {
            Err(AssistantError::Execution("connection refused".to_string()))
        }
        async fn insert(&self, _: &str, _: Record) -> Result<Record> {
            Err(AssistantError::Execution("connection refused".to_string()))
        }
        async fn update_field(&self, _: &str, _: &Record, _: &str, _: Value) -> Result<u64> {
            Err(AssistantError::Execution("connection refused".to_string()))
        }
        async fn delete(&self, _: &str, _: &Record) -> Result<u64> {
            Err(AssistantError::Execution("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_defaults_are_subset_of_valid_fields() {
        let backend = MemoryBackend::demo();
        for entity in KNOWN_ENTITIES {
            let valid = valid_fields(&backend, entity).await;
            for field in default_fields(entity) {
                assert!(valid.contains(&field), "{} missing {}", entity, field);
            }
        }
    }

    #[tokio::test]
    async fn test_introspection_fails_soft() {
        let valid = valid_fields(&BrokenBackend, "recipes").await;
        assert_eq!(valid, default_fields("recipes"));
        assert!(!valid.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_entity_may_be_empty() {
        let backend = MemoryBackend::new();
        let valid = valid_fields(&backend, "mystery").await;
        assert!(valid.is_empty());
    }

    #[tokio::test]
    async fn test_sample_keys_extend_defaults() {
        let backend = MemoryBackend::with_entities(&["recipes"]);
        backend
            .insert(
                "recipes",
                serde_json::from_str(r#"{"name": "A", "secret_note": "x"}"#).unwrap(),
            )
            .await
            .unwrap();

        let valid = valid_fields(&backend, "recipes").await;
        assert!(valid.contains("secret_note"));
        assert!(valid.contains("recipecategory"));
    }
}
