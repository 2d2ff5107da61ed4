//! In-process document store.
//!
//! Plays the document-database role in demos and doubles as the test
//! backend. Filters support equality, the `$gt/$gte/$lt/$lte/$ne`
//! comparison operators, and dotted-path lookups into sub-documents.

use crate::backend::{Record, StorageBackend};
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, Vec<Record>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend with the three known entities registered but empty.
    pub fn with_entities(entities: &[&str]) -> Self {
        let backend = Self::new();
        {
            let mut collections = backend.collections.write().expect("lock poisoned");
            for entity in entities {
                collections.insert(entity.to_string(), Vec::new());
            }
        }
        backend
    }

    /// Small demo dataset for interactive use without a real database.
    pub fn demo() -> Self {
        let backend = Self::with_entities(&["recipes", "ingredient_nutrition", "food_prices"]);
        let docs = [
            (
                "recipes",
                r#"{"name": "Pasta Primavera", "recipecategory": "Main", "calories": 420,
                    "proteincontent": 12, "recipeingredientparts": ["pasta", "zucchini", "tomato"]}"#,
            ),
            (
                "recipes",
                r#"{"name": "Lentil Soup", "recipecategory": "Soup", "calories": 310,
                    "proteincontent": 18, "recipeingredientparts": ["lentils", "carrot", "onion"]}"#,
            ),
            (
                "ingredient_nutrition",
                r#"{"ingredient_name": "Lentils", "category_name": "Legumes", "energy_kcal": 116,
                    "protein_g": 9.0, "carbohydrate_g": 20.1, "fat_g": 0.4}"#,
            ),
            (
                "food_prices",
                r#"{"countryiso3": "KEN", "date": "2024-03-15", "market": "Nairobi",
                    "category": "cereals and tubers", "commodity": "Maize", "unit": "KG",
                    "price": 62.0, "usdprice": 0.48}"#,
            ),
        ];

        {
            let mut collections = backend.collections.write().expect("lock poisoned");
            for (entity, doc) in docs {
                let record: Record =
                    serde_json::from_str(doc).expect("demo document is valid JSON");
                collections
                    .entry(entity.to_string())
                    .or_default()
                    .push(record);
            }
        }
        backend
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn list_entities(&self) -> Result<Vec<String>> {
        let collections = lock_read(&self.collections)?;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn sample(&self, entity: &str) -> Result<Option<Record>> {
        let collections = lock_read(&self.collections)?;
        Ok(collections
            .get(entity)
            .and_then(|records| records.first().cloned()))
    }

    async fn find(&self, entity: &str, filter: &Record, limit: Option<i64>) -> Result<Vec<Record>> {
        let collections = lock_read(&self.collections)?;
        let records = collections
            .get(entity)
            .ok_or_else(|| AssistantError::Execution(format!("Unknown collection `{}`", entity)))?;

        let mut matched: Vec<Record> = records
            .iter()
            .filter(|record| matches_filter(record, filter))
            .cloned()
            .collect();

        if let Some(limit) = limit {
            matched.truncate(limit.max(0) as usize);
        }
        Ok(matched)
    }

    async fn insert(&self, entity: &str, record: Record) -> Result<Record> {
        let mut collections = lock_write(&self.collections)?;
        collections
            .entry(entity.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn update_field(
        &self,
        entity: &str,
        filter: &Record,
        field: &str,
        value: Value,
    ) -> Result<u64> {
        let mut collections = lock_write(&self.collections)?;
        let records = collections
            .get_mut(entity)
            .ok_or_else(|| AssistantError::Execution(format!("Unknown collection `{}`", entity)))?;

        let mut changed = 0;
        for record in records.iter_mut() {
            if matches_filter(record, filter) && record.get(field) != Some(&value) {
                record.insert(field.to_string(), value.clone());
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete(&self, entity: &str, filter: &Record) -> Result<u64> {
        let mut collections = lock_write(&self.collections)?;
        let records = collections
            .get_mut(entity)
            .ok_or_else(|| AssistantError::Execution(format!("Unknown collection `{}`", entity)))?;

        let before = records.len();
        records.retain(|record| !matches_filter(record, filter));
        Ok((before - records.len()) as u64)
    }
}

fn lock_read<'a, T>(lock: &'a RwLock<T>) -> Result<std::sync::RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|_| AssistantError::Execution("Storage lock poisoned".to_string()))
}

fn lock_write<'a, T>(lock: &'a RwLock<T>) -> Result<std::sync::RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|_| AssistantError::Execution("Storage lock poisoned".to_string()))
}

fn matches_filter(record: &Record, filter: &Record) -> bool {
    filter.iter().all(|(key, condition)| {
        let actual = lookup_path(record, key);
        match condition {
            Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                ops.iter().all(|(op, expected)| {
                    actual.map_or(false, |a| compare(op, a, expected))
                })
            }
            _ => actual == Some(condition),
        }
    })
}

/// Resolve a possibly dotted key against nested sub-documents.
fn lookup_path<'a>(record: &'a Record, key: &str) -> Option<&'a Value> {
    let mut current: Option<&Value> = None;
    for part in key.split('.') {
        current = match current {
            None => record.get(part),
            Some(Value::Object(map)) => map.get(part),
            _ => return None,
        };
        current?;
    }
    current
}

fn compare(op: &str, actual: &Value, expected: &Value) -> bool {
    if op == "$ne" {
        return actual != expected;
    }

    let ordering = match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };

    match (op, ordering) {
        ("$gt", Some(ord)) => ord == std::cmp::Ordering::Greater,
        ("$gte", Some(ord)) => ord != std::cmp::Ordering::Less,
        ("$lt", Some(ord)) => ord == std::cmp::Ordering::Less,
        ("$lte", Some(ord)) => ord != std::cmp::Ordering::Greater,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: &str) -> Record {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_find_equality_and_operators() {
        let backend = MemoryBackend::new();
        backend
            .insert("recipes", record(r#"{"name": "A", "calories": 300}"#))
            .await
            .unwrap();
        backend
            .insert("recipes", record(r#"{"name": "B", "calories": 600}"#))
            .await
            .unwrap();

        let by_name = backend
            .find("recipes", &record(r#"{"name": "A"}"#), None)
            .await
            .unwrap();
        assert_eq!(by_name.len(), 1);

        let light = backend
            .find("recipes", &record(r#"{"calories": {"$lt": 500}}"#), None)
            .await
            .unwrap();
        assert_eq!(light.len(), 1);
        assert_eq!(light[0]["name"], "A");
    }

    #[tokio::test]
    async fn test_dotted_path_lookup() {
        let backend = MemoryBackend::new();
        backend
            .insert(
                "recipes",
                record(r#"{"name": "A", "nutrition": {"protein_g": 12}}"#),
            )
            .await
            .unwrap();

        let found = backend
            .find("recipes", &record(r#"{"nutrition.protein_g": 12}"#), None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_collection_errors() {
        let backend = MemoryBackend::new();
        let err = backend
            .find("ghosts", &Record::new(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghosts"));
    }

    #[tokio::test]
    async fn test_update_and_delete_counts() {
        let backend = MemoryBackend::new();
        backend
            .insert("recipes", record(r#"{"name": "A", "calories": 300}"#))
            .await
            .unwrap();

        let changed = backend
            .update_field(
                "recipes",
                &record(r#"{"name": "A"}"#),
                "calories",
                serde_json::json!(350),
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);

        // Identical value counts as no change.
        let unchanged = backend
            .update_field(
                "recipes",
                &record(r#"{"name": "A"}"#),
                "calories",
                serde_json::json!(350),
            )
            .await
            .unwrap();
        assert_eq!(unchanged, 0);

        let deleted = backend
            .delete("recipes", &record(r#"{"name": "A"}"#))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
    }
}
