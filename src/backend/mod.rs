//! Storage backend capability interface.
//!
//! One orchestrator serves both the document-store and relational variants;
//! everything backend-specific sits behind this trait.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

pub mod memory;
pub mod postgres;

pub use memory::MemoryBackend;
pub use postgres::PgBackend;

/// One stored record, as a JSON object.
pub type Record = serde_json::Map<String, Value>;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Names of the entities (collections/tables) this backend serves.
    async fn list_entities(&self) -> Result<Vec<String>>;

    /// One representative record, used for schema introspection.
    async fn sample(&self, entity: &str) -> Result<Option<Record>>;

    /// Records matching an equality/operator filter. An empty filter matches
    /// everything.
    async fn find(&self, entity: &str, filter: &Record, limit: Option<i64>) -> Result<Vec<Record>>;

    /// Insert one record, returning it as stored.
    async fn insert(&self, entity: &str, record: Record) -> Result<Record>;

    /// Set one field on every record matching the filter; returns the number
    /// of records changed.
    async fn update_field(
        &self,
        entity: &str,
        filter: &Record,
        field: &str,
        value: Value,
    ) -> Result<u64>;

    /// Delete records matching the filter; returns the number removed.
    async fn delete(&self, entity: &str, filter: &Record) -> Result<u64>;
}
