//! In-memory entity store, used by the test suite and for local runs
//! without Postgres.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};

use super::{EntityKind, EntityStore};
use crate::error::Result;

#[derive(Default)]
pub struct MemoryEntityStore {
    records: DashMap<(EntityKind, String), Map<String, Value>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored for a kind.
    pub fn count(&self, kind: EntityKind) -> usize {
        self.records.iter().filter(|e| e.key().0 == kind).count()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn upsert(
        &self,
        kind: EntityKind,
        id: &str,
        attributes: &Map<String, Value>,
    ) -> Result<()> {
        self.records
            .insert((kind, id.to_string()), attributes.clone());
        Ok(())
    }

    async fn delete_by_id(&self, kind: EntityKind, id: &str) -> Result<bool> {
        Ok(self.records.remove(&(kind, id.to_string())).is_some())
    }

    async fn find_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<Value>> {
        Ok(self
            .records
            .get(&(kind, id.to_string()))
            .map(|r| Value::Object(r.value().clone())))
    }
}
