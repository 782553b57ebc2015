//! Applies canonical change events to the entity store.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::envelope::ChangeEvent;
use super::mapping::MappingRegistry;
use crate::db::EntityStore;
use crate::error::{Result, SyncError};

const PAYLOAD_EXCERPT_LEN: usize = 256;

/// Result of applying one change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Durably committed to the store.
    Applied,
    /// Permanently inapplicable (no target entity kind for the table);
    /// retrying can never succeed, so the cursor still advances.
    Skipped,
    /// Store-level failure; the cursor is withheld so the message is
    /// reprocessed on redelivery.
    Failed,
}

impl ApplyOutcome {
    pub fn advances_cursor(&self) -> bool {
        !matches!(self, ApplyOutcome::Failed)
    }
}

pub struct SyncApplier {
    registry: Arc<MappingRegistry>,
    store: Arc<dyn EntityStore>,
}

impl SyncApplier {
    pub fn new(registry: Arc<MappingRegistry>, store: Arc<dyn EntityStore>) -> Self {
        Self { registry, store }
    }

    /// Apply one change event. Never panics and never propagates store
    /// errors; every failure path logs table, operation and a payload
    /// excerpt.
    pub async fn apply(&self, event: &ChangeEvent) -> ApplyOutcome {
        match self.apply_inner(event).await {
            Ok(()) => ApplyOutcome::Applied,
            Err(SyncError::UnknownTable(table)) => {
                warn!(
                    table = %table,
                    offset = event.offset,
                    "No target entity kind for table, skipping permanently"
                );
                ApplyOutcome::Skipped
            }
            Err(e) => {
                error!(
                    table = %event.source_table,
                    operation = %event.operation,
                    offset = event.offset,
                    payload = %attributes_excerpt(&event.attributes),
                    error = %e,
                    "Failed to apply change event"
                );
                ApplyOutcome::Failed
            }
        }
    }

    async fn apply_inner(&self, event: &ChangeEvent) -> Result<()> {
        let kind = self
            .registry
            .get(&event.source_table)
            .map(|mapping| mapping.kind)
            .ok_or_else(|| SyncError::UnknownTable(event.source_table.clone()))?;

        let id = entity_id(&event.attributes).ok_or_else(|| {
            SyncError::Apply("change event carries no usable id attribute".into())
        })?;

        if event.operation.is_upsert() {
            self.store.upsert(kind, &id, &event.attributes).await?;
            debug!(kind = %kind, id = %id, operation = %event.operation, "Upserted entity");
        } else if self.store.delete_by_id(kind, &id).await? {
            debug!(kind = %kind, id = %id, "Deleted entity");
        } else {
            // Already gone; deletes are idempotent.
            info!(kind = %kind, id = %id, "Delete for absent entity, treating as success");
        }

        Ok(())
    }
}

/// Primary identity of the target entity, taken from the row image.
fn entity_id(attributes: &Map<String, Value>) -> Option<String> {
    match attributes.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn attributes_excerpt(attributes: &Map<String, Value>) -> String {
    let rendered = Value::Object(attributes.clone()).to_string();
    if rendered.len() <= PAYLOAD_EXCERPT_LEN {
        return rendered;
    }
    let mut cut = PAYLOAD_EXCERPT_LEN;
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &rendered[..cut])
}
