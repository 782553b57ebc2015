//! Field mapping and type coercion: turns a recovered CDC envelope into
//! the canonical change event the applier consumes.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::envelope::{CdcEnvelope, ChangeEvent};
use super::mapping::MappingRegistry;
use crate::error::{Result, SyncError};

const MICROS_PER_HOUR: i64 = 3_600_000_000;
const MICROS_PER_MINUTE: i64 = 60_000_000;
const MICROS_PER_SECOND: i64 = 1_000_000;

pub struct EventTransformer {
    registry: Arc<MappingRegistry>,
}

impl EventTransformer {
    pub fn new(registry: Arc<MappingRegistry>) -> Self {
        Self { registry }
    }

    /// Build the canonical change event for an envelope read at `offset`.
    ///
    /// Returns `None` when there is nothing to apply: the operation's row
    /// image is absent or empty, or the table is not in the mapping
    /// registry (schemas evolve independently of this consumer, so an
    /// unmapped table is expected, not an error).
    pub fn build_change_event(&self, envelope: &CdcEnvelope, offset: i64) -> Option<ChangeEvent> {
        let table = envelope.table();
        let operation = envelope.operation();

        let image = match envelope.row_image() {
            Some(image) => image,
            None => {
                debug!(
                    table,
                    operation = %operation,
                    offset,
                    "No row image for operation, nothing to apply"
                );
                return None;
            }
        };

        let mapping = match self.registry.get(table) {
            Some(mapping) => mapping,
            None => {
                warn!(table, offset, "Unmapped source table, skipping event");
                return None;
            }
        };

        let mut attributes = Map::with_capacity(image.len());
        for (key, value) in image {
            if MappingRegistry::is_ignored(key) {
                continue;
            }
            attributes.insert(mapping.target_field(key).to_string(), value.clone());
        }

        // Per-field decoding is best effort: a failure leaves the raw value
        // in place and never aborts the event.
        for field in mapping.cents_fields() {
            let Some(value) = attributes.get(field) else {
                continue;
            };
            if is_blank(value) {
                continue;
            }
            match decode_cents(value) {
                Ok(decoded) => {
                    attributes.insert(field.to_string(), decoded);
                }
                Err(e) => warn!(
                    table,
                    field,
                    offset,
                    error = %e,
                    "Failed to decode fixed-point field, leaving raw value"
                ),
            }
        }

        for field in mapping.duration_fields() {
            let Some(value) = attributes.get(field) else {
                continue;
            };
            if is_blank(value) {
                continue;
            }
            match decode_duration(value) {
                Ok(decoded) => {
                    attributes.insert(field.to_string(), decoded);
                }
                Err(e) => warn!(
                    table,
                    field,
                    offset,
                    error = %e,
                    "Failed to decode duration field, leaving raw value"
                ),
            }
        }

        Some(ChangeEvent {
            source_table: table.to_string(),
            operation,
            attributes,
            offset,
        })
    }
}

/// Unset per the feed's conventions: null, empty string, zero, or false.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Bool(b) => !b,
        _ => false,
    }
}

/// Decode a base64 string of big-endian bytes holding a cent amount into
/// its decimal value.
fn decode_cents(value: &Value) -> Result<Value> {
    let text = value
        .as_str()
        .ok_or_else(|| SyncError::Encoding("expected a base64 string".into()))?;

    let bytes = general_purpose::STANDARD
        .decode(text)
        .map_err(|e| SyncError::Encoding(format!("base64: {e}")))?;

    if bytes.len() > 16 {
        return Err(SyncError::Encoding(format!(
            "{}-byte integer out of range",
            bytes.len()
        )));
    }

    let mut cents: u128 = 0;
    for byte in &bytes {
        cents = (cents << 8) | u128::from(*byte);
    }

    let decimal = cents as f64 / 100.0;
    serde_json::Number::from_f64(decimal)
        .map(Value::Number)
        .ok_or_else(|| SyncError::Encoding("non-finite decimal value".into()))
}

/// Render a microsecond count as zero-padded `HH:MM:SS`.
fn decode_duration(value: &Value) -> Result<Value> {
    let micros = value
        .as_i64()
        .ok_or_else(|| SyncError::Encoding("expected an integer microsecond count".into()))?;
    if micros < 0 {
        return Err(SyncError::Encoding(format!(
            "negative microsecond count: {micros}"
        )));
    }

    let hours = micros / MICROS_PER_HOUR;
    let minutes = (micros % MICROS_PER_HOUR) / MICROS_PER_MINUTE;
    let seconds = (micros % MICROS_PER_MINUTE) / MICROS_PER_SECOND;

    Ok(Value::String(format!(
        "{hours:02}:{minutes:02}:{seconds:02}"
    )))
}
