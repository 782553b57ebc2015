use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// CDC operation codes as emitted by the replication connector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CdcOperation {
    /// Insert (c = create)
    #[serde(rename = "c")]
    Create,
    /// Initial table snapshot row (r = read); applied like a create.
    #[serde(rename = "r")]
    ReadSnapshot,
    /// Update (u)
    #[serde(rename = "u")]
    Update,
    /// Delete (d)
    #[serde(rename = "d")]
    Delete,
}

impl CdcOperation {
    /// Operations applied with upsert semantics.
    pub fn is_upsert(&self) -> bool {
        matches!(
            self,
            CdcOperation::Create | CdcOperation::ReadSnapshot | CdcOperation::Update
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CdcOperation::Create => "create",
            CdcOperation::ReadSnapshot => "read-snapshot",
            CdcOperation::Update => "update",
            CdcOperation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for CdcOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source metadata. Only the table name is contractual; the rest is
/// connector-dependent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcSource {
    pub table: String,

    #[serde(default)]
    pub db: Option<String>,

    #[serde(default)]
    pub schema: Option<String>,

    #[serde(default)]
    pub ts_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcBody {
    /// Row image before the change; populated for deletes.
    #[serde(default)]
    pub before: Option<Value>,

    /// Row image after the change; populated for creates and updates.
    #[serde(default)]
    pub after: Option<Value>,

    pub source: CdcSource,

    pub op: CdcOperation,

    #[serde(default)]
    pub ts_ms: Option<i64>,
}

/// CDC envelope as recovered from the wire.
///
/// Depending on converter settings the connector sends the body either
/// wrapped in a schema envelope or directly; both are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CdcEnvelope {
    WithSchema { payload: CdcBody },
    Flat(CdcBody),
}

impl CdcEnvelope {
    pub fn body(&self) -> &CdcBody {
        match self {
            CdcEnvelope::WithSchema { payload } => payload,
            CdcEnvelope::Flat(body) => body,
        }
    }

    pub fn table(&self) -> &str {
        &self.body().source.table
    }

    pub fn operation(&self) -> CdcOperation {
        self.body().op
    }

    /// Row image relevant to the operation: `before` for deletes, `after`
    /// otherwise. `None` when the image is absent, not an object, or empty.
    pub fn row_image(&self) -> Option<&Map<String, Value>> {
        let body = self.body();
        let image = match body.op {
            CdcOperation::Delete => body.before.as_ref(),
            _ => body.after.as_ref(),
        };
        image.and_then(Value::as_object).filter(|m| !m.is_empty())
    }
}

/// Canonical decoded unit of work: one transformed row change, consumed
/// exactly once by the applier and never persisted directly.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub source_table: String,
    pub operation: CdcOperation,
    /// Transformed attribute map: ignored fields dropped, renames applied,
    /// encoded values decoded.
    pub attributes: Map<String, Value>,
    /// Position of the originating message within its stream.
    pub offset: i64,
}
