//! CDC sync pipeline.
//!
//! Consumes change-data-capture events from durable log streams and
//! applies them idempotently to the local read model.
//!
//! # Architecture
//! - **Payload**: recovers a JSON document from a raw, possibly framed buffer
//! - **Envelope**: the decoded CDC message and canonical change event
//! - **Mapping**: static table-to-entity transformation rules
//! - **Transform**: field renaming and encoded-value coercion
//! - **Applier**: idempotent upsert/delete against the entity store
//! - **Runner**: per-stream consume-transform-apply-checkpoint loop
//! - **Pool**: one runner per configured stream, supervised together
//!
//! # Guarantees
//! - At-least-once delivery: a cursor is advanced only after the message
//!   was applied (or deliberately skipped), never speculatively
//! - Failure isolation: a bad field degrades to a raw field, a bad message
//!   is skipped or redelivered, a bad stream never stops its siblings

pub mod applier;
pub mod envelope;
pub mod mapping;
pub mod payload;
pub mod pool;
pub mod runner;
pub mod transform;

pub use applier::{ApplyOutcome, SyncApplier};
pub use envelope::{CdcEnvelope, CdcOperation, ChangeEvent};
pub use mapping::{EntityMapping, MappingRegistry};
pub use pool::ConsumerPool;
pub use runner::StreamRunner;
pub use transform::EventTransformer;
