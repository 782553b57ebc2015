//! Durable log transport abstraction.
//!
//! A stream is an append-only, offset-addressed log. The transport also
//! owns the per-(stream, subscriber) cursor storage: the pipeline queries
//! it on startup and writes it back after every successful apply, but
//! never implements it.

pub mod kafka;

use async_trait::async_trait;

use crate::error::Result;

pub use kafka::KafkaStreamTransport;

/// Creation arguments for a stream: declared as configuration, applied
/// when the stream is first ensured on the transport.
#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub name: String,
    /// Leader placement policy. Advisory; not every transport maps it.
    pub leader_locator: String,
    pub max_length_bytes: i64,
    pub max_segment_bytes: i64,
}

/// Where a new subscription starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// From the first retained message.
    Beginning,
    /// From this offset, inclusive.
    Offset(i64),
}

/// One raw delivery: an opaque frame plus its position in the stream.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub payload: Vec<u8>,
    pub offset: i64,
}

/// An open, ordered subscription to one stream.
#[async_trait]
pub trait StreamSubscription: Send {
    /// Next message in arrival order. `None` once the transport has closed
    /// the subscription.
    async fn next(&mut self) -> Result<Option<RawMessage>>;
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Create the stream with the given retention/sizing arguments if it
    /// does not already exist. An already-existing stream is success.
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<()>;

    /// Last committed cursor for (stream, subscriber), or `None` when the
    /// subscriber has never checkpointed.
    async fn query_offset(&self, stream: &str, subscriber: &str) -> Result<Option<i64>>;

    /// Durably record `offset` as the last applied message for
    /// (stream, subscriber).
    async fn store_offset(&self, stream: &str, subscriber: &str, offset: i64) -> Result<()>;

    /// Open an ordered subscription starting at `start`.
    async fn subscribe(
        &self,
        stream: &str,
        subscriber: &str,
        start: StartPosition,
    ) -> Result<Box<dyn StreamSubscription>>;
}
