use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Error taxonomy for the CDC sync pipeline.
///
/// Containment policy: field-level failures stay inside the transformer,
/// message-level failures stay inside the runner loop, and only stream
/// setup failures stop a runner. Nothing here ever crosses to another
/// stream's runner.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Raw frame carries no recoverable JSON body (no `{` or no `}`).
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Recovered slice is not valid JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Single-field decode failure; the field is left raw and mapping continues.
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Apply error: {0}")]
    Apply(String),

    /// Fatal for one stream only; moves its runner to Stopped.
    #[error("Stream setup error: {0}")]
    StreamSetup(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<rdkafka::error::KafkaError> for SyncError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        SyncError::Transport(err.to_string())
    }
}
