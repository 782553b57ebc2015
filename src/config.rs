//! Service configuration, loaded from the environment at startup.

use std::env;
use std::fmt;

use crate::error::{Result, SyncError};

/// One monitored stream and the checkpoint identity this consumer uses on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Name of the durable log stream.
    pub name: String,
    /// Subscriber name identifying this consumer's cursor on the stream.
    pub subscriber_name: String,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Kafka brokers (comma-separated).
    pub brokers: String,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Close connections idle for longer than this.
    pub idle_timeout_secs: u64,
    /// Maximum lifetime of a connection, to retire stale ones.
    pub max_lifetime_secs: u64,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("max_lifetime_secs", &self.max_lifetime_secs)
            .finish()
    }
}

/// Creation arguments applied when a stream is declared on the transport.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Leader placement policy requested at stream creation.
    pub leader_locator: String,
    /// Maximum retained bytes before the transport truncates the stream.
    pub max_length_bytes: i64,
    /// Maximum on-disk segment size.
    pub max_segment_bytes: i64,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub kafka: KafkaConfig,
    pub database: DatabaseConfig,
    pub streams: Vec<StreamConfig>,
    pub retention: RetentionConfig,
    /// Recycle downstream-store connections every this many applied messages.
    pub maintenance_interval: u64,
    /// Retries per stream setup step before the runner gives up on its stream.
    pub setup_max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            kafka: KafkaConfig {
                brokers: "localhost:9092".to_string(),
            },
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 10,
                min_connections: 2,
                acquire_timeout_secs: 10,
                idle_timeout_secs: 600,
                max_lifetime_secs: 1800,
            },
            streams: vec![
                StreamConfig {
                    name: "main_stream".to_string(),
                    subscriber_name: "warehouse_main_sub1".to_string(),
                },
                StreamConfig {
                    name: "inventory_stream".to_string(),
                    subscriber_name: "warehouse_inventory_sub2".to_string(),
                },
            ],
            retention: RetentionConfig {
                leader_locator: "least-leaders".to_string(),
                max_length_bytes: 1_000_000_000,
                max_segment_bytes: 100_000_000,
            },
            maintenance_interval: 100,
            setup_max_retries: 3,
        }
    }
}

impl SyncConfig {
    /// Build the configuration from environment variables, falling back to
    /// defaults for everything except `DATABASE_URL`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| SyncError::Config("DATABASE_URL environment variable not set".into()))?;

        let streams = match env::var("SYNC_STREAMS") {
            Ok(raw) => parse_stream_list(&raw)?,
            Err(_) => defaults.streams,
        };

        Ok(Self {
            kafka: KafkaConfig {
                brokers: env::var("KAFKA_BROKERS").unwrap_or(defaults.kafka.brokers),
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: env_or("DB_MAX_CONNECTIONS", defaults.database.max_connections),
                min_connections: env_or("DB_MIN_CONNECTIONS", defaults.database.min_connections),
                acquire_timeout_secs: env_or(
                    "DB_ACQUIRE_TIMEOUT_SECS",
                    defaults.database.acquire_timeout_secs,
                ),
                idle_timeout_secs: env_or(
                    "DB_IDLE_TIMEOUT_SECS",
                    defaults.database.idle_timeout_secs,
                ),
                max_lifetime_secs: env_or(
                    "DB_MAX_LIFETIME_SECS",
                    defaults.database.max_lifetime_secs,
                ),
            },
            streams,
            retention: RetentionConfig {
                leader_locator: env::var("STREAM_LEADER_LOCATOR")
                    .unwrap_or(defaults.retention.leader_locator),
                max_length_bytes: env_or(
                    "STREAM_MAX_LENGTH_BYTES",
                    defaults.retention.max_length_bytes,
                ),
                max_segment_bytes: env_or(
                    "STREAM_MAX_SEGMENT_BYTES",
                    defaults.retention.max_segment_bytes,
                ),
            },
            maintenance_interval: env_or(
                "SYNC_MAINTENANCE_INTERVAL",
                defaults.maintenance_interval,
            )
            .max(1),
            setup_max_retries: env_or("SYNC_SETUP_MAX_RETRIES", defaults.setup_max_retries),
        })
    }

    pub fn log_config(&self) {
        tracing::info!(
            "Sync configuration: brokers={}, streams={}, maintenance_interval={}, \
             max_length_bytes={}, max_segment_bytes={}",
            self.kafka.brokers,
            self.streams
                .iter()
                .map(|s| format!("{}:{}", s.name, s.subscriber_name))
                .collect::<Vec<_>>()
                .join(","),
            self.maintenance_interval,
            self.retention.max_length_bytes,
            self.retention.max_segment_bytes,
        );
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse `SYNC_STREAMS`: comma-separated `stream:subscriber` pairs.
fn parse_stream_list(raw: &str) -> Result<Vec<StreamConfig>> {
    let mut streams = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, subscriber) = entry.split_once(':').ok_or_else(|| {
            SyncError::Config(format!(
                "Invalid SYNC_STREAMS entry '{entry}', expected stream:subscriber"
            ))
        })?;
        if name.is_empty() || subscriber.is_empty() {
            return Err(SyncError::Config(format!(
                "Invalid SYNC_STREAMS entry '{entry}', empty stream or subscriber"
            )));
        }
        streams.push(StreamConfig {
            name: name.to_string(),
            subscriber_name: subscriber.to_string(),
        });
    }
    if streams.is_empty() {
        return Err(SyncError::Config("SYNC_STREAMS resolved to no streams".into()));
    }
    Ok(streams)
}
