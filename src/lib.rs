//! catalog-sync-service
//!
//! Ingests change-data-capture events from durable log streams and
//! maintains the local catalog read model: payload recovery, schema-aware
//! field mapping, idempotent application, and per-stream offset
//! checkpointing with resume-on-restart.

pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod transport;
