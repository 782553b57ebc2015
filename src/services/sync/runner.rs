//! Per-stream consume loop: read, recover, transform, apply, checkpoint.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::applier::SyncApplier;
use super::envelope::CdcEnvelope;
use super::payload::{frame_excerpt, recover_payload};
use super::transform::EventTransformer;
use crate::config::StreamConfig;
use crate::db::EntityStore;
use crate::error::{Result, SyncError};
use crate::transport::{RawMessage, StartPosition, StreamSpec, StreamTransport};

const FRAME_EXCERPT_LEN: usize = 256;
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunnerState {
    Initializing,
    Subscribing,
    Running,
    Degraded,
    Stopped,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunnerState::Initializing => "initializing",
            RunnerState::Subscribing => "subscribing",
            RunnerState::Running => "running",
            RunnerState::Degraded => "degraded",
            RunnerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Owns one subscription to one stream and drives it until shutdown.
///
/// A single message's failure never terminates the stream: decode and
/// mapping misses are skipped, apply failures withhold the cursor and
/// rely on redelivery, and transport receive errors back off and retry.
/// Only setup failure (after retries) stops the runner, and then only
/// this runner.
pub struct StreamRunner {
    config: StreamConfig,
    spec: StreamSpec,
    transport: Arc<dyn StreamTransport>,
    transformer: EventTransformer,
    applier: SyncApplier,
    store: Arc<dyn EntityStore>,
    /// Shared across runners; owned by the pool.
    applied_counter: Arc<AtomicU64>,
    maintenance_interval: u64,
    setup_max_retries: u32,
    state: RunnerState,
}

impl StreamRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: StreamConfig,
        spec: StreamSpec,
        transport: Arc<dyn StreamTransport>,
        transformer: EventTransformer,
        applier: SyncApplier,
        store: Arc<dyn EntityStore>,
        applied_counter: Arc<AtomicU64>,
        maintenance_interval: u64,
        setup_max_retries: u32,
    ) -> Self {
        Self {
            config,
            spec,
            transport,
            transformer,
            applier,
            store,
            applied_counter,
            maintenance_interval,
            setup_max_retries,
            state: RunnerState::Initializing,
        }
    }

    /// Drive the stream until the transport closes it or shutdown is
    /// signalled. Setup failures are consumed here; the caller only
    /// observes task completion.
    pub async fn run(mut self, shutdown: broadcast::Receiver<()>) {
        if let Err(e) = self.run_inner(shutdown).await {
            error!(
                stream = %self.config.name,
                error = %e,
                "Stream runner stopped: setup failed"
            );
        }
        self.set_state(RunnerState::Stopped);
        info!(stream = %self.config.name, "Stream runner stopped");
    }

    async fn run_inner(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let transport = Arc::clone(&self.transport);

        // Initializing: declare the stream; an existing one is fine.
        let spec = self.spec.clone();
        self.with_setup_retries("create stream", || {
            let transport = Arc::clone(&transport);
            let spec = spec.clone();
            async move { transport.ensure_stream(&spec).await }
        })
        .await?;

        // Subscribing: resume after the last committed cursor, or from the
        // beginning when this subscriber has never checkpointed.
        self.set_state(RunnerState::Subscribing);
        let stream = self.config.name.clone();
        let subscriber = self.config.subscriber_name.clone();

        let committed = self
            .with_setup_retries("query offset", || {
                let transport = Arc::clone(&transport);
                let stream = stream.clone();
                let subscriber = subscriber.clone();
                async move { transport.query_offset(&stream, &subscriber).await }
            })
            .await?;

        let start = match committed {
            Some(offset) => {
                info!(
                    stream = %stream,
                    subscriber = %subscriber,
                    offset,
                    "Resuming after last committed offset"
                );
                StartPosition::Offset(offset + 1)
            }
            None => {
                info!(
                    stream = %stream,
                    subscriber = %subscriber,
                    "No committed offset, starting from the beginning"
                );
                StartPosition::Beginning
            }
        };

        let mut subscription = self
            .with_setup_retries("subscribe", || {
                let transport = Arc::clone(&transport);
                let stream = stream.clone();
                let subscriber = subscriber.clone();
                async move { transport.subscribe(&stream, &subscriber, start).await }
            })
            .await?;

        self.set_state(RunnerState::Running);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(stream = %self.config.name, "Shutdown signal received, stopping runner");
                    break;
                }
                next = subscription.next() => match next {
                    Ok(Some(message)) => {
                        self.set_state(RunnerState::Running);
                        self.handle_message(&message).await;
                    }
                    Ok(None) => {
                        info!(stream = %self.config.name, "Subscription closed by transport");
                        break;
                    }
                    Err(e) => {
                        self.set_state(RunnerState::Degraded);
                        error!(
                            stream = %self.config.name,
                            error = %e,
                            "Transport receive error, backing off"
                        );
                        tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                    }
                }
            }
        }

        Ok(())
    }

    /// Process one raw message. The cursor advances only when an event was
    /// produced and applied (or deliberately skipped); every other path
    /// leaves it untouched so redelivery can retry.
    async fn handle_message(&mut self, message: &RawMessage) {
        let value = match recover_payload(&message.payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    stream = %self.config.name,
                    offset = message.offset,
                    error = %e,
                    payload = %frame_excerpt(&message.payload, FRAME_EXCERPT_LEN),
                    "Unrecoverable frame, skipping message"
                );
                return;
            }
        };

        let envelope: CdcEnvelope = match serde_json::from_value(value) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    stream = %self.config.name,
                    offset = message.offset,
                    error = %e,
                    payload = %frame_excerpt(&message.payload, FRAME_EXCERPT_LEN),
                    "Payload is not a CDC envelope, skipping message"
                );
                return;
            }
        };

        let event = match self
            .transformer
            .build_change_event(&envelope, message.offset)
        {
            Some(event) => event,
            // The transformer already logged why there is nothing to apply.
            None => return,
        };

        let outcome = self.applier.apply(&event).await;
        if !outcome.advances_cursor() {
            warn!(
                stream = %self.config.name,
                offset = message.offset,
                table = %event.source_table,
                "Apply failed, offset withheld for redelivery"
            );
            return;
        }

        if let Err(e) = self
            .transport
            .store_offset(&self.config.name, &self.config.subscriber_name, message.offset)
            .await
        {
            self.set_state(RunnerState::Degraded);
            error!(
                stream = %self.config.name,
                offset = message.offset,
                error = %e,
                "Failed to store offset, message may be redelivered"
            );
            return;
        }

        debug!(
            stream = %self.config.name,
            offset = message.offset,
            "Offset stored after successful apply"
        );

        self.note_applied().await;
    }

    /// Periodic maintenance: recycle downstream connections every
    /// `maintenance_interval` applied messages, counted across all runners.
    async fn note_applied(&self) {
        let applied = self.applied_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if applied % self.maintenance_interval == 0 {
            debug!(applied, "Recycling downstream-store connections");
            if let Err(e) = self.store.recycle().await {
                warn!(error = %e, "Connection recycle failed");
            }
        }
    }

    async fn with_setup_retries<T, F, Fut>(&self, step: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.setup_max_retries => {
                    attempt += 1;
                    let backoff_secs = 2u64.pow(attempt.min(5));
                    warn!(
                        stream = %self.config.name,
                        step,
                        attempt,
                        backoff_secs,
                        error = %e,
                        "Stream setup step failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                }
                Err(e) => {
                    return Err(SyncError::StreamSetup(format!(
                        "{step} for stream {}: {e}",
                        self.config.name
                    )))
                }
            }
        }
    }

    fn set_state(&mut self, next: RunnerState) {
        if self.state != next {
            debug!(
                stream = %self.config.name,
                from = %self.state,
                to = %next,
                "Runner state change"
            );
            self.state = next;
        }
    }
}
