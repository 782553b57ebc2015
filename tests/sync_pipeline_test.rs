//! End-to-end pipeline tests over a scripted in-memory transport.
//!
//! The stub transport plays pre-recorded raw frames through real runners,
//! so these tests exercise payload recovery, transformation, application
//! and offset checkpointing together, including restart/redelivery
//! behavior driven by the stored cursors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, mpsc};

use catalog_sync_service::config::{StreamConfig, SyncConfig};
use catalog_sync_service::db::{EntityKind, EntityStore, MemoryEntityStore};
use catalog_sync_service::error::{Result, SyncError};
use catalog_sync_service::services::sync::{ConsumerPool, MappingRegistry};
use catalog_sync_service::transport::{
    RawMessage, StartPosition, StreamSpec, StreamSubscription, StreamTransport,
};

// --- scripted transport -------------------------------------------------

struct StubTransport {
    scripts: HashMap<String, Vec<RawMessage>>,
    offsets: Mutex<HashMap<(String, String), i64>>,
    ensured: Mutex<Vec<StreamSpec>>,
    starts: Mutex<HashMap<String, StartPosition>>,
    /// When set, subscriptions stay open after the script is drained, so
    /// runners only exit on shutdown.
    hold_open: bool,
    open_senders: Mutex<Vec<mpsc::UnboundedSender<RawMessage>>>,
}

impl StubTransport {
    fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            offsets: Mutex::new(HashMap::new()),
            ensured: Mutex::new(Vec::new()),
            starts: Mutex::new(HashMap::new()),
            hold_open: false,
            open_senders: Mutex::new(Vec::new()),
        }
    }

    fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    fn with_stream(mut self, name: &str, frames: Vec<RawMessage>) -> Self {
        self.scripts.insert(name.to_string(), frames);
        self
    }

    fn seed_offset(&self, stream: &str, subscriber: &str, offset: i64) {
        self.offsets
            .lock()
            .unwrap()
            .insert((stream.to_string(), subscriber.to_string()), offset);
    }

    fn committed(&self, stream: &str, subscriber: &str) -> Option<i64> {
        self.offsets
            .lock()
            .unwrap()
            .get(&(stream.to_string(), subscriber.to_string()))
            .copied()
    }

    fn start_for(&self, stream: &str) -> Option<StartPosition> {
        self.starts.lock().unwrap().get(stream).copied()
    }

    fn ensured_specs(&self) -> Vec<StreamSpec> {
        self.ensured.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamTransport for StubTransport {
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<()> {
        self.ensured.lock().unwrap().push(spec.clone());
        Ok(())
    }

    async fn query_offset(&self, stream: &str, subscriber: &str) -> Result<Option<i64>> {
        Ok(self.committed(stream, subscriber))
    }

    async fn store_offset(&self, stream: &str, subscriber: &str, offset: i64) -> Result<()> {
        self.seed_offset(stream, subscriber, offset);
        Ok(())
    }

    async fn subscribe(
        &self,
        stream: &str,
        _subscriber: &str,
        start: StartPosition,
    ) -> Result<Box<dyn StreamSubscription>> {
        self.starts
            .lock()
            .unwrap()
            .insert(stream.to_string(), start);

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(frames) = self.scripts.get(stream) {
            for frame in frames {
                let deliver = match start {
                    StartPosition::Beginning => true,
                    StartPosition::Offset(from) => frame.offset >= from,
                };
                if deliver {
                    let _ = tx.send(frame.clone());
                }
            }
        }
        if self.hold_open {
            self.open_senders.lock().unwrap().push(tx);
        }
        Ok(Box::new(StubSubscription { rx }))
    }
}

struct StubSubscription {
    rx: mpsc::UnboundedReceiver<RawMessage>,
}

#[async_trait]
impl StreamSubscription for StubSubscription {
    async fn next(&mut self) -> Result<Option<RawMessage>> {
        Ok(self.rx.recv().await)
    }
}

// --- failure-injecting store --------------------------------------------

struct FlakyStore {
    inner: Arc<MemoryEntityStore>,
    upsert_failures_left: AtomicU32,
}

impl FlakyStore {
    fn failing_upserts(inner: Arc<MemoryEntityStore>, failures: u32) -> Self {
        Self {
            inner,
            upsert_failures_left: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn upsert(
        &self,
        kind: EntityKind,
        id: &str,
        attributes: &Map<String, Value>,
    ) -> Result<()> {
        if self
            .upsert_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
        {
            return Err(SyncError::Database("injected upsert failure".into()));
        }
        self.inner.upsert(kind, id, attributes).await
    }

    async fn delete_by_id(&self, kind: EntityKind, id: &str) -> Result<bool> {
        self.inner.delete_by_id(kind, id).await
    }

    async fn find_by_id(&self, kind: EntityKind, id: &str) -> Result<Option<Value>> {
        self.inner.find_by_id(kind, id).await
    }
}

// --- fixtures ------------------------------------------------------------

fn cdc_frame(table: &str, op: &str, image: Value, offset: i64) -> RawMessage {
    let (before, after) = if op == "d" {
        (image, Value::Null)
    } else {
        (Value::Null, image)
    };
    let body = json!({
        "source": {"table": table},
        "op": op,
        "before": before,
        "after": after
    });
    RawMessage {
        payload: serde_json::to_vec(&body).unwrap(),
        offset,
    }
}

/// Wrap a frame's JSON body in binary protocol noise.
fn with_framing_noise(mut message: RawMessage) -> RawMessage {
    let mut payload = vec![0x00, 0x9d, 0x07];
    payload.append(&mut message.payload);
    payload.extend_from_slice(&[0xff, 0x00]);
    message.payload = payload;
    message
}

fn encode_cents(cents: u32) -> String {
    general_purpose::STANDARD.encode(cents.to_be_bytes())
}

fn stream(name: &str, subscriber: &str) -> StreamConfig {
    StreamConfig {
        name: name.to_string(),
        subscriber_name: subscriber.to_string(),
    }
}

fn test_config() -> SyncConfig {
    SyncConfig {
        maintenance_interval: 2,
        ..SyncConfig::default()
    }
}

async fn run_to_completion(
    transport: Arc<dyn StreamTransport>,
    store: Arc<dyn EntityStore>,
    streams: Vec<StreamConfig>,
) {
    let pool = ConsumerPool::new(
        transport,
        store,
        Arc::new(MappingRegistry::catalog()),
        test_config(),
    );
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    tokio::time::timeout(Duration::from_secs(5), pool.start(streams, shutdown_tx))
        .await
        .expect("pool did not stop after scripts drained");
}

// --- tests ---------------------------------------------------------------

#[tokio::test]
async fn create_flows_end_to_end_through_framing_noise() {
    let transport = Arc::new(StubTransport::new().with_stream(
        "main_stream",
        vec![with_framing_noise(cdc_frame(
            "Stores",
            "c",
            json!({
                "id": "store-1",
                "brand": 4,
                "city": "Riga",
                "latitude": encode_cents(12345),
                "created_at": 1700000000
            }),
            0,
        ))],
    ));
    let store = Arc::new(MemoryEntityStore::new());

    run_to_completion(
        Arc::clone(&transport) as Arc<dyn StreamTransport>,
        Arc::clone(&store) as Arc<dyn EntityStore>,
        vec![stream("main_stream", "sub1")],
    )
    .await;

    let entity = store
        .find_by_id(EntityKind::Store, "store-1")
        .await
        .unwrap()
        .expect("store entity not materialized");
    assert_eq!(entity.get("brand_id"), Some(&json!(4)));
    assert_eq!(entity.get("latitude"), Some(&json!(123.45)));
    assert_eq!(entity.get("created_at"), None);

    assert_eq!(transport.committed("main_stream", "sub1"), Some(0));

    let specs = transport.ensured_specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].name, "main_stream");
    assert_eq!(specs[0].max_length_bytes, 1_000_000_000);
    assert_eq!(specs[0].max_segment_bytes, 100_000_000);
}

#[tokio::test]
async fn resumes_after_last_committed_offset() {
    let frames = (0..=3)
        .map(|offset| {
            cdc_frame(
                "Products",
                "c",
                json!({"id": offset, "title": format!("p{offset}")}),
                offset,
            )
        })
        .collect();
    let transport = Arc::new(StubTransport::new().with_stream("main_stream", frames));
    transport.seed_offset("main_stream", "sub1", 1);

    let store = Arc::new(MemoryEntityStore::new());
    run_to_completion(
        Arc::clone(&transport) as Arc<dyn StreamTransport>,
        Arc::clone(&store) as Arc<dyn EntityStore>,
        vec![stream("main_stream", "sub1")],
    )
    .await;

    // Restart resumes at K+1: offsets 0 and 1 are never redelivered.
    assert_eq!(
        transport.start_for("main_stream"),
        Some(StartPosition::Offset(2))
    );
    assert_eq!(store.count(EntityKind::Product), 2);
    assert!(store
        .find_by_id(EntityKind::Product, "2")
        .await
        .unwrap()
        .is_some());
    assert!(store
        .find_by_id(EntityKind::Product, "0")
        .await
        .unwrap()
        .is_none());
    assert_eq!(transport.committed("main_stream", "sub1"), Some(3));
}

#[tokio::test]
async fn fresh_subscriber_starts_from_the_beginning() {
    let transport = Arc::new(StubTransport::new().with_stream(
        "main_stream",
        vec![cdc_frame("Units", "r", json!({"id": 1, "title": "Litre"}), 0)],
    ));
    let store = Arc::new(MemoryEntityStore::new());

    run_to_completion(
        Arc::clone(&transport) as Arc<dyn StreamTransport>,
        Arc::clone(&store) as Arc<dyn EntityStore>,
        vec![stream("main_stream", "sub1")],
    )
    .await;

    assert_eq!(
        transport.start_for("main_stream"),
        Some(StartPosition::Beginning)
    );
    // Snapshot reads apply like creates.
    assert_eq!(store.count(EntityKind::Unit), 1);
}

#[tokio::test]
async fn apply_failure_withholds_offset_until_redelivery_succeeds() {
    let frames = vec![cdc_frame(
        "Products",
        "c",
        json!({"id": 1, "title": "Cola"}),
        0,
    )];
    let transport = Arc::new(StubTransport::new().with_stream("main_stream", frames));
    let inner = Arc::new(MemoryEntityStore::new());
    let flaky = Arc::new(FlakyStore::failing_upserts(Arc::clone(&inner), 1));

    run_to_completion(
        Arc::clone(&transport) as Arc<dyn StreamTransport>,
        Arc::clone(&flaky) as Arc<dyn EntityStore>,
        vec![stream("main_stream", "sub1")],
    )
    .await;

    // First delivery failed: no mutation, no checkpoint.
    assert_eq!(inner.count(EntityKind::Product), 0);
    assert_eq!(transport.committed("main_stream", "sub1"), None);

    // Restart: no stored cursor, so the same message is redelivered and
    // the now-healthy store applies it.
    run_to_completion(
        Arc::clone(&transport) as Arc<dyn StreamTransport>,
        Arc::clone(&flaky) as Arc<dyn EntityStore>,
        vec![stream("main_stream", "sub1")],
    )
    .await;

    assert_eq!(inner.count(EntityKind::Product), 1);
    assert_eq!(transport.committed("main_stream", "sub1"), Some(0));
}

#[tokio::test]
async fn unknown_table_and_bad_frames_do_not_halt_the_stream() {
    let garbage = RawMessage {
        payload: b"binary noise without braces".to_vec(),
        offset: 0,
    };
    let not_json = RawMessage {
        payload: b"{definitely not json}".to_vec(),
        offset: 1,
    };
    let unknown = cdc_frame("Legacy_audit", "c", json!({"id": 1}), 2);
    let good = cdc_frame("Products", "c", json!({"id": 9, "title": "Kvass"}), 3);

    let transport = Arc::new(
        StubTransport::new().with_stream("main_stream", vec![garbage, not_json, unknown, good]),
    );
    let store = Arc::new(MemoryEntityStore::new());

    run_to_completion(
        Arc::clone(&transport) as Arc<dyn StreamTransport>,
        Arc::clone(&store) as Arc<dyn EntityStore>,
        vec![stream("main_stream", "sub1")],
    )
    .await;

    // Skipped messages write no checkpoints of their own; the cursor
    // reflects the one applied message.
    assert_eq!(store.count(EntityKind::Product), 1);
    assert_eq!(transport.committed("main_stream", "sub1"), Some(3));
}

#[tokio::test]
async fn delete_of_absent_entity_checkpoints_as_success() {
    let transport = Arc::new(StubTransport::new().with_stream(
        "inventory_stream",
        vec![cdc_frame("Inventory", "d", json!({"id": 404}), 5)],
    ));
    let store = Arc::new(MemoryEntityStore::new());

    run_to_completion(
        Arc::clone(&transport) as Arc<dyn StreamTransport>,
        Arc::clone(&store) as Arc<dyn EntityStore>,
        vec![stream("inventory_stream", "sub2")],
    )
    .await;

    assert_eq!(transport.committed("inventory_stream", "sub2"), Some(5));
}

#[tokio::test]
async fn two_streams_apply_independently() {
    let transport = Arc::new(
        StubTransport::new()
            .with_stream(
                "main_stream",
                vec![cdc_frame(
                    "Products",
                    "c",
                    json!({"id": 1, "title": "Cola"}),
                    3,
                )],
            )
            .with_stream(
                "inventory_stream",
                vec![cdc_frame("Inventory", "d", json!({"id": 7}), 9)],
            ),
    );
    let store = Arc::new(MemoryEntityStore::new());
    store
        .upsert(
            EntityKind::Inventory,
            "7",
            json!({"id": 7, "quantity": 2}).as_object().unwrap(),
        )
        .await
        .unwrap();

    run_to_completion(
        Arc::clone(&transport) as Arc<dyn StreamTransport>,
        Arc::clone(&store) as Arc<dyn EntityStore>,
        vec![
            stream("main_stream", "warehouse_main_sub1"),
            stream("inventory_stream", "warehouse_inventory_sub2"),
        ],
    )
    .await;

    assert_eq!(store.count(EntityKind::Product), 1);
    assert_eq!(store.count(EntityKind::Inventory), 0);

    // Each cursor reflects only its own stream's offsets.
    assert_eq!(
        transport.committed("main_stream", "warehouse_main_sub1"),
        Some(3)
    );
    assert_eq!(
        transport.committed("inventory_stream", "warehouse_inventory_sub2"),
        Some(9)
    );
    assert_eq!(
        transport.committed("main_stream", "warehouse_inventory_sub2"),
        None
    );
}

#[tokio::test]
async fn shutdown_signal_stops_held_open_runners() {
    let transport = Arc::new(
        StubTransport::new()
            .with_stream(
                "main_stream",
                vec![cdc_frame(
                    "Brands",
                    "c",
                    json!({"id": 1, "title": "Acme"}),
                    0,
                )],
            )
            .held_open(),
    );
    let store = Arc::new(MemoryEntityStore::new());

    let pool = Arc::new(ConsumerPool::new(
        Arc::clone(&transport) as Arc<dyn StreamTransport>,
        Arc::clone(&store) as Arc<dyn EntityStore>,
        Arc::new(MappingRegistry::catalog()),
        test_config(),
    ));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let pool_shutdown = shutdown_tx.clone();
    let running_pool = Arc::clone(&pool);
    let handle = tokio::spawn(async move {
        running_pool
            .start(vec![stream("main_stream", "sub1")], pool_shutdown)
            .await
    });

    // Wait for the in-flight message to be fully applied and checkpointed;
    // the applied counter only moves after the offset write.
    let mut waited = 0;
    while pool.applied_messages() == 0 {
        waited += 1;
        assert!(waited < 500, "message was never applied");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(transport.committed("main_stream", "sub1"), Some(0));

    shutdown_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("pool did not stop on shutdown signal")
        .unwrap();

    assert_eq!(store.count(EntityKind::Brand), 1);
}
