//! End-to-end offline behaviour across the request queue, engine and agent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use fairway_core::{Collection, HttpMethod, Operation, RequestOptions};
use fairway_store::{FileStore, LocalStore, MemoryStore};
use fairway_sync::{
    AgentConfig, ApiClient, ApiSettings, EventBus, HttpRequest, HttpResponse, HttpTransport,
    MemoryRemoteStore, NetworkMonitor, ReplySource, SyncAgent, SyncEngine, SyncEvent,
    SyncSettings, TransportError,
};

fn bookings() -> Collection {
    Collection::new("bookings").unwrap()
}

fn sync_settings() -> SyncSettings {
    SyncSettings {
        collections: vec![bookings()],
        max_retries: 1,
        base_retry_delay_ms: 0,
        max_retry_delay_ms: 0,
        ..Default::default()
    }
}

async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn offline_changes_flush_when_back_online() {
    let events = EventBus::new();
    let network = NetworkMonitor::new(false, events.clone());
    let remote = MemoryRemoteStore::new();
    let engine = SyncEngine::builder(sync_settings())
        .store(Arc::new(MemoryStore::new()))
        .remote(Arc::new(remote.clone()))
        .network(network.clone())
        .events(events.clone())
        .build()
        .unwrap();

    let c = bookings();
    engine
        .track_change(&c, Operation::Create, json!({"bay": 1, "player": "Ana"}), None)
        .await
        .unwrap();
    engine
        .track_change(&c, Operation::Create, json!({"bay": 2, "player": "Kofi"}), None)
        .await
        .unwrap();
    assert_eq!(engine.status().await.pending_total(), 2);

    let agent = SyncAgent::spawn(
        AgentConfig {
            interval: Duration::from_secs(3600),
            realtime: false,
        },
        engine.clone(),
        None,
        &network,
    );
    network.set_online(true);

    let flushed = wait_until(|| {
        let engine = engine.clone();
        async move { engine.status().await.pending_total() == 0 }
    })
    .await;
    assert!(flushed);
    assert_eq!(remote.len(&c), 2);
    assert_eq!(engine.local_documents(&c).await.unwrap().len(), 2);

    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn exhausted_change_is_dead_lettered_exactly_once() {
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let network = NetworkMonitor::new(false, events.clone());
    let remote = MemoryRemoteStore::new();
    remote.set_available(false);

    let engine = SyncEngine::builder(sync_settings())
        .store(Arc::new(MemoryStore::new()))
        .remote(Arc::new(remote.clone()))
        .network(network.clone())
        .events(events.clone())
        .build()
        .unwrap();

    engine
        .track_change(&bookings(), Operation::Update, json!({"id": "b1", "bay": 3}), None)
        .await
        .unwrap();
    network.set_online(true);

    for _ in 0..4 {
        engine.sync_pending_changes().await.unwrap();
    }

    assert!(engine.pending_changes(None).await.is_empty());
    let failed = engine.failed_changes().await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].change.data["id"], json!("b1"));

    let mut dead_letters = 0;
    while let Ok(event) = rx.try_recv() {
        if let SyncEvent::ChangeFailed { .. } = event {
            dead_letters += 1;
        }
    }
    assert_eq!(dead_letters, 1);
}

#[tokio::test]
async fn pending_state_survives_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let network = NetworkMonitor::new(false, EventBus::new());

    {
        let engine = SyncEngine::builder(sync_settings())
            .store(Arc::new(FileStore::open(dir.path()).unwrap()))
            .network(network.clone())
            .build()
            .unwrap();
        engine
            .track_change(&bookings(), Operation::Delete, json!({"id": "b7"}), None)
            .await
            .unwrap();
    }

    let remote = MemoryRemoteStore::new();
    remote.put(&bookings(), json!({"id": "b7", "bay": 1}));
    let engine = SyncEngine::builder(sync_settings())
        .store(Arc::new(FileStore::open(dir.path()).unwrap()))
        .remote(Arc::new(remote.clone()))
        .network(network.clone())
        .build()
        .unwrap();
    assert_eq!(engine.pending_changes(None).await.len(), 1);

    network.set_online(true);
    let report = engine.sync_all().await.unwrap();
    assert_eq!(report.push.synced, 1);
    assert!(remote.get(&bookings(), "b7").is_none());
}

/// Answers every request with 200 and counts calls.
#[derive(Default)]
struct EchoTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl HttpTransport for EchoTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HttpResponse::new(200, json!({"echo": request.url})))
    }
}

#[tokio::test]
async fn queued_requests_drain_on_reconnect() {
    let events = EventBus::new();
    let network = NetworkMonitor::new(false, events.clone());
    let transport = Arc::new(EchoTransport::default());
    let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
    let api = ApiClient::builder(ApiSettings {
        base_url: Some("https://pos.example.com/api/".into()),
        ..Default::default()
    })
    .transport(transport.clone())
    .store(store.clone())
    .network(network.clone())
    .events(events.clone())
    .build()
    .unwrap();

    let reply = api
        .post("tabs/12/items", json!({"sku": "BEER-1"}), RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(reply.source, ReplySource::Queued);
    let reply = api
        .request("DELETE", "tabs/12/items/3", None, RequestOptions::default())
        .await
        .unwrap();
    assert!(reply.is_queued());
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);

    let queued = api.pending_requests();
    assert_eq!(queued[0].method, HttpMethod::Post);
    assert_eq!(queued[1].method, HttpMethod::Delete);

    let engine = SyncEngine::builder(sync_settings())
        .store(store)
        .remote(Arc::new(MemoryRemoteStore::new()))
        .network(network.clone())
        .build()
        .unwrap();
    let agent = SyncAgent::spawn(
        AgentConfig {
            interval: Duration::from_secs(3600),
            realtime: false,
        },
        engine,
        Some(api.clone()),
        &network,
    );
    network.set_online(true);

    let drained = wait_until(|| {
        let api = api.clone();
        async move { api.queue_len() == 0 }
    })
    .await;
    assert!(drained);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);

    agent.shutdown().await.unwrap();
}
