//! # fairway-sync: Offline-First Sync Engine for Fairway POS
//!
//! Keeps a golf-venue POS usable without connectivity: mutations are recorded
//! locally, delivered when the network allows, and remote changes are merged
//! back into the local copies.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Fairway Sync Layer                              │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncAgent (background driver)                    │  │
//! │  │  interval tick • offline → online • sync_now • shutdown          │  │
//! │  └───────────────┬──────────────────────────────────┬───────────────┘  │
//! │                  │ sync_all                         │ drain            │
//! │                  ▼                                  ▼                  │
//! │  ┌────────────────────────────┐   ┌──────────────────────────────┐    │
//! │  │ SyncEngine                 │   │ ApiClient                    │    │
//! │  │ pending changes per entity │   │ dedup • timeout • retry      │    │
//! │  │ backoff + dead letters     │   │ GET cache • offline queue    │    │
//! │  │ pull + conflict policies   │   │ error taxonomy               │    │
//! │  │ live feeds, import/export  │   │                              │    │
//! │  └─────────────┬──────────────┘   └──────────────▲───────────────┘    │
//! │                │ RemoteStore                     │ HttpTransport      │
//! │  ┌─────────────▼──────────────┐   ┌──────────────┴───────────────┐    │
//! │  │ HttpRemoteStore ───────────┼──►│ ReqwestTransport             │    │
//! │  │ MemoryRemoteStore          │   └──────────────────────────────┘    │
//! │  └────────────────────────────┘                                        │
//! │                                                                         │
//! │  SHARED: EventBus (sync:*, queue:*, network:*) • NetworkMonitor         │
//! │          LocalStore (fairway-store) • SessionContext (auth headers)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `SyncAgent` periodic and reconnect driver
//! - [`cache`] - GET response cache with TTL classes
//! - [`config`] - `SyncConfig` (TOML + environment)
//! - [`engine`] - `SyncEngine` change tracking, push, pull, live feeds
//! - [`error`] - `SyncError`
//! - [`events`] - `SyncEvent` and `EventBus`
//! - [`http_remote`] - REST `RemoteStore` over `ApiClient`
//! - [`network`] - Online/offline state
//! - [`remote`] - `RemoteStore` trait, in-memory and unconfigured stores
//! - [`request_queue`] - `ApiClient` with the durable request queue
//! - [`session`] - Bearer token / operator headers
//! - [`transport`] - `HttpTransport` and the reqwest implementation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fairway_sync::{EventBus, NetworkMonitor, SyncConfig, SyncEngine};
//!
//! let config = SyncConfig::load_or_default(None);
//! let events = EventBus::new();
//! let network = NetworkMonitor::new(true, events.clone());
//!
//! let engine = SyncEngine::builder(config.sync.clone())
//!     .store(store)
//!     .remote(remote)
//!     .network(network.clone())
//!     .events(events.clone())
//!     .build()?;
//!
//! let bookings = "bookings".parse()?;
//! engine.track_change(&bookings, Operation::Create, json!({"bay": 4}), None).await?;
//! engine.sync_all().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod http_remote;
pub mod network;
pub mod remote;
pub mod request_queue;
pub mod session;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{AgentConfig, SyncAgent, SyncAgentHandle};
pub use cache::ResponseCache;
pub use config::{ApiSettings, DeviceConfig, StorageSettings, SyncConfig, SyncSettings};
pub use engine::{PushReport, SyncEngine, SyncEngineBuilder, SyncReport, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, SyncEvent};
pub use http_remote::HttpRemoteStore;
pub use network::NetworkMonitor;
pub use remote::{
    ChangeKind, MemoryRemoteStore, QueryFilter, RemoteChange, RemoteError, RemoteStore,
    Subscription, UnconfiguredRemote,
};
pub use request_queue::{ApiClient, ApiClientBuilder, ApiReply, ApiResult, QueueReport, ReplySource};
pub use session::{session_headers, AnonymousSession, OperatorSession, SessionContext};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
