//! # Durable Request Queue
//!
//! `ApiClient` wraps every outbound call with validation, deduplication,
//! caching, timeout/retry and transparent offline queueing.
//!
//! ## Request Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       ApiClient::request()                              │
//! │                                                                         │
//! │  validate method + URL ──► VALIDATION_ERROR                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  GET + cache? ── hit ──► reply (source: Cache)                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  !GET + offline + queue? ──► enqueue ──► reply (source: Queued)         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  in-flight map: identical method+url+body? ── yes ──► await same future │
//! │           │ no                                                          │
//! │           ▼                                                             │
//! │  attempt 0..=retries { timeout(send) }                                  │
//! │     2xx ──► cache (GET) / invalidate (mutations) ──► reply (Network)    │
//! │     4xx mapped ──► error, no retry                                      │
//! │     network-class after last attempt, !GET ──► enqueue (soft fail)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Offline Queue
//! - Bounded: beyond `max_queue_size` the oldest entry is evicted.
//! - Persisted whole under `fairway.pendingRequests` on every change.
//! - Entries older than the retention window are dropped on load.
//! - [`ApiClient::process_pending_queue`] drains strictly FIFO and stops at
//!   the first failure.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use url::Url;

use fairway_core::{ApiError, HttpMethod, QueuedRequest, RequestOptions};
use fairway_store::{keys, LocalStore, LocalStoreExt, StoreError};

use crate::cache::ResponseCache;
use crate::config::ApiSettings;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::network::NetworkMonitor;
use crate::session::{session_headers, AnonymousSession, SessionContext};
use crate::transport::{HttpRequest, HttpTransport};

// =============================================================================
// Reply Types
// =============================================================================

/// Where a successful reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Network,
    Cache,
    /// Not sent yet; stored in the offline queue.
    Queued,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiReply {
    pub data: Value,
    pub source: ReplySource,
    /// Queue entry id when `source` is `Queued`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_id: Option<String>,
}

impl ApiReply {
    fn network(data: Value) -> Self {
        ApiReply {
            data,
            source: ReplySource::Network,
            queued_id: None,
        }
    }

    fn cached(data: Value) -> Self {
        ApiReply {
            data,
            source: ReplySource::Cache,
            queued_id: None,
        }
    }

    fn queued(id: String) -> Self {
        ApiReply {
            data: Value::Null,
            source: ReplySource::Queued,
            queued_id: Some(id),
        }
    }

    pub fn is_queued(&self) -> bool {
        self.source == ReplySource::Queued
    }
}

/// Tagged result of every request. Expected failures never escape as panics
/// or other error types.
pub type ApiResult = Result<ApiReply, ApiError>;

/// Outcome of one queue drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub processed: usize,
    pub remaining: usize,
    /// The drain stopped at a failing entry.
    pub halted: bool,
}

// =============================================================================
// Effective Options
// =============================================================================

/// Per-call limits after clamping to the configured maximums.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Limits {
    timeout: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl Limits {
    fn clamp(settings: &ApiSettings, options: &RequestOptions) -> Self {
        let timeout_ms = options
            .timeout_ms
            .unwrap_or(settings.timeout_ms)
            .clamp(1, settings.max_timeout_ms.max(1));
        let retry_attempts = options
            .retry_attempts
            .unwrap_or(settings.retry_attempts)
            .min(settings.max_retry_attempts);
        let retry_delay_ms = options
            .retry_delay_ms
            .unwrap_or(settings.retry_delay_ms)
            .min(settings.max_retry_delay_ms);

        Limits {
            timeout: Duration::from_millis(timeout_ms),
            retry_attempts,
            retry_delay: Duration::from_millis(retry_delay_ms),
        }
    }
}

type InFlight = Shared<BoxFuture<'static, ApiResult>>;

// =============================================================================
// Api Client
// =============================================================================

struct ApiInner {
    settings: ApiSettings,
    base_url: Option<Url>,
    transport: Arc<dyn HttpTransport>,
    session: Arc<dyn SessionContext>,
    store: Arc<dyn LocalStore>,
    network: NetworkMonitor,
    events: EventBus,
    cache: ResponseCache,
    queue: Mutex<VecDeque<QueuedRequest>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    draining: AtomicBool,
}

/// Request layer handle. Cheap to clone; clones share queue, cache and
/// in-flight map.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiInner>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url.as_ref().map(Url::as_str))
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

/// Resets the drain flag when a drain ends, including by cancellation.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ApiClient {
    pub fn builder(settings: ApiSettings) -> ApiClientBuilder {
        ApiClientBuilder::new(settings)
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Issues a request. `method` is validated case-insensitively; relative
    /// URLs are joined to the configured base URL.
    pub async fn request(
        &self,
        method: &str,
        url: &str,
        data: Option<Value>,
        options: RequestOptions,
    ) -> ApiResult {
        let method: HttpMethod = method
            .parse()
            .map_err(|_| ApiError::validation(format!("unsupported HTTP method '{method}'")))?;
        let url = self.resolve_url(url)?;
        let url = url.as_str();

        if method.is_get() && options.cache && !options.bypass_cache {
            if let Some(hit) = self.inner.cache.get(url) {
                debug!(url, "Cache hit");
                return Ok(ApiReply::cached(hit));
            }
        }

        if !method.is_get() && options.queue && !self.inner.network.is_online() {
            let queued = self.enqueue(method, url, data, options);
            return Ok(ApiReply::queued(queued));
        }

        self.deduplicated(method, url.to_string(), data, options).await
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> ApiResult {
        self.request("GET", url, None, options).await
    }

    pub async fn post(&self, url: &str, data: Value, options: RequestOptions) -> ApiResult {
        self.request("POST", url, Some(data), options).await
    }

    pub async fn put(&self, url: &str, data: Value, options: RequestOptions) -> ApiResult {
        self.request("PUT", url, Some(data), options).await
    }

    pub async fn patch(&self, url: &str, data: Value, options: RequestOptions) -> ApiResult {
        self.request("PATCH", url, Some(data), options).await
    }

    pub async fn delete(&self, url: &str, options: RequestOptions) -> ApiResult {
        self.request("DELETE", url, None, options).await
    }

    /// Joins identical concurrent calls onto one network operation.
    async fn deduplicated(
        &self,
        method: HttpMethod,
        url: String,
        data: Option<Value>,
        options: RequestOptions,
    ) -> ApiResult {
        let body = data
            .as_ref()
            .map(|d| serde_json::to_string(d).unwrap_or_default())
            .unwrap_or_default();
        let key = format!("{method} {url} {body}");

        let shared = {
            let mut in_flight = lock(&self.inner.in_flight);
            match in_flight.get(&key) {
                Some(existing) => {
                    debug!(%method, url = %url, "Joining in-flight request");
                    existing.clone()
                }
                None => {
                    let client = self.clone();
                    let cleanup_key = key.clone();
                    let future = async move {
                        let result = client.execute(method, &url, data, &options).await;
                        lock(&client.inner.in_flight).remove(&cleanup_key);
                        result
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key, future.clone());
                    future
                }
            }
        };

        shared.await
    }

    /// Timeout/retry loop plus the soft-fail into the queue.
    async fn execute(
        &self,
        method: HttpMethod,
        url: &str,
        data: Option<Value>,
        options: &RequestOptions,
    ) -> ApiResult {
        match self.send_with_retry(method, url, data.clone(), options).await {
            Ok(body) => {
                if method.is_get() {
                    if options.cache {
                        let ttl = self.inner.settings.ttl(options.cache_ttl);
                        self.inner.cache.put(url, body.clone(), ttl);
                    }
                } else if let Some(ref pattern) = options.invalidate {
                    self.inner.cache.invalidate_matching(pattern);
                }
                Ok(ApiReply::network(body))
            }
            Err(err) if !method.is_get() && options.queue && err.is_retryable() => {
                warn!(%method, url, error = %err, "Request failed, queueing for later");
                let id = self.enqueue(method, url, data, options.clone());
                Ok(ApiReply::queued(id))
            }
            Err(err) => Err(err),
        }
    }

    async fn send_with_retry(
        &self,
        method: HttpMethod,
        url: &str,
        data: Option<Value>,
        options: &RequestOptions,
    ) -> Result<Value, ApiError> {
        let limits = Limits::clamp(&self.inner.settings, options);
        let request = HttpRequest {
            method,
            url: url.to_string(),
            headers: session_headers(self.inner.session.as_ref()),
            body: data,
        };

        let mut last_error = ApiError::network("request was not attempted");
        for attempt in 0..=limits.retry_attempts {
            if attempt > 0 {
                debug!(%method, url, attempt, "Retrying request");
                sleep(limits.retry_delay).await;
            }

            match timeout(limits.timeout, self.inner.transport.send(request.clone())).await {
                Ok(Ok(response)) if response.is_success() => return Ok(response.body),
                Ok(Ok(response)) => {
                    let err = ApiError::from_status(
                        response.status,
                        error_message(&response.body, response.status),
                    );
                    if !err.is_retryable() {
                        debug!(%method, url, status = response.status, "Request rejected");
                        return Err(err);
                    }
                    last_error = err;
                }
                Ok(Err(e)) => last_error = ApiError::network(e.to_string()),
                Err(_) => {
                    last_error = ApiError::network(format!(
                        "timed out after {} ms",
                        limits.timeout.as_millis()
                    ))
                }
            }
        }

        warn!(%method, url, error = %last_error, "Request failed after retries");
        Err(last_error)
    }

    fn resolve_url(&self, raw: &str) -> Result<Url, ApiError> {
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => match self.inner.base_url {
                Some(ref base) => base
                    .join(raw)
                    .map_err(|e| ApiError::validation(format!("invalid URL '{raw}': {e}")))?,
                None => {
                    return Err(ApiError::validation(format!(
                        "relative URL '{raw}' with no base URL configured"
                    )))
                }
            },
            Err(e) => return Err(ApiError::validation(format!("invalid URL '{raw}': {e}"))),
        };

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ApiError::validation(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }
        Ok(url)
    }

    // =========================================================================
    // Offline Queue
    // =========================================================================

    fn enqueue(
        &self,
        method: HttpMethod,
        url: &str,
        data: Option<Value>,
        options: RequestOptions,
    ) -> String {
        let entry = QueuedRequest::new(method, url, data, options, crate::now_millis());
        let id = entry.id.clone();

        {
            let mut queue = lock(&self.inner.queue);
            queue.push_back(entry);
            while queue.len() > self.inner.settings.max_queue_size {
                if let Some(evicted) = queue.pop_front() {
                    warn!(request_id = %evicted.id, url = %evicted.url, "Queue full, evicted oldest request");
                }
            }
            self.persist_queue(&queue);
        }

        info!(request_id = %id, %method, url, "Request queued");
        self.inner.events.emit(SyncEvent::Queued {
            request_id: id.clone(),
            method,
            url: url.to_string(),
        });
        id
    }

    fn persist_queue(&self, queue: &VecDeque<QueuedRequest>) {
        if let Err(e) = self.inner.store.save_json(keys::PENDING_REQUESTS, queue) {
            error!(?e, "Failed to persist request queue");
        }
    }

    /// Sends queued requests oldest first while online.
    ///
    /// Each success is removed and persisted immediately. The first failure
    /// stops the drain, leaving it and everything behind it queued in order.
    /// A drain already in progress makes this a no-op.
    pub async fn process_pending_queue(&self) -> QueueReport {
        if !self.inner.network.is_online() {
            debug!("Offline, not draining request queue");
            return QueueReport {
                remaining: self.queue_len(),
                ..Default::default()
            };
        }
        if self.inner.draining.swap(true, Ordering::AcqRel) {
            debug!("Request queue drain already running");
            return QueueReport {
                remaining: self.queue_len(),
                ..Default::default()
            };
        }
        let _guard = DrainGuard(&self.inner.draining);

        let pending = self.queue_len();
        if pending == 0 {
            return QueueReport::default();
        }
        info!(pending, "Draining request queue");
        self.inner
            .events
            .emit(SyncEvent::QueueProcessingStarted { pending });

        let mut report = QueueReport::default();
        loop {
            let Some(next) = lock(&self.inner.queue).front().cloned() else {
                break;
            };

            let options = next.options.clone().without_queue();
            let result = match self.resolve_url(&next.url) {
                Ok(url) => {
                    self.execute(next.method, url.as_str(), next.data.clone(), &options)
                        .await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(_) => {
                    let mut queue = lock(&self.inner.queue);
                    queue.retain(|r| r.id != next.id);
                    self.persist_queue(&queue);
                    report.processed += 1;
                    debug!(request_id = %next.id, "Queued request delivered");
                }
                Err(e) => {
                    warn!(request_id = %next.id, error = %e, "Queued request failed, halting drain");
                    report.halted = true;
                    break;
                }
            }
        }

        report.remaining = self.queue_len();
        info!(
            processed = report.processed,
            remaining = report.remaining,
            "Request queue drain finished"
        );
        self.inner.events.emit(SyncEvent::QueueProcessingCompleted {
            processed: report.processed,
            remaining: report.remaining,
        });
        report
    }

    /// Snapshot of the queue, oldest first.
    pub fn pending_requests(&self) -> Vec<QueuedRequest> {
        lock(&self.inner.queue).iter().cloned().collect()
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// Drops every queued request. Returns how many were dropped.
    pub fn clear_pending_queue(&self) -> usize {
        let mut queue = lock(&self.inner.queue);
        let dropped = queue.len();
        queue.clear();
        self.persist_queue(&queue);
        info!(dropped, "Request queue cleared");
        dropped
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }
}

/// Best human-readable message in an error body.
fn error_message(body: &Value, status: u16) -> String {
    ["message", "error"]
        .iter()
        .find_map(|field| body.get(field).and_then(Value::as_str))
        .map(str::to_string)
        .or_else(|| body.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {status}"))
}

/// Parses the API base. A trailing `/` keeps relative paths below it;
/// `Url::join` would otherwise replace its last segment.
fn parse_base_url(raw: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Loads the persisted queue, dropping expired entries and the oldest beyond
/// the bound.
fn load_queue(
    store: &dyn LocalStore,
    settings: &ApiSettings,
    now: i64,
) -> Result<(VecDeque<QueuedRequest>, bool), StoreError> {
    let stored: Vec<QueuedRequest> = store.load_json(keys::PENDING_REQUESTS)?.unwrap_or_default();
    let total = stored.len();

    let mut queue: VecDeque<QueuedRequest> = stored
        .into_iter()
        .filter(|r| !r.is_expired(now, settings.queue_retention_ms))
        .collect();
    while queue.len() > settings.max_queue_size {
        queue.pop_front();
    }

    let dropped = total - queue.len();
    if dropped > 0 {
        info!(dropped, "Discarded expired queued requests");
    }
    Ok((queue, dropped > 0))
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    settings: ApiSettings,
    transport: Option<Arc<dyn HttpTransport>>,
    session: Option<Arc<dyn SessionContext>>,
    store: Option<Arc<dyn LocalStore>>,
    network: Option<NetworkMonitor>,
    events: Option<EventBus>,
}

impl ApiClientBuilder {
    pub fn new(settings: ApiSettings) -> Self {
        ApiClientBuilder {
            settings,
            transport: None,
            session: None,
            store: None,
            network: None,
            events: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn session(mut self, session: Arc<dyn SessionContext>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn network(mut self, network: NetworkMonitor) -> Self {
        self.network = Some(network);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Builds the client and restores the persisted queue.
    pub fn build(self) -> SyncResult<ApiClient> {
        let transport = self
            .transport
            .ok_or_else(|| SyncError::InvalidConfig("HTTP transport required".into()))?;
        let store = self
            .store
            .ok_or_else(|| SyncError::InvalidConfig("Local store required".into()))?;
        let events = self.events.unwrap_or_default();
        let network = self
            .network
            .unwrap_or_else(|| NetworkMonitor::new(true, events.clone()));
        let session = self
            .session
            .unwrap_or_else(|| Arc::new(AnonymousSession));

        let base_url = match self.settings.base_url {
            Some(ref raw) => Some(parse_base_url(raw)?),
            None => None,
        };

        let (queue, trimmed) = load_queue(store.as_ref(), &self.settings, crate::now_millis())?;
        if trimmed {
            store.save_json(keys::PENDING_REQUESTS, &queue)?;
        }
        debug!(queued = queue.len(), "Request queue restored");
        let cache = ResponseCache::new(self.settings.cache_capacity);

        Ok(ApiClient {
            inner: Arc::new(ApiInner {
                settings: self.settings,
                base_url,
                transport,
                session,
                store,
                network,
                events,
                cache,
                queue: Mutex::new(queue),
                in_flight: Mutex::new(HashMap::new()),
                draining: AtomicBool::new(false),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{HttpResponse, TransportError};
    use async_trait::async_trait;
    use fairway_core::ErrorCode;
    use fairway_store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Answers from a script of responses; repeats the last one when exhausted.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        fallback: Result<HttpResponse, TransportError>,
        delay: Duration,
        calls: AtomicUsize,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Self::delayed(script, Duration::ZERO)
        }

        fn delayed(script: Vec<Result<HttpResponse, TransportError>>, delay: Duration) -> Arc<Self> {
            let fallback = script
                .last()
                .cloned()
                .unwrap_or_else(|| Ok(HttpResponse::new(200, Value::Null)));
            Arc::new(ScriptedTransport {
                script: Mutex::new(script.into()),
                fallback,
                delay,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.seen).push(request);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            let next = lock(&self.script).pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn ok(body: Value) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::new(200, body))
    }

    fn down() -> Result<HttpResponse, TransportError> {
        Err(TransportError::Connect("connection refused".into()))
    }

    fn settings() -> ApiSettings {
        ApiSettings {
            base_url: Some("https://pos.example.com/api/".into()),
            retry_attempts: 0,
            retry_delay_ms: 0,
            ..Default::default()
        }
    }

    fn client_with(
        transport: Arc<ScriptedTransport>,
        store: Arc<MemoryStore>,
        online: bool,
    ) -> ApiClient {
        let events = EventBus::new();
        ApiClient::builder(settings())
            .transport(transport)
            .store(store)
            .network(NetworkMonitor::new(online, events.clone()))
            .events(events)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_rejects_invalid_method_and_url() {
        let transport = ScriptedTransport::new(vec![ok(json!({}))]);
        let client = client_with(transport.clone(), Arc::new(MemoryStore::new()), true);

        let err = client
            .request("TRACE", "bookings", None, RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);

        let err = client
            .request("GET", "ftp://files/x", None, RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_relative_urls_join_base_and_method_is_case_insensitive() {
        let transport = ScriptedTransport::new(vec![ok(json!([]))]);
        let client = client_with(transport.clone(), Arc::new(MemoryStore::new()), true);

        client
            .request("get", "bookings", None, RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(
            lock(&transport.seen)[0].url,
            "https://pos.example.com/api/bookings"
        );
    }

    #[tokio::test]
    async fn test_base_url_without_trailing_slash_keeps_its_path() {
        let transport = ScriptedTransport::new(vec![ok(json!([]))]);
        let client = ApiClient::builder(ApiSettings {
            base_url: Some("https://pos.example.com/api".into()),
            ..settings()
        })
        .transport(transport.clone())
        .store(Arc::new(MemoryStore::new()))
        .build()
        .unwrap();

        client.get("bookings", RequestOptions::default()).await.unwrap();
        assert_eq!(
            lock(&transport.seen)[0].url,
            "https://pos.example.com/api/bookings"
        );
    }

    #[tokio::test]
    async fn test_cache_hit_avoids_network() {
        let transport = ScriptedTransport::new(vec![ok(json!({"menu": [1]}))]);
        let client = client_with(transport.clone(), Arc::new(MemoryStore::new()), true);

        let first = client.get("menu", RequestOptions::default()).await.unwrap();
        let second = client.get("menu", RequestOptions::default()).await.unwrap();

        assert_eq!(transport.calls(), 1);
        assert_eq!(first.source, ReplySource::Network);
        assert_eq!(second.source, ReplySource::Cache);
        assert_eq!(second.data, json!({"menu": [1]}));

        client
            .get("menu", RequestOptions::default().bypass_cache())
            .await
            .unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_identical_posts_are_deduplicated() {
        let transport =
            ScriptedTransport::delayed(vec![ok(json!({"id": "b1"}))], Duration::from_millis(100));
        let client = client_with(transport.clone(), Arc::new(MemoryStore::new()), true);
        let body = json!({"bay": 3});

        let (a, b) = tokio::join!(
            client.post("bookings", body.clone(), RequestOptions::default()),
            client.post("bookings", body.clone(), RequestOptions::default()),
        );

        assert_eq!(transport.calls(), 1);
        assert_eq!(a.unwrap(), b.unwrap());

        client
            .post("bookings", body, RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_offline_mutation_is_queued_and_persisted() {
        let transport = ScriptedTransport::new(vec![ok(json!({}))]);
        let store = Arc::new(MemoryStore::new());
        let client = client_with(transport.clone(), store.clone(), false);

        let reply = client
            .post("tabs", json!({"total": 12}), RequestOptions::default())
            .await
            .unwrap();

        assert!(reply.is_queued());
        assert_eq!(transport.calls(), 0);
        let stored: Vec<QueuedRequest> = store.load_json(keys::PENDING_REQUESTS).unwrap().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].url, "https://pos.example.com/api/tabs");

        let direct = client
            .post("tabs", json!({}), RequestOptions::default().without_queue())
            .await
            .unwrap();
        assert_eq!(direct.source, ReplySource::Network);
        assert_eq!(transport.calls(), 1);
        assert_eq!(client.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_network_failure_soft_fails_into_queue() {
        let transport = ScriptedTransport::new(vec![down()]);
        let client = client_with(transport, Arc::new(MemoryStore::new()), true);

        let reply = client
            .put("bookings/7", json!({"bay": 2}), RequestOptions::default())
            .await
            .unwrap();
        assert!(reply.is_queued());
        assert_eq!(client.queue_len(), 1);

        let err = client.get("bookings", RequestOptions::default()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Network);
        assert_eq!(client.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried_or_queued() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(
            422,
            json!({"message": "bay is required"}),
        ))]);
        let events = EventBus::new();
        let client = ApiClient::builder(ApiSettings {
            retry_attempts: 3,
            ..settings()
        })
        .transport(transport.clone())
        .store(Arc::new(MemoryStore::new()))
        .events(events)
        .build()
        .unwrap();

        let err = client
            .post("bookings", json!({}), RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(err.message, "bay is required");
        assert_eq!(transport.calls(), 1);
        assert_eq!(client.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried_then_reported() {
        let transport =
            ScriptedTransport::delayed(vec![ok(json!({}))], Duration::from_secs(60));
        let client = client_with(transport.clone(), Arc::new(MemoryStore::new()), true);

        let err = client
            .get(
                "slow",
                RequestOptions::default().timeout_ms(500).retry_attempts(2),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::Network);
        assert!(err.message.contains("timed out"));
        assert_eq!(transport.calls(), 3);
    }

    #[test]
    fn test_caller_limits_are_clamped() {
        let settings = ApiSettings::default();
        let limits = Limits::clamp(
            &settings,
            &RequestOptions::default()
                .timeout_ms(600_000)
                .retry_attempts(50)
                .retry_delay_ms(120_000),
        );
        assert_eq!(limits.timeout, Duration::from_millis(settings.max_timeout_ms));
        assert_eq!(limits.retry_attempts, settings.max_retry_attempts);
        assert_eq!(limits.retry_delay, Duration::from_millis(settings.max_retry_delay_ms));
    }

    #[tokio::test]
    async fn test_fifo_drain_halts_on_first_failure() {
        let transport = ScriptedTransport::new(vec![ok(json!({})), down(), ok(json!({}))]);
        let store = Arc::new(MemoryStore::new());
        let client = client_with(transport.clone(), store.clone(), false);

        for n in 1..=3 {
            client
                .post(&format!("tabs/{n}"), json!({"n": n}), RequestOptions::default())
                .await
                .unwrap();
        }
        let queued: Vec<String> = client.pending_requests().iter().map(|r| r.id.clone()).collect();

        client.network().set_online(true);
        let report = client.process_pending_queue().await;

        assert_eq!(report.processed, 1);
        assert!(report.halted);
        let remaining: Vec<String> = client.pending_requests().iter().map(|r| r.id.clone()).collect();
        assert_eq!(remaining, queued[1..].to_vec());
        assert_eq!(transport.calls(), 2);

        let stored: Vec<QueuedRequest> = store.load_json(keys::PENDING_REQUESTS).unwrap().unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_queue_evicts_oldest_beyond_bound() {
        let transport = ScriptedTransport::new(vec![ok(json!({}))]);
        let events = EventBus::new();
        let client = ApiClient::builder(ApiSettings {
            max_queue_size: 2,
            ..settings()
        })
        .transport(transport)
        .store(Arc::new(MemoryStore::new()))
        .network(NetworkMonitor::new(false, events.clone()))
        .events(events)
        .build()
        .unwrap();

        for n in 1..=3 {
            client
                .post("tabs", json!({"n": n}), RequestOptions::default())
                .await
                .unwrap();
        }

        let kept: Vec<Value> = client
            .pending_requests()
            .into_iter()
            .filter_map(|r| r.data)
            .collect();
        assert_eq!(kept, vec![json!({"n": 2}), json!({"n": 3})]);
    }

    #[tokio::test]
    async fn test_expired_entries_dropped_on_load() {
        let store = Arc::new(MemoryStore::new());
        let now = crate::now_millis();
        let fresh = QueuedRequest::new(
            HttpMethod::Post,
            "https://pos.example.com/api/tabs",
            None,
            RequestOptions::default(),
            now - 1_000,
        );
        let stale = QueuedRequest::new(
            HttpMethod::Post,
            "https://pos.example.com/api/tabs",
            None,
            RequestOptions::default(),
            now - fairway_core::QUEUE_RETENTION_MS - 1_000,
        );
        store.save_json(keys::PENDING_REQUESTS, &vec![stale, fresh.clone()]).unwrap();

        let client = client_with(ScriptedTransport::new(vec![]), store, true);
        assert_eq!(client.pending_requests(), vec![fresh]);
    }

    #[tokio::test]
    async fn test_successful_mutation_invalidates_cache() {
        let transport = ScriptedTransport::new(vec![ok(json!([1])), ok(json!({})), ok(json!([1, 2]))]);
        let client = client_with(transport.clone(), Arc::new(MemoryStore::new()), true);

        client.get("bookings", RequestOptions::default()).await.unwrap();
        client
            .post("bookings", json!({}), RequestOptions::default().invalidating("/bookings"))
            .await
            .unwrap();
        let reply = client.get("bookings", RequestOptions::default()).await.unwrap();

        assert_eq!(reply.source, ReplySource::Network);
        assert_eq!(reply.data, json!([1, 2]));
    }

    #[tokio::test]
    async fn test_clear_pending_queue() {
        let client = client_with(
            ScriptedTransport::new(vec![]),
            Arc::new(MemoryStore::new()),
            false,
        );
        client.post("tabs", json!({}), RequestOptions::default()).await.unwrap();
        assert_eq!(client.clear_pending_queue(), 1);
        assert_eq!(client.queue_len(), 0);
    }
}
