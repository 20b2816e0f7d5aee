//! Reusable test helpers for debounce and HTTP integration tests.
//!
//! Provides recording doubles for the publish and dispatch ports, a counting
//! wrapper around the in-memory state store, `TestApp` for sending
//! requests through the full axum router, and `StubServer` standing in for
//! upstream HTTP APIs.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use pollcast_server::api::{create_router, AppState};
use pollcast_server::config::Config;
use pollcast_server::debounce::{
    Content, DebounceCoordinator, DebounceKey, DebounceSettings, MemoryStateStore, MessageHandle,
    SharedStateStore, StoreError, StoredUpdate,
};
use pollcast_server::publish::{PublishError, PublishOutcome, PublishPort};
use pollcast_server::webhooks::dispatch::{delay_secs, DelayedDispatcher, DispatchError};
use pollcast_server::webhooks::signing::{CallbackSigner, SignatureVerifier, SIGNATURE_HEADER};

pub const CALLBACK_URL: &str = "http://127.0.0.1:8080/trailing-update";

// ============================================================================
// Publish double
// ============================================================================

/// One recorded publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishCall {
    pub handle: MessageHandle,
    pub content: Content,
}

/// Scripted reply for the next publish call.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Success,
    NoOp,
    Fatal,
}

/// Publisher that records calls and replies from a script (default: success).
#[derive(Default)]
pub struct RecordingPublisher {
    calls: Mutex<Vec<PublishCall>>,
    script: Mutex<VecDeque<Reply>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue replies for the following calls.
    pub fn reply_with(&self, replies: impl IntoIterator<Item = Reply>) {
        self.script.lock().unwrap().extend(replies);
    }

    pub fn calls(&self) -> Vec<PublishCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.content.text).collect()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PublishPort for RecordingPublisher {
    async fn publish(
        &self,
        handle: &MessageHandle,
        content: &Content,
    ) -> Result<PublishOutcome, PublishError> {
        self.calls.lock().unwrap().push(PublishCall {
            handle: handle.clone(),
            content: content.clone(),
        });

        let reply = self.script.lock().unwrap().pop_front().unwrap_or(Reply::Success);
        match reply {
            Reply::Success => Ok(PublishOutcome::Success),
            Reply::NoOp => Ok(PublishOutcome::RecoverableNoOp),
            Reply::Fatal => Err(PublishError::Rejected {
                status: 400,
                description: "Bad Request: MESSAGE_ID_INVALID".to_string(),
            }),
        }
    }
}

// ============================================================================
// Dispatch double
// ============================================================================

/// One recorded schedule call.
#[derive(Debug, Clone)]
pub struct ScheduledCall {
    pub url: String,
    pub payload: serde_json::Value,
    pub delay: Duration,
}

impl ScheduledCall {
    /// Raw body as the dispatch service would post it.
    pub fn body(&self) -> Vec<u8> {
        serde_json::to_vec(&self.payload).unwrap()
    }
}

/// Dispatcher that records schedules; can be switched to fail.
#[derive(Default)]
pub struct RecordingDispatcher {
    scheduled: Mutex<Vec<ScheduledCall>>,
    fail: AtomicBool,
    whole_seconds: AtomicBool,
}

impl RecordingDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Round delays up to whole seconds, as `QStash` does.
    pub fn use_whole_seconds(&self, whole: bool) {
        self.whole_seconds.store(whole, Ordering::SeqCst);
    }

    pub fn scheduled(&self) -> Vec<ScheduledCall> {
        self.scheduled.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.scheduled.lock().unwrap().len()
    }
}

#[async_trait]
impl DelayedDispatcher for RecordingDispatcher {
    fn effective_delay(&self, delay: Duration) -> Duration {
        if self.whole_seconds.load(Ordering::SeqCst) {
            Duration::from_secs(delay_secs(delay))
        } else {
            delay
        }
    }

    async fn schedule(
        &self,
        callback_url: &str,
        payload: &serde_json::Value,
        delay: Duration,
    ) -> Result<String, DispatchError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::Rejected {
                status: 500,
                body: "queue full".to_string(),
            });
        }

        let mut scheduled = self.scheduled.lock().unwrap();
        scheduled.push(ScheduledCall {
            url: callback_url.to_string(),
            payload: payload.clone(),
            delay,
        });
        Ok(format!("msg_{}", scheduled.len()))
    }
}

// ============================================================================
// Store double
// ============================================================================

/// In-memory store that counts accesses and can simulate an outage.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStateStore,
    accesses: AtomicUsize,
    down: AtomicBool,
    corrupt: AtomicBool,
    ttls: Mutex<Vec<Duration>>,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn accesses(&self) -> usize {
        self.accesses.load(Ordering::SeqCst)
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Make reads fail to decode, as a record written by an incompatible build would.
    pub fn set_corrupt(&self, corrupt: bool) {
        self.corrupt.store(corrupt, Ordering::SeqCst);
    }

    /// TTLs passed to every acquire, in call order.
    pub fn ttls(&self) -> Vec<Duration> {
        self.ttls.lock().unwrap().clone()
    }

    pub fn live_records(&self) -> usize {
        self.inner.len()
    }

    fn touch(&self) -> Result<(), StoreError> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedStateStore for CountingStore {
    async fn try_acquire(
        &self,
        key: &DebounceKey,
        update: &StoredUpdate,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.touch()?;
        self.ttls.lock().unwrap().push(ttl);
        self.inner.try_acquire(key, update, ttl).await
    }

    async fn get(&self, key: &DebounceKey) -> Result<Option<StoredUpdate>, StoreError> {
        self.touch()?;
        if self.corrupt.load(Ordering::SeqCst) {
            let err = serde_json::from_str::<StoredUpdate>("{\"text\":").unwrap_err();
            return Err(StoreError::Corrupt(err));
        }
        self.inner.get(key).await
    }

    async fn delete(&self, key: &DebounceKey) -> Result<(), StoreError> {
        self.touch()?;
        self.inner.delete(key).await
    }
}

// ============================================================================
// Coordinator harness
// ============================================================================

/// Coordinator wired to in-process doubles.
pub struct Harness {
    pub coordinator: Arc<DebounceCoordinator>,
    pub store: Arc<CountingStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub config: Config,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default_for_test())
    }

    pub fn with_config(config: Config) -> Self {
        let store = CountingStore::new();
        let publisher = RecordingPublisher::new();
        let dispatcher = RecordingDispatcher::new();

        let verifier = SignatureVerifier::new(
            &config.current_signing_key,
            config.next_signing_key.as_deref(),
        );
        let coordinator = DebounceCoordinator::new(
            store.clone(),
            publisher.clone(),
            dispatcher.clone(),
            verifier,
            DebounceSettings {
                delay: config.debounce_delay(),
                key_prefix: config.debounce_key_prefix.clone(),
                callback_url: CALLBACK_URL.to_string(),
            },
        );

        Self {
            coordinator: Arc::new(coordinator),
            store,
            publisher,
            dispatcher,
            config,
        }
    }

    /// Sign `body` with the current signing key.
    pub fn sign(&self, body: &[u8]) -> String {
        CallbackSigner::new(&self.config.current_signing_key)
            .sign(CALLBACK_URL, body)
            .unwrap()
    }

    /// Sign `body` with the next (rotation) signing key.
    pub fn sign_with_next(&self, body: &[u8]) -> String {
        let key = self.config.next_signing_key.as_deref().unwrap();
        CallbackSigner::new(key).sign(CALLBACK_URL, body).unwrap()
    }

    /// Body and signature of the `index`-th scheduled callback.
    pub fn scheduled_callback(&self, index: usize) -> (Vec<u8>, String) {
        let body = self.dispatcher.scheduled()[index].body();
        let signature = self.sign(&body);
        (body, signature)
    }

    /// Router sharing this harness's coordinator.
    pub fn router(&self) -> Router {
        let state = AppState {
            coordinator: self.coordinator.clone(),
            config: Arc::new(self.config.clone()),
        };
        create_router(state)
    }
}

/// Poll message handle used across tests.
pub fn poll_handle() -> MessageHandle {
    MessageHandle::inline("poll-42")
}

// ============================================================================
// Test App
// ============================================================================

/// A test application wrapping the full axum router.
pub struct TestApp {
    pub router: Router,
    pub harness: Harness,
}

impl TestApp {
    pub fn new() -> Self {
        let harness = Harness::new();
        Self {
            router: harness.router(),
            harness,
        }
    }

    /// Build a signed POST to the trailing-update webhook.
    pub fn callback_request(path: &str, body: Vec<u8>, signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("Content-Type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header(SIGNATURE_HEADER, sig);
        }
        builder.body(Body::from(body)).unwrap()
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }
}

/// Read a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Stub upstream server
// ============================================================================

/// One request received by a [`StubServer`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

#[derive(Clone)]
struct StubState {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
}

/// Upstream HTTP API on an ephemeral port that records every request and
/// answers each with the same canned reply.
pub struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl StubServer {
    /// Reply with a JSON body.
    pub async fn json(status: StatusCode, body: &'static str) -> Self {
        Self::start(status, "application/json", body).await
    }

    /// Reply with a non-JSON body.
    pub async fn text(status: StatusCode, body: &'static str) -> Self {
        Self::start(status, "text/html", body).await
    }

    async fn start(status: StatusCode, content_type: &'static str, body: &'static str) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = StubState {
            requests: Arc::clone(&requests),
            status,
            content_type,
            body,
        };
        let router = Router::new().fallback(stub_reply).with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        Self { base_url, requests }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The single request received; panics on zero or several.
    pub fn only_request(&self) -> CapturedRequest {
        let requests = self.requests();
        assert_eq!(requests.len(), 1, "expected exactly one upstream request");
        requests.into_iter().next().unwrap()
    }
}

async fn stub_reply(
    State(stub): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    stub.requests.lock().unwrap().push(CapturedRequest {
        method,
        path: uri.path().to_string(),
        headers,
        body,
    });
    (stub.status, [(CONTENT_TYPE, stub.content_type)], stub.body)
}
