//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, Response};
use chunklog_core::config::AppConfig;
use chunklog_server::{AppState, create_router};
use chunklog_storage::{KeyValueStore, MemoryBackend, PointerPublisher};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    publisher: JoinHandle<()>,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server over a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a test server with custom config modifications.
    pub fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let store: Arc<dyn KeyValueStore> =
            Arc::new(MemoryBackend::with_visibility_timeout(Duration::from_millis(200)));
        Self::with_store(store, modifier)
    }

    /// Create a test server over a caller-supplied store.
    pub fn with_store<F>(store: Arc<dyn KeyValueStore>, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        chunklog_server::metrics::register_metrics();

        let mut config = AppConfig::for_testing();
        modifier(&mut config);

        let publisher = PointerPublisher::new(Arc::clone(&store), config.logs.pointer_ttl());
        let pointer = publisher.handle();
        let publisher = publisher.spawn();

        let state = AppState::new(config, store, pointer);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            publisher,
        }
    }

    /// Send one request through the router.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send a request and collect the whole response body.
    pub async fn send_collect(&self, request: Request<Body>) -> (Response<()>, bytes::Bytes) {
        let response = self.send(request).await;
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        (Response::from_parts(parts, ()), body)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.publisher.abort();
    }
}
