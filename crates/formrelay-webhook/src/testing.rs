//! Scripted local HTTP endpoint for exercising deliveries in tests.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use url::Url;

/// A canned response served by [`MockEndpoint`].
#[derive(Debug, Clone)]
pub struct MockReply {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
    /// Extra response headers.
    pub headers: Vec<(String, String)>,
    /// Time to wait before answering.
    pub delay: Duration,
}

impl Default for MockReply {
    fn default() -> Self {
        Self::json(200, serde_json::json!({}))
    }
}

impl MockReply {
    /// A reply with the given status and an empty body.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            headers: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    /// A reply with a JSON body.
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            body: body.to_string(),
            ..Self::status(status)
        }
        .with_header("content-type", "application/json")
    }

    /// Adds a response header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Delays the reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A request received by [`MockEndpoint`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Path and query.
    pub path: String,
    /// Headers keyed by lowercase name.
    pub headers: BTreeMap<String, String>,
    /// Raw body bytes.
    pub body: Bytes,
}

impl RecordedRequest {
    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Parses the body as JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

#[derive(Default)]
struct MockState {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// HTTP server on an ephemeral localhost port that records every request
/// and answers with queued replies, falling back to `200 {}`.
///
/// The server stops when the endpoint is dropped.
pub struct MockEndpoint {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for MockEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockEndpoint")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl MockEndpoint {
    /// Starts an endpoint that always answers `200 {}`.
    pub async fn start() -> Self {
        Self::with_replies([]).await
    }

    /// Starts an endpoint that serves `replies` in order.
    pub async fn with_replies(replies: impl IntoIterator<Item = MockReply>) -> Self {
        let state = Arc::new(MockState::default());
        state
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(replies);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock endpoint should bind to localhost");
        let addr = listener
            .local_addr()
            .expect("mock endpoint should have a local address");

        let shutdown = CancellationToken::new();
        let app = Router::new().fallback(record).with_state(state.clone());
        let signal = shutdown.clone().cancelled_owned();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await;
        });

        Self {
            addr,
            state,
            shutdown,
        }
    }

    /// URL for `path` on the endpoint.
    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", self.addr, path))
            .expect("mock endpoint URL should be valid")
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for MockEndpoint {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn record(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let recorded = RecordedRequest {
        method: method.to_string(),
        path: uri
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| uri.path().to_owned()),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_owned(), value.to_owned()))
            })
            .collect(),
        body,
    };

    state
        .requests
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(recorded);

    let reply = state
        .replies
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
        .unwrap_or_default();

    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let headers: HeaderMap = reply
        .headers
        .iter()
        .filter_map(|(name, value)| {
            Some((
                HeaderName::from_bytes(name.as_bytes()).ok()?,
                HeaderValue::from_str(value).ok()?,
            ))
        })
        .collect();

    (status, headers, reply.body).into_response()
}
