//! Mock servers for integration tests
//!
//! [`MockRest`] answers HTTP requests from per-path scripts and records
//! when each request arrived. [`MockGateway`] accepts WebSocket
//! connections, sends Hello, waits for Identify or Resume, then plays the
//! steps a script returns for that connection.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chat_gateway::{GatewayMessage, GatewaySession, OpCode, SessionState, ShardEvent};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Mock REST API
// ============================================================================

/// A scripted HTTP response
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl MockResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: json!({ "message": "scripted failure", "code": 0 }),
        }
    }

    /// 429 carrying both the `Retry-After` header and the JSON body fields
    pub fn rate_limited(retry_after: f64, global: bool) -> Self {
        let mut response = Self {
            status: 429,
            headers: Vec::new(),
            body: json!({
                "message": "You are being rate limited.",
                "retry_after": retry_after,
                "global": global,
            }),
        }
        .header("retry-after", retry_after.to_string());
        if global {
            response = response
                .header("x-ratelimit-global", "true")
                .header("x-ratelimit-scope", "global");
        } else {
            response = response.header("x-ratelimit-scope", "user");
        }
        response
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach bucket headers as the server reports them on every response
    #[must_use]
    pub fn bucket(self, hash: &str, limit: u32, remaining: u32, reset_after: f64) -> Self {
        self.header("x-ratelimit-bucket", hash)
            .header("x-ratelimit-limit", limit.to_string())
            .header("x-ratelimit-remaining", remaining.to_string())
            .header("x-ratelimit-reset-after", reset_after.to_string())
    }
}

impl IntoResponse for MockResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.body)).into_response();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

/// A request as the mock server saw it
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub at: Instant,
    pub authorization: Option<String>,
}

#[derive(Default)]
struct RestState {
    scripts: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    fallbacks: Mutex<HashMap<String, MockResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// In-process HTTP API with scripted responses
pub struct MockRest {
    pub addr: SocketAddr,
    state: Arc<RestState>,
    _handle: JoinHandle<()>,
}

impl MockRest {
    pub async fn start() -> Result<Self> {
        let state = Arc::new(RestState::default());
        let app = Router::new()
            .fallback(handle_rest)
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queue responses for `path`, served in order
    pub fn script(&self, path: &str, responses: impl IntoIterator<Item = MockResponse>) {
        self.state
            .scripts
            .lock()
            .entry(path.to_string())
            .or_default()
            .extend(responses);
    }

    /// Response for `path` once its script runs out
    pub fn respond(&self, path: &str, response: MockResponse) {
        self.state
            .fallbacks
            .lock()
            .insert(path.to_string(), response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path == path)
            .collect()
    }
}

async fn handle_rest(
    State(state): State<Arc<RestState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path().to_string();
    state.requests.lock().push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        at: Instant::now(),
        authorization: headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    });

    let scripted = state
        .scripts
        .lock()
        .get_mut(&path)
        .and_then(VecDeque::pop_front);
    scripted
        .or_else(|| state.fallbacks.lock().get(&path).cloned())
        .unwrap_or_else(|| MockResponse::ok(json!({})))
        .into_response()
}

// ============================================================================
// Mock gateway
// ============================================================================

/// What the mock gateway does after the handshake
#[derive(Debug, Clone)]
pub enum GatewayStep {
    Send(GatewayMessage),
    /// Close with this code and stop serving the connection
    Close(u16),
}

type Script = dyn Fn(usize, &GatewayMessage) -> Vec<GatewayStep> + Send + Sync;

struct GatewayState {
    heartbeat_interval: u64,
    ack_heartbeats: bool,
    withhold_hello: usize,
    script: Box<Script>,
    handshakes: Mutex<Vec<GatewayMessage>>,
    connections: AtomicUsize,
}

/// Builder for [`MockGateway`]
pub struct MockGatewayBuilder {
    heartbeat_interval: u64,
    ack_heartbeats: bool,
    withhold_hello: usize,
}

impl MockGatewayBuilder {
    #[must_use]
    pub fn heartbeat_interval(mut self, millis: u64) -> Self {
        self.heartbeat_interval = millis;
        self
    }

    #[must_use]
    pub fn ack_heartbeats(mut self, ack: bool) -> Self {
        self.ack_heartbeats = ack;
        self
    }

    /// Send no Hello on the first `count` connections
    #[must_use]
    pub fn withhold_hello(mut self, count: usize) -> Self {
        self.withhold_hello = count;
        self
    }

    /// Start serving; `script` receives the connection index and the
    /// Identify or Resume frame the client sent on it
    pub async fn start<F>(self, script: F) -> Result<MockGateway>
    where
        F: Fn(usize, &GatewayMessage) -> Vec<GatewayStep> + Send + Sync + 'static,
    {
        let state = Arc::new(GatewayState {
            heartbeat_interval: self.heartbeat_interval,
            ack_heartbeats: self.ack_heartbeats,
            withhold_hello: self.withhold_hello,
            script: Box::new(script),
            handshakes: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
        });

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        let accept_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    if let Err(e) = serve_gateway(stream, index, state).await {
                        eprintln!("mock gateway connection {index} failed: {e}");
                    }
                });
            }
        });

        Ok(MockGateway {
            addr,
            state,
            _handle: handle,
        })
    }
}

/// In-process gateway playing a script per connection
pub struct MockGateway {
    pub addr: SocketAddr,
    state: Arc<GatewayState>,
    _handle: JoinHandle<()>,
}

impl MockGateway {
    /// Hello interval long enough that no heartbeat is expected during a test
    pub const QUIET_HEARTBEAT_MS: u64 = 45_000;

    pub fn builder() -> MockGatewayBuilder {
        MockGatewayBuilder {
            heartbeat_interval: Self::QUIET_HEARTBEAT_MS,
            ack_heartbeats: true,
            withhold_hello: 0,
        }
    }

    pub async fn start<F>(script: F) -> Result<Self>
    where
        F: Fn(usize, &GatewayMessage) -> Vec<GatewayStep> + Send + Sync + 'static,
    {
        Self::builder().start(script).await
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Identify and Resume frames received across all connections, in order
    pub fn handshakes(&self) -> Vec<GatewayMessage> {
        self.state.handshakes.lock().clone()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

async fn serve_gateway(stream: TcpStream, index: usize, state: Arc<GatewayState>) -> Result<()> {
    let mut ws = tokio_tungstenite::accept_async(stream).await?;
    if index < state.withhold_hello {
        while let Some(Ok(frame)) = ws.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
        }
        return Ok(());
    }
    ws.send(Message::Text(
        GatewayMessage::hello(state.heartbeat_interval).to_json()?,
    ))
    .await?;

    // Every Identify or Resume on this socket plays the script again
    while let Some(frame) = ws.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let Ok(message) = GatewayMessage::from_json(&text) else {
            continue;
        };
        match message.op {
            OpCode::Heartbeat if state.ack_heartbeats => {
                ws.send(Message::Text(GatewayMessage::heartbeat_ack().to_json()?))
                    .await?;
            }
            OpCode::Identify | OpCode::Resume => {
                state.handshakes.lock().push(message.clone());
                for step in (state.script)(index, &message) {
                    match step {
                        GatewayStep::Send(reply) => {
                            ws.send(Message::Text(reply.to_json()?)).await?;
                        }
                        GatewayStep::Close(code) => {
                            ws.close(Some(CloseFrame {
                                code: CloseCode::from(code),
                                reason: "".into(),
                            }))
                            .await?;
                            while let Some(Ok(_)) = ws.next().await {}
                            return Ok(());
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ============================================================================
// Waiting helpers
// ============================================================================

/// Default bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// Receive shard events until one matches
pub async fn wait_for_event(
    events: &mut mpsc::UnboundedReceiver<ShardEvent>,
    predicate: impl Fn(&ShardEvent) -> bool,
) -> Result<ShardEvent> {
    let found = tokio::time::timeout(WAIT, async {
        while let Some(event) = events.recv().await {
            if predicate(&event) {
                return Some(event);
            }
        }
        None
    })
    .await?;
    found.ok_or_else(|| anyhow::anyhow!("event channel closed"))
}

/// Wait until the session reaches `state`
pub async fn wait_for_state(session: &GatewaySession, state: SessionState) -> Result<()> {
    let mut states = session.subscribe_state();
    tokio::time::timeout(WAIT, states.wait_for(|current| *current == state)).await??;
    Ok(())
}
