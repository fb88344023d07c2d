//! Per-account duplex connections and their reconnect state machine.
//!
//! Each [`Connection`] owns one WebSocket and runs as a single dedicated
//! tokio task ([`Connection::run`], spawned by
//! [`crate::bridge::Bridge::start_connection`]). While connected, a reader
//! task turns inbound frames into domain events and flags channel closure;
//! the connection task races that close signal against the shutdown
//! signal:
//!
//! - shutdown first: close the channel, clear this connection's accounts
//!   from the global registry, terminate permanently;
//! - closure first: deregister the bound accounts (emitting
//!   [`Event::AccountUnregistered`] for each) **before** anything else,
//!   fail all in-flight calls, wait out a fixed backoff (shutdown
//!   short-circuits it), reconnect indefinitely.
//!
//! Outbound calls are correlated request/response envelopes
//! `{action, params, echo}`; a disconnect fails every pending call with
//! [`TransportError::Closed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::artifact::Isolate;
use crate::bridge::Bridge;
use crate::event::{Event, EventPipeline};
use crate::registry::Account;
use crate::resolve::Resolver;
use crate::selector::Selector;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Default interval between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Buffered outbound frames per connection.
const OUTBOUND_BUFFER: usize = 64;

/// How long to let the writer flush on teardown before aborting it.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

/// Transport configuration for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket endpoint to dial.
    pub endpoint: Url,
    /// Bearer token sent in the `Authorization` header, if required.
    pub access_token: Option<String>,
    /// Fixed wait between reconnect attempts.
    pub reconnect_interval: Duration,
    /// Whether unknown frame discriminators are errors instead of warnings.
    pub strict_frames: bool,
}

impl ConnectionConfig {
    /// A configuration for `endpoint` with library defaults.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            access_token: None,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            strict_frames: false,
        }
    }

    /// Set the bearer token.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Set the reconnect backoff interval.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set strict handling of unknown frame discriminators.
    pub fn with_strict_frames(mut self, strict: bool) -> Self {
        self.strict_frames = strict;
        self
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Transport-level failure of a connection or an outbound call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No live channel; the connection is between attempts or stopped.
    #[error("connection is not established")]
    NotConnected,
    /// The channel closed before the call completed.
    #[error("connection closed before the call completed")]
    Closed,
    /// The configured access token is not a valid header value.
    #[error("access token is not a valid header value")]
    InvalidToken,
    /// WebSocket handshake or protocol failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// The peer answered the call with a non-zero retcode.
    #[error("action '{action}' failed with retcode {retcode}: {message}")]
    ActionFailed {
        /// The requested action.
        action: String,
        /// Peer-reported result code.
        retcode: i64,
        /// Peer-reported failure text.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Lifecycle states of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel; either before the first attempt, between attempts, or
    /// after termination.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The duplex channel is live.
    Connected,
    /// Shutdown observed; the channel is being torn down for good.
    Closing,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A correlated response to an outbound call.
struct ActionResponse {
    retcode: i64,
    message: String,
    data: Value,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ConnectionInner {
    config: ConnectionConfig,
    isolate: Arc<Isolate>,
    bridge: Bridge,
    state: Mutex<ConnectionState>,
    alive: AtomicBool,
    seq: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<ActionResponse>>>,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    /// Platform account id -> route, for accounts announced on this
    /// channel. Cleared on every disconnect.
    accounts: Mutex<HashMap<String, Selector>>,
}

/// A live duplex channel bound to one endpoint, carrying zero or more
/// accounts. Cheap to clone; clones share the underlying channel.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("alive", &self.alive())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(
        config: ConnectionConfig,
        isolate: Arc<Isolate>,
        bridge: Bridge,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                config,
                isolate,
                bridge,
                state: Mutex::new(ConnectionState::Disconnected),
                alive: AtomicBool::new(false),
                seq: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                accounts: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The connection's transport configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// The application handle this connection reports to.
    pub fn bridge(&self) -> &Bridge {
        &self.inner.bridge
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    /// Whether the duplex channel is currently live.
    pub fn alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    /// A resolver over this connection's isolate with the connection and
    /// application components bound.
    pub fn resolver(&self) -> Resolver {
        Resolver::new(Arc::clone(&self.inner.isolate))
            .with_connection(self.clone())
            .with_application(self.inner.bridge.clone())
    }

    /// Bind a platform account announced on this channel: record it
    /// locally and register it in the global registry.
    pub fn bind_account(&self, id: impl Into<String>, route: Selector) -> Account {
        let account = Account::new(route.clone(), self.clone());
        lock(&self.inner.accounts).insert(id.into(), route);
        self.inner.bridge.accounts().register(account.clone());
        account
    }

    /// Route of the bound account with platform id `id`, if any.
    pub fn account_route(&self, id: &str) -> Option<Selector> {
        lock(&self.inner.accounts).get(id).cloned()
    }

    /// Routes of every account currently bound to this channel.
    pub fn bound_accounts(&self) -> Vec<Selector> {
        lock(&self.inner.accounts).values().cloned().collect()
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.inner.state) = state;
    }

    // ------------------------------------------------------------------
    // Outbound calls
    // ------------------------------------------------------------------

    /// Send `{action, params, echo}` and wait for the correlated response.
    ///
    /// Fails with [`TransportError::NotConnected`] when no channel is
    /// live, [`TransportError::Closed`] when the channel drops before the
    /// response arrives, and [`TransportError::ActionFailed`] when the
    /// peer reports a non-zero retcode.
    pub async fn call(&self, action: &str, params: Value) -> Result<Value, TransportError> {
        let Some(sender) = lock(&self.inner.outbound).clone() else {
            return Err(TransportError::NotConnected);
        };
        let echo = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(echo, tx);

        let frame = json!({ "action": action, "params": params, "echo": echo });
        debug!(action, echo, "sending action");
        if sender.send(Message::text(frame.to_string())).await.is_err() {
            lock(&self.inner.pending).remove(&echo);
            return Err(TransportError::Closed);
        }

        match rx.await {
            Ok(response) if response.retcode == 0 => Ok(response.data),
            Ok(response) => Err(TransportError::ActionFailed {
                action: action.to_owned(),
                retcode: response.retcode,
                message: response.message,
            }),
            Err(_) => Err(TransportError::Closed),
        }
    }

    fn complete_call(&self, echo: u64, frame: &Value) {
        let Some(tx) = lock(&self.inner.pending).remove(&echo) else {
            debug!(echo, "response with no pending call, dropping");
            return;
        };
        let response = ActionResponse {
            retcode: frame.get("retcode").and_then(Value::as_i64).unwrap_or(-1),
            message: frame
                .get("message")
                .or_else(|| frame.get("wording"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            data: frame.get("data").cloned().unwrap_or(Value::Null),
        };
        let _ = tx.send(response);
    }

    fn fail_pending(&self) {
        let pending = std::mem::take(&mut *lock(&self.inner.pending));
        if !pending.is_empty() {
            debug!(calls = pending.len(), "failing in-flight calls");
        }
        // Dropping the senders wakes every waiter with `Closed`.
        drop(pending);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Drive the connection until shutdown. Runs as this connection's
    /// dedicated task; owns the socket for its whole life.
    pub(crate) async fn run(
        self,
        pipeline: Arc<EventPipeline>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            let ws = tokio::select! {
                result = self.connect() => match result {
                    Ok(ws) => ws,
                    Err(error) => {
                        warn!(
                            endpoint = %self.inner.config.endpoint,
                            %error,
                            "connect failed, retrying"
                        );
                        self.set_state(ConnectionState::Disconnected);
                        if self.backoff(&mut shutdown).await {
                            break;
                        }
                        continue;
                    }
                },
                _ = shutdown.changed() => break,
            };
            info!(endpoint = %self.inner.config.endpoint, "connected");

            let (sink, stream) = ws.split();
            let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
            *lock(&self.inner.outbound) = Some(out_tx.clone());
            self.inner.alive.store(true, Ordering::SeqCst);
            self.set_state(ConnectionState::Connected);

            let close = Arc::new(Notify::new());
            let mut writer = tokio::spawn(write_loop(sink, out_rx));
            let reader = tokio::spawn(read_loop(
                self.clone(),
                Arc::clone(&pipeline),
                stream,
                out_tx.clone(),
                Arc::clone(&close),
            ));

            // Race the reader's close signal against process shutdown;
            // whichever fires first decides the outcome.
            let shutting_down = tokio::select! {
                _ = close.notified() => false,
                _ = shutdown.changed() => true,
            };

            if shutting_down {
                self.set_state(ConnectionState::Closing);
                info!(endpoint = %self.inner.config.endpoint, "shutdown, closing channel");
                let _ = out_tx.send(Message::Close(None)).await;
            }

            self.inner.alive.store(false, Ordering::SeqCst);
            *lock(&self.inner.outbound) = None;
            drop(out_tx);
            reader.abort();
            let _ = reader.await;
            if tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
                writer.abort();
            }
            self.fail_pending();

            // Deregistration must finish before the next connect attempt
            // can begin; stale routes must never outlive their socket.
            self.deregister_accounts(!shutting_down).await;
            self.set_state(ConnectionState::Disconnected);

            if shutting_down {
                break;
            }
            warn!(
                endpoint = %self.inner.config.endpoint,
                interval_secs = self.inner.config.reconnect_interval.as_secs(),
                "connection closed by peer, reconnecting"
            );
            if self.backoff(&mut shutdown).await {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!(endpoint = %self.inner.config.endpoint, "connection task stopped");
    }

    async fn connect(&self) -> Result<WsStream, TransportError> {
        let mut request = self.inner.config.endpoint.as_str().into_client_request()?;
        if let Some(token) = &self.inner.config.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| TransportError::InvalidToken)?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        let (ws, _response) = connect_async(request).await?;
        Ok(ws)
    }

    /// Wait out the reconnect interval. Returns `true` if shutdown arrived
    /// during the wait.
    async fn backoff(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.inner.config.reconnect_interval) => false,
            _ = shutdown.changed() => true,
        }
    }

    /// Remove every bound account from the global registry, emitting
    /// [`Event::AccountUnregistered`] per account when `notify` is set.
    async fn deregister_accounts(&self, notify: bool) {
        let bound = std::mem::take(&mut *lock(&self.inner.accounts));
        for (id, route) in bound {
            debug!(account = %id, route = %route, "deregistering account");
            self.inner.bridge.accounts().remove(&route);
            if notify {
                self.inner
                    .bridge
                    .emit(Event::AccountUnregistered { route })
                    .await;
            }
        }
    }

    async fn route_frame(&self, pipeline: &EventPipeline, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "dropping malformed frame");
                return;
            }
        };
        if let Some(echo) = frame.get("echo").and_then(Value::as_u64) {
            self.complete_call(echo, &frame);
            return;
        }
        match pipeline.ingest(self.clone(), frame).await {
            Ok(Some(event)) => self.inner.bridge.emit(event).await,
            Ok(None) => {}
            Err(error) => error!(%error, "frame rejected"),
        }
    }
}

// ---------------------------------------------------------------------------
// Socket halves
// ---------------------------------------------------------------------------

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut rx: mpsc::Receiver<Message>) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() || closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    connection: Connection,
    pipeline: Arc<EventPipeline>,
    mut stream: SplitStream<WsStream>,
    out_tx: mpsc::Sender<Message>,
    close: Arc<Notify>,
) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                connection.route_frame(&pipeline, text.as_str()).await;
            }
            Ok(Message::Ping(payload)) => {
                let _ = out_tx.send(Message::Pong(payload)).await;
            }
            Ok(Message::Close(_)) => {
                debug!("close frame from peer");
                break;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(%error, "read failed, treating channel as closed");
                break;
            }
        }
    }
    close.notify_one();
}
