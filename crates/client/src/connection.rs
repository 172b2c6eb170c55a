// Connection manager: picks a transport, tracks connection state and
// computes reconnection backoff.
//
// Opening a connection runs on a spawned task: pending events from the
// previous connection are flushed over HTTP first, then the socket is tried
// a few times before falling back to polling. The result comes back to the
// session on the inbound channel like any other transport event.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fieldsync_common::protocol::{CollabEvent, FallbackRequest, WireEvent};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ClientConfig, ConfigError, Endpoint, ReconnectPolicy, Timings};
use crate::error::ConnectionError;
use crate::transport::{
    self, fallback, read_only, socket, Inbound, Opened, TransportContext, TransportEvent,
    TransportHandle, TransportKind,
};

// ── Connector trait ─────────────────────────────────────────────────

/// Opens transports. Abstracted so tests can run without a server.
pub trait Connector: Send + Sync + 'static {
    fn open(
        &self,
        kind: TransportKind,
        ctx: TransportContext,
    ) -> impl Future<Output = Result<Opened, ConnectionError>> + Send;

    /// Submit events left over from a previous connection.
    fn flush_pending(
        &self,
        request: FallbackRequest,
        ctx: &TransportContext,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;
}

/// The real connector: WebSocket and HTTP against one document endpoint.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    socket_url: Url,
    fallback_url: Url,
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(endpoint: &Endpoint) -> Result<Self, ConfigError> {
        Ok(Self {
            socket_url: endpoint.socket_url()?,
            fallback_url: endpoint.fallback_url()?,
            client: reqwest::Client::new(),
        })
    }
}

impl Connector for HttpConnector {
    async fn open(
        &self,
        kind: TransportKind,
        ctx: TransportContext,
    ) -> Result<Opened, ConnectionError> {
        match kind {
            TransportKind::Socket => socket::open(&self.socket_url, ctx).await,
            TransportKind::Fallback => fallback::open(&self.client, &self.fallback_url, ctx).await,
            TransportKind::ReadOnly => read_only::open(&self.client, &self.fallback_url, ctx).await,
            TransportKind::Connecting => {
                Err(ConnectionError::Transport("cannot open a placeholder transport".into()))
            }
        }
    }

    async fn flush_pending(
        &self,
        request: FallbackRequest,
        ctx: &TransportContext,
    ) -> Result<(), ConnectionError> {
        let timeout = ctx.timings.handshake_timeout();
        let auth_token = ctx.auth_token.as_deref();
        transport::post_events(&self.client, &self.fallback_url, auth_token, timeout, &request)
            .await
            .map(|_| ())
    }
}

// ── State ───────────────────────────────────────────────────────────

/// Which transports a connection may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportPreference {
    /// Socket first, polling if the socket cannot be opened.
    #[default]
    Auto,
    Fallback,
    ReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
}

pub struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    timings: Timings,
    policy: ReconnectPolicy,
    auth_token: Option<String>,
    inbound: mpsc::Sender<Inbound>,
    state: ConnectionState,
    transport: Option<TransportHandle>,
    attempt: Option<JoinHandle<()>>,
    generation: u64,
    consecutive_failures: u32,
    last_error: Option<ConnectionError>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, config: &ClientConfig, inbound: mpsc::Sender<Inbound>) -> Self {
        Self {
            connector: Arc::new(connector),
            timings: config.timings.clone(),
            policy: config.reconnect.clone(),
            auth_token: config.auth_token.clone(),
            inbound,
            state: ConnectionState::Closed,
            transport: None,
            attempt: None,
            generation: 0,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Tag carried by every inbound event of the current connection.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.transport.as_ref().map(TransportHandle::kind)
    }

    pub fn last_error(&self) -> Option<&ConnectionError> {
        self.last_error.as_ref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Start connecting. Does nothing unless closed; returns whether an
    /// attempt was started. `flush` is posted before any transport opens.
    pub fn connect(
        &mut self,
        preference: TransportPreference,
        flush: Option<FallbackRequest>,
    ) -> bool {
        if self.state != ConnectionState::Closed {
            return false;
        }
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        self.transport = Some(TransportHandle::placeholder());

        let ctx = self.context();
        let connector = Arc::clone(&self.connector);
        let attempts = self.timings.socket_attempts.max(1);
        let retry_delay = self.timings.socket_retry_delay();
        debug!(generation = self.generation, ?preference, "connecting");
        self.attempt = Some(tokio::spawn(async move {
            let result =
                establish(connector.as_ref(), preference, flush, attempts, retry_delay, &ctx).await;
            ctx.emit(TransportEvent::Opened(result)).await;
        }));
        true
    }

    /// Adopt a transport that completed its handshake. The connection
    /// counts as open once the handshake has been applied; see
    /// [`Self::mark_open`].
    pub fn install(&mut self, opened: Opened) -> WireEvent {
        self.attempt = None;
        info!(transport = ?opened.handle.kind(), "transport opened");
        self.transport = Some(opened.handle);
        opened.handshake
    }

    pub fn mark_open(&mut self) {
        self.state = ConnectionState::Open;
        self.consecutive_failures = 0;
        self.last_error = None;
    }

    /// The transport ended or could not be opened. Returns the delay before
    /// reconnecting, or `None` when reconnecting cannot help.
    pub fn handle_closed(&mut self, error: Option<ConnectionError>) -> Option<Duration> {
        self.transport = None;
        self.attempt = None;
        self.state = ConnectionState::Closed;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let retry = error.as_ref().is_none_or(ConnectionError::is_retryable);
        match &error {
            Some(error) => warn!(%error, failures = self.consecutive_failures, "connection closed"),
            None => info!("connection closed by server"),
        }
        if error.is_some() {
            self.last_error = error;
        }
        retry.then(|| self.policy.delay(self.consecutive_failures))
    }

    /// Drop the connection because of a local fault, ignoring whatever the
    /// old transport still reports.
    pub fn fail(&mut self, error: ConnectionError) -> Option<Duration> {
        self.generation += 1;
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
        self.handle_closed(Some(error))
    }

    /// Hand a batch to the open transport.
    pub fn send(&self, events: Vec<CollabEvent>) -> bool {
        if self.state != ConnectionState::Open || events.is_empty() {
            return false;
        }
        self.transport.as_ref().is_some_and(|transport| transport.send(events))
    }

    /// Close on request: send `final_batch`, let the transport flush, then
    /// tear it down. No reconnect follows.
    pub async fn disconnect(&mut self, final_batch: Vec<CollabEvent>) {
        self.generation += 1;
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
        if let Some(transport) = self.transport.take() {
            if !final_batch.is_empty() {
                transport.send(final_batch);
            }
            transport.disconnect(self.timings.handshake_timeout()).await;
        }
        self.state = ConnectionState::Closed;
        info!("disconnected");
    }

    fn context(&self) -> TransportContext {
        TransportContext {
            generation: self.generation,
            inbound: self.inbound.clone(),
            timings: self.timings.clone(),
            auth_token: self.auth_token.clone(),
        }
    }
}

async fn establish<C: Connector>(
    connector: &C,
    preference: TransportPreference,
    flush: Option<FallbackRequest>,
    attempts: u32,
    retry_delay: Duration,
    ctx: &TransportContext,
) -> Result<Opened, ConnectionError> {
    if let Some(request) = flush {
        let count = request.messages.len();
        match connector.flush_pending(request, ctx).await {
            Ok(()) => debug!(count, "flushed events from previous connection"),
            Err(error) => warn!(%error, count, "could not flush events from previous connection"),
        }
    }

    match preference {
        TransportPreference::ReadOnly => return connector.open(TransportKind::ReadOnly, ctx.clone()).await,
        TransportPreference::Fallback => return connector.open(TransportKind::Fallback, ctx.clone()).await,
        TransportPreference::Auto => {}
    }

    for attempt in 1..=attempts {
        match connector.open(TransportKind::Socket, ctx.clone()).await {
            Ok(opened) => return Ok(opened),
            Err(ConnectionError::PermissionDenied) => return Err(ConnectionError::PermissionDenied),
            Err(error) => {
                warn!(attempt, attempts, %error, "socket connection failed");
                if attempt < attempts {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }
    info!("socket unavailable, falling back to HTTP polling");
    connector.open(TransportKind::Fallback, ctx.clone()).await
}
