// Transports carrying collaboration events between the session and the
// server: a WebSocket, an HTTP polling fallback and a one-shot read-only
// snapshot.
//
// Every transport starts by fetching the handshake (the INIT event), then
// runs on its own task. Outgoing batches reach it over an unbounded
// channel; everything it learns goes back to the session as an `Inbound`
// tagged with the connection generation, so events of a superseded
// connection can be told apart and dropped.

pub mod fallback;
pub mod read_only;
pub mod socket;

use std::fmt;
use std::time::Duration;

use fieldsync_common::protocol::{ClientInfo, CollabEvent, FallbackRequest, WireEvent};
use reqwest::RequestBuilder;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::Timings;
use crate::error::ConnectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Connecting,
    Socket,
    Fallback,
    ReadOnly,
}

/// Command for a running transport.
#[derive(Debug)]
pub enum Outgoing {
    Events(Vec<CollabEvent>),
    /// Flush what is buffered, close, then acknowledge.
    Disconnect(oneshot::Sender<()>),
}

/// The session's grip on a running transport. Dropping it stops the task.
pub struct TransportHandle {
    kind: TransportKind,
    outgoing: Option<mpsc::UnboundedSender<Outgoing>>,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle {
    pub fn new(
        kind: TransportKind,
        outgoing: mpsc::UnboundedSender<Outgoing>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self { kind, outgoing: Some(outgoing), task }
    }

    /// A handle with nothing behind it; sends are discarded.
    pub fn detached(kind: TransportKind) -> Self {
        Self { kind, outgoing: None, task: None }
    }

    /// Stands in while a connection attempt is running.
    pub fn placeholder() -> Self {
        Self::detached(TransportKind::Connecting)
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Hand a batch to the transport. Returns false if it is gone.
    pub fn send(&self, events: Vec<CollabEvent>) -> bool {
        match &self.outgoing {
            Some(outgoing) => outgoing.send(Outgoing::Events(events)).is_ok(),
            None => false,
        }
    }

    /// Ask the transport to flush and close, waiting at most `grace` for
    /// it, then stop its task.
    pub async fn disconnect(mut self, grace: Duration) {
        if let Some(outgoing) = self.outgoing.take() {
            let (ack, acked) = oneshot::channel();
            if outgoing.send(Outgoing::Disconnect(ack)).is_ok() {
                let _ = tokio::time::timeout(grace, acked).await;
            }
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("kind", &self.kind)
            .field("running", &self.task.as_ref().is_some_and(|task| !task.is_finished()))
            .finish()
    }
}

/// A transport that completed its handshake.
#[derive(Debug)]
pub struct Opened {
    pub handle: TransportHandle,
    pub handshake: WireEvent,
}

#[derive(Debug)]
pub enum TransportEvent {
    Opened(Result<Opened, ConnectionError>),
    Message(WireEvent),
    /// Poll bookkeeping from the fallback transport.
    Sync { version: u64, clients: Vec<ClientInfo> },
    Closed {
        /// `None` when the transport ended without an error.
        error: Option<ConnectionError>,
        /// Outgoing events the server never acknowledged.
        unacknowledged: Vec<CollabEvent>,
    },
}

#[derive(Debug)]
pub struct Inbound {
    pub generation: u64,
    pub event: TransportEvent,
}

/// What a transport needs to report back.
#[derive(Debug, Clone)]
pub struct TransportContext {
    pub generation: u64,
    pub inbound: mpsc::Sender<Inbound>,
    pub timings: Timings,
    pub auth_token: Option<String>,
}

impl TransportContext {
    /// Report to the session. Returns false once nobody is listening.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.inbound.send(Inbound { generation: self.generation, event }).await.is_ok()
    }
}

// ── HTTP helpers ───────────────────────────────────────────────────

fn authorized(builder: RequestBuilder, auth_token: Option<&str>) -> RequestBuilder {
    match auth_token {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

/// `GET` the fallback endpoint, which answers with the INIT event.
pub(crate) async fn fetch_init(
    client: &reqwest::Client,
    url: &url::Url,
    ctx: &TransportContext,
) -> Result<WireEvent, ConnectionError> {
    let response = authorized(client.get(url.clone()), ctx.auth_token.as_deref())
        .timeout(ctx.timings.handshake_timeout())
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json::<WireEvent>().await?)
}

/// One-off `POST` of queued events, used before reconnecting.
pub(crate) async fn post_events(
    client: &reqwest::Client,
    url: &url::Url,
    auth_token: Option<&str>,
    timeout: Duration,
    request: &FallbackRequest,
) -> Result<reqwest::Response, ConnectionError> {
    let response = authorized(client.post(url.clone()), auth_token)
        .timeout(timeout)
        .json(request)
        .send()
        .await?
        .error_for_status()?;
    Ok(response)
}
