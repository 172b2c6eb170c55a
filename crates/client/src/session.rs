// Collaboration session: one task owning the store and the connection.
//
// Callers talk to the task through `CollabSession`: mutators go over a
// bounded command channel and are answered once applied; observers read
// snapshots from a watch channel. Transport events arrive on a second
// bounded channel. Timers (edit throttle, awareness throttle, reconnect
// backoff) are plain deadlines checked by the same select loop, so every
// state transition completes before the next event is looked at.

use std::time::Duration;

use fieldsync_common::protocol::{CollabEvent, EventType, FallbackRequest, WireEvent};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ConfigError};
use crate::connection::{
    ConnectionManager, ConnectionState, Connector, HttpConnector, TransportPreference,
};
use crate::error::{ConnectionError, ErrorCategory, SessionError, StoreError};
use crate::store::{CollabStore, EditIntent, StoreSnapshot};
use crate::throttle::Throttle;
use crate::transport::{Inbound, TransportEvent, TransportKind};

const COMMAND_CAPACITY: usize = 64;
const INBOUND_CAPACITY: usize = 256;

/// What observers see.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub store: StoreSnapshot,
    pub state: ConnectionState,
    pub transport: Option<TransportKind>,
    pub error: Option<ErrorCategory>,
}

enum Command {
    Edit(EditIntent, oneshot::Sender<Result<(), StoreError>>),
    Connect(oneshot::Sender<()>),
    Disconnect(oneshot::Sender<()>),
}

pub struct CollabSession {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<()>,
}

impl CollabSession {
    /// Start a session against `connector`. Nothing connects until
    /// [`Self::connect`] is called.
    pub fn spawn<C: Connector>(
        connector: C,
        config: &ClientConfig,
        preference: TransportPreference,
    ) -> Self {
        let preference = match preference {
            TransportPreference::Auto if !config.websockets_enabled => TransportPreference::Fallback,
            other => other,
        };
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (inbound, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (publisher, snapshots) = watch::channel(SessionSnapshot::default());

        let driver = Driver {
            store: CollabStore::new(),
            manager: ConnectionManager::new(connector, config, inbound),
            preference,
            edits: Throttle::new(config.timings.throttle()),
            awareness: Throttle::new(config.timings.awareness_throttle()),
            reconnect_at: None,
            unacknowledged: Vec::new(),
            wanted: false,
            publisher,
        };
        let task = tokio::spawn(driver.run(command_rx, inbound_rx));
        Self { commands, snapshots, task }
    }

    /// Start a session for the document served at `api_path` on the
    /// configured server.
    pub fn open(
        config: &ClientConfig,
        api_path: &str,
        preference: TransportPreference,
    ) -> Result<Self, ConfigError> {
        let connector = HttpConnector::new(&config.endpoint(api_path)?)?;
        Ok(Self::spawn(connector, config, preference))
    }

    pub async fn edit(&self, intent: EditIntent) -> Result<(), SessionError> {
        let (reply, answer) = oneshot::channel();
        self.command(Command::Edit(intent, reply)).await?;
        Ok(answer.await.map_err(|_| SessionError::Stopped)??)
    }

    pub async fn connect(&self) -> Result<(), SessionError> {
        let (reply, answer) = oneshot::channel();
        self.command(Command::Connect(reply)).await?;
        answer.await.map_err(|_| SessionError::Stopped)
    }

    /// Flush throttled edits and close. No reconnect follows.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let (reply, answer) = oneshot::channel();
        self.command(Command::Disconnect(reply)).await?;
        answer.await.map_err(|_| SessionError::Stopped)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot, SessionError> {
        let mut receiver = self.snapshots.clone();
        let snapshot = receiver.wait_for(predicate).await.map_err(|_| SessionError::Stopped)?;
        Ok(snapshot.clone())
    }

    /// Disconnect and stop the session task.
    pub async fn shutdown(self) {
        let _ = self.disconnect().await;
        drop(self.commands);
        let _ = self.task.await;
    }

    async fn command(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).await.map_err(|_| SessionError::Stopped)
    }
}

// ── Driver ──────────────────────────────────────────────────────────

struct Driver<C: Connector> {
    store: CollabStore,
    manager: ConnectionManager<C>,
    preference: TransportPreference,
    edits: Throttle,
    awareness: Throttle,
    reconnect_at: Option<Instant>,
    /// Sent over a transport that closed before the server acknowledged
    /// them; posted ahead of the next connection.
    unacknowledged: Vec<CollabEvent>,
    /// The caller asked to be connected.
    wanted: bool,
    publisher: watch::Sender<SessionSnapshot>,
}

impl<C: Connector> Driver<C> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbound: mpsc::Receiver<Inbound>,
    ) {
        loop {
            let edits_due = self.edits.deadline();
            let awareness_due = self.awareness.deadline();
            let reconnect_due = self.reconnect_at;

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.close().await;
                        return;
                    }
                },
                Some(message) = inbound.recv() => self.handle_inbound(message),
                _ = sleep_until(edits_due) => {
                    self.edits.clear();
                    self.flush_edits();
                }
                _ = sleep_until(awareness_due) => {
                    self.awareness.clear();
                    self.flush_awareness();
                }
                _ = sleep_until(reconnect_due) => {
                    self.reconnect_at = None;
                    self.start_connect();
                }
            }
            self.publish();
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Edit(intent, reply) => {
                let result = self.store.apply_intent(intent);
                if result.is_ok() {
                    self.schedule_flushes();
                }
                let _ = reply.send(result);
            }
            Command::Connect(reply) => {
                self.wanted = true;
                self.reconnect_at = None;
                self.start_connect();
                let _ = reply.send(());
            }
            Command::Disconnect(reply) => {
                self.wanted = false;
                self.close().await;
                let _ = reply.send(());
            }
        }
    }

    fn handle_inbound(&mut self, message: Inbound) {
        if message.generation != self.manager.generation() {
            debug!(generation = message.generation, "dropping event from stale connection");
            return;
        }
        match message.event {
            TransportEvent::Opened(Ok(opened)) => {
                let handshake = self.manager.install(opened);
                self.apply_wire(handshake, true);
            }
            TransportEvent::Opened(Err(error)) => {
                let delay = self.manager.handle_closed(Some(error));
                self.schedule_reconnect(delay);
            }
            TransportEvent::Message(wire) => self.apply_wire(wire, false),
            TransportEvent::Sync { version, clients } => self.store.sync_fallback(version, clients),
            TransportEvent::Closed { error, unacknowledged } => {
                if !unacknowledged.is_empty() {
                    let count = unacknowledged.len();
                    debug!(count, "keeping unacknowledged events for the next connection");
                    self.unacknowledged.extend(unacknowledged);
                }
                let delay = self.manager.handle_closed(error);
                self.schedule_reconnect(delay);
            }
        }
    }

    fn apply_wire(&mut self, wire: WireEvent, handshake: bool) {
        match self.store.receive_wire(wire) {
            Ok(EventType::Init) => {
                self.manager.mark_open();
                // Announce our focus right away rather than after a window.
                self.awareness.clear();
                self.flush_awareness();
            }
            Ok(kind) if handshake => {
                self.fault(ConnectionError::Protocol(format!(
                    "expected {} as handshake, got {}",
                    EventType::Init.as_str(),
                    kind.as_str()
                )));
            }
            Ok(_) => {}
            Err(error) => self.fault(ConnectionError::Protocol(error.to_string())),
        }
    }

    fn fault(&mut self, error: ConnectionError) {
        warn!(%error, "dropping connection after local fault");
        let delay = self.manager.fail(error);
        self.schedule_reconnect(delay);
    }

    fn start_connect(&mut self) {
        if self.manager.state() != ConnectionState::Closed {
            return;
        }
        let flush = self.flush_request();
        self.store.reset_for_reconnect();
        self.edits.clear();
        self.awareness.clear();
        self.manager.connect(self.preference, flush);
    }

    /// Unacknowledged events from the last transport, then whatever the
    /// store still has queued.
    fn flush_request(&mut self) -> Option<FallbackRequest> {
        let mut messages = std::mem::take(&mut self.unacknowledged);
        if let Some(pending) = self.store.take_pending_for_flush() {
            messages.extend(pending.messages);
        }
        if messages.is_empty() {
            return None;
        }
        Some(FallbackRequest {
            version: self.store.version(),
            client_id: self.store.client_id().map(str::to_string),
            messages,
        })
    }

    fn schedule_reconnect(&mut self, delay: Option<Duration>) {
        if !self.wanted {
            return;
        }
        match delay {
            Some(delay) => {
                info!(delay_ms = delay.as_millis() as u64, "reconnecting");
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => warn!("not reconnecting: permission denied"),
        }
    }

    fn schedule_flushes(&mut self) {
        if self.store.has_pending() {
            self.edits.schedule();
        }
        if self.store.has_awareness_update() {
            self.awareness.schedule();
        }
    }

    fn flush_edits(&mut self) {
        if self.manager.state() != ConnectionState::Open {
            return;
        }
        let events = self.store.drain_outgoing();
        let count = events.len();
        if count > 0 && !self.manager.send(events) {
            warn!(count, "transport refused outgoing batch");
        }
    }

    fn flush_awareness(&mut self) {
        if self.manager.state() != ConnectionState::Open {
            return;
        }
        if let Some(event) = self.store.take_awareness_event() {
            self.manager.send(vec![event]);
        }
    }

    /// Send whatever the throttle was holding, then tear down.
    async fn close(&mut self) {
        self.reconnect_at = None;
        self.edits.clear();
        self.awareness.clear();
        let batch = if self.manager.state() == ConnectionState::Open {
            self.store.drain_outgoing()
        } else {
            Vec::new()
        };
        self.manager.disconnect(batch).await;
    }

    fn publish(&self) {
        let state = self.manager.state();
        let transport = self.manager.transport_kind();
        let error = self.manager.last_error().map(ConnectionError::category);
        let revision = self.store.revision();
        self.publisher.send_if_modified(|current| {
            let unchanged = current.store.revision == revision
                && current.state == state
                && current.transport == transport
                && current.error == error;
            if unchanged {
                return false;
            }
            *current = SessionSnapshot { store: self.store.snapshot(), state, transport, error };
            true
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
