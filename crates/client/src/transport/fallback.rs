// HTTP polling fallback, used when no socket can be opened.
//
// Outgoing events are buffered and submitted with the next poll; the poll
// response carries every event the server saw since our version. A batch
// stays buffered until a poll carrying it succeeds, and is handed back to
// the session if the transport closes first. Ephemeral events are never
// sent this way.

use fieldsync_common::protocol::{CollabEvent, FallbackRequest, FallbackResponse};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::{
    authorized, fetch_init, post_events, Opened, Outgoing, TransportContext, TransportEvent,
    TransportHandle, TransportKind,
};
use crate::error::ConnectionError;

/// Fetch the INIT snapshot and start polling.
pub async fn open(
    client: &reqwest::Client,
    url: &url::Url,
    ctx: TransportContext,
) -> Result<Opened, ConnectionError> {
    let handshake = fetch_init(client, url, &ctx).await?;
    let poller = Poller {
        client: client.clone(),
        url: url.clone(),
        version: handshake.version.unwrap_or_default(),
        client_id: handshake.client_id.clone(),
    };

    let (outgoing, commands) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(poller, commands, ctx));
    Ok(Opened { handle: TransportHandle::new(TransportKind::Fallback, outgoing, Some(task)), handshake })
}

struct Poller {
    client: reqwest::Client,
    url: url::Url,
    version: u64,
    client_id: Option<String>,
}

impl Poller {
    /// Submit `buffer` and read what the server has for us. The buffer is
    /// emptied only when the server answered.
    async fn poll(
        &mut self,
        buffer: &mut Vec<CollabEvent>,
        ctx: &TransportContext,
    ) -> Result<FallbackResponse, ConnectionError> {
        let request = FallbackRequest {
            version: self.version,
            client_id: self.client_id.clone(),
            messages: std::mem::take(buffer),
        };
        match self.submit(&request, ctx).await {
            Ok(response) => {
                self.version = self.version.max(response.version);
                Ok(response)
            }
            Err(error) => {
                *buffer = request.messages;
                Err(error)
            }
        }
    }

    async fn submit(
        &self,
        request: &FallbackRequest,
        ctx: &TransportContext,
    ) -> Result<FallbackResponse, ConnectionError> {
        let response = authorized(self.client.post(self.url.clone()), ctx.auth_token.as_deref())
            .timeout(ctx.timings.handshake_timeout())
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response)
    }

    async fn flush(&self, messages: Vec<CollabEvent>, ctx: &TransportContext) {
        let request =
            FallbackRequest { version: self.version, client_id: self.client_id.clone(), messages };
        let timeout = ctx.timings.handshake_timeout();
        if let Err(error) =
            post_events(&self.client, &self.url, ctx.auth_token.as_deref(), timeout, &request).await
        {
            warn!(%error, "final fallback flush failed");
        }
    }
}

async fn run(
    mut poller: Poller,
    mut commands: mpsc::UnboundedReceiver<Outgoing>,
    ctx: TransportContext,
) {
    let every = ctx.timings.fallback_poll_interval();
    let mut ticker = time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buffer: Vec<CollabEvent> = Vec::new();

    let outcome = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Outgoing::Events(events)) => {
                    buffer.extend(events.into_iter().filter(|event| !event.kind().is_ephemeral()));
                }
                Some(Outgoing::Disconnect(ack)) => {
                    if !buffer.is_empty() {
                        poller.flush(std::mem::take(&mut buffer), &ctx).await;
                    }
                    let _ = ack.send(());
                    return;
                }
                None => return,
            },
            _ = ticker.tick() => {
                let sent = buffer.len();
                match poller.poll(&mut buffer, &ctx).await {
                    Ok(response) => {
                        debug!(sent, received = response.messages.len(), version = response.version, "fallback poll");
                        for message in response.messages {
                            if !ctx.emit(TransportEvent::Message(message)).await {
                                return;
                            }
                        }
                        let sync = TransportEvent::Sync { version: response.version, clients: response.clients };
                        if !ctx.emit(sync).await {
                            return;
                        }
                    }
                    Err(error) => {
                        warn!(%error, unacknowledged = sent, "fallback poll failed");
                        break Some(error);
                    }
                }
            }
        }
    };

    ctx.emit(TransportEvent::Closed { error: outcome, unacknowledged: buffer }).await;
}
