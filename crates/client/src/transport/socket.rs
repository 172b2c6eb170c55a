// WebSocket transport with ping keepalive and connection-loss detection.

use fieldsync_common::protocol::{CollabEvent, EventBody, WireEvent, CLOSE_CONNECTION_LOSS};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{Opened, Outgoing, TransportContext, TransportEvent, TransportHandle, TransportKind};
use crate::error::ConnectionError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, Message>;
type SocketStream = SplitStream<Socket>;

/// Connect, wait for the INIT message and start the socket task.
pub async fn open(url: &url::Url, ctx: TransportContext) -> Result<Opened, ConnectionError> {
    let handshake_timeout = ctx.timings.handshake_timeout();
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|error| ConnectionError::Handshake(error.to_string()))?;
    if let Some(token) = &ctx.auth_token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|error| ConnectionError::Handshake(error.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (socket, _response) = time::timeout(handshake_timeout, connect_async(request))
        .await
        .map_err(|_| ConnectionError::Handshake("timed out opening socket".into()))?
        .map_err(connect_error)?;
    let (sink, mut stream) = socket.split();

    let handshake = time::timeout(handshake_timeout, first_message(&mut stream))
        .await
        .map_err(|_| ConnectionError::Handshake("timed out waiting for init".into()))??;
    debug!(%url, "socket handshake received");

    let (outgoing, commands) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(sink, stream, commands, ctx));
    Ok(Opened { handle: TransportHandle::new(TransportKind::Socket, outgoing, Some(task)), handshake })
}

fn connect_error(error: tungstenite::Error) -> ConnectionError {
    match &error {
        tungstenite::Error::Http(response) => match response.status().as_u16() {
            401 | 403 => ConnectionError::PermissionDenied,
            503 => ConnectionError::ServerRestarting,
            _ => ConnectionError::Handshake(error.to_string()),
        },
        _ => ConnectionError::Handshake(error.to_string()),
    }
}

async fn first_message(stream: &mut SocketStream) -> Result<WireEvent, ConnectionError> {
    while let Some(frame) = stream.next().await {
        match frame.map_err(|error| ConnectionError::Handshake(error.to_string()))? {
            Message::Text(text) => return Ok(WireEvent::decode(text.as_str())?),
            Message::Close(frame) => {
                let closed = frame.and_then(|frame| {
                    ConnectionError::from_close_code(frame.code.into(), frame.reason.as_str())
                });
                return Err(closed
                    .unwrap_or_else(|| ConnectionError::Handshake("closed before init".into())));
            }
            _ => {}
        }
    }
    Err(ConnectionError::Handshake("socket ended before init".into()))
}

async fn run(
    mut sink: SocketSink,
    mut stream: SocketStream,
    mut commands: mpsc::UnboundedReceiver<Outgoing>,
    ctx: TransportContext,
) {
    let ping_every = ctx.timings.ping_interval();
    let loss_timeout = ctx.timings.connection_loss_timeout();
    let mut keepalive = time::interval_at(Instant::now() + ping_every, ping_every);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Armed by a send, cleared by any inbound frame. Never pushed back while
    // armed.
    let mut loss_deadline: Option<Instant> = None;

    let outcome = loop {
        let loss_timer = async move {
            match loss_deadline {
                Some(deadline) => time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    loss_deadline = None;
                    match WireEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if !ctx.emit(TransportEvent::Message(event)).await {
                                return;
                            }
                        }
                        Err(error) => break Some(ConnectionError::from(error)),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.and_then(|frame| {
                        ConnectionError::from_close_code(frame.code.into(), frame.reason.as_str())
                    });
                }
                Some(Ok(_)) => loss_deadline = None,
                Some(Err(error)) => break Some(ConnectionError::Transport(error.to_string())),
                None => break Some(ConnectionError::ConnectionLost),
            },
            command = commands.recv() => match command {
                Some(Outgoing::Events(events)) => {
                    if let Err(error) = send_events(&mut sink, &events).await {
                        break Some(error);
                    }
                    loss_deadline.get_or_insert(Instant::now() + loss_timeout);
                }
                Some(Outgoing::Disconnect(ack)) => {
                    close(&mut sink, CloseCode::Normal, "").await;
                    let _ = ack.send(());
                    return;
                }
                None => {
                    close(&mut sink, CloseCode::Normal, "").await;
                    return;
                }
            },
            _ = keepalive.tick() => {
                let ping = CollabEvent::new(EventBody::Ping);
                if let Err(error) = send_events(&mut sink, std::slice::from_ref(&ping)).await {
                    break Some(error);
                }
                loss_deadline.get_or_insert(Instant::now() + loss_timeout);
            }
            _ = loss_timer => {
                warn!(timeout_ms = loss_timeout.as_millis() as u64, "no traffic from server, closing socket");
                close(&mut sink, CloseCode::from(CLOSE_CONNECTION_LOSS), "connection loss detected").await;
                break Some(ConnectionError::ConnectionLost);
            }
        }
    };

    debug!(error = ?outcome, "socket closed");
    ctx.emit(TransportEvent::Closed { error: outcome, unacknowledged: Vec::new() }).await;
}

async fn send_events(sink: &mut SocketSink, events: &[CollabEvent]) -> Result<(), ConnectionError> {
    for event in events {
        let text = WireEvent::from(event).encode()?;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|error| ConnectionError::Transport(error.to_string()))?;
    }
    Ok(())
}

async fn close(sink: &mut SocketSink, code: CloseCode, reason: &'static str) {
    let frame = CloseFrame { code, reason: reason.into() };
    if let Err(error) = sink.send(Message::Close(Some(frame))).await {
        debug!(%error, "close frame not sent");
    }
}
