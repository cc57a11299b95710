//! Component B: Client Connection.
//!
//! One live socket to one world. Owns send/receive, a liveness
//! timestamp, protocol-level ping/pong, and graceful close (spec.md
//! §4.B). Built on `axum`'s `WebSocket`, split into sink/stream halves
//! the way the teacher's `discord_proxy::GatewayConnection` splits a
//! `tokio-tungstenite` stream.
//!
//! Cyclic references with the Client Registry are broken the way
//! spec.md §9 describes: a `Connection` never holds a pointer back
//! into the Registry. Instead its reader task forwards
//! [`ConnectionEvent`]s down an `mpsc` channel the Registry owns the
//! receiving end of.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use relay_core::{Credential, RelayMessage, WorldId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How often the server sends a protocol-level ping (spec.md §4.B).
pub const PING_INTERVAL: Duration = Duration::from_secs(20);

/// A connection is considered stale past this much silence.
pub const STALE_AFTER: Duration = Duration::from_secs(60);

/// Depth of the outbound frame channel. `send` treats a full channel
/// as a failed send rather than blocking the caller (spec.md §5's
/// "bounded buffer" suspension point).
const OUTBOUND_CHANNEL_DEPTH: usize = 64;

/// WebSocket close code: a new upgrade named an id already live
/// elsewhere (spec.md §4.C).
pub const CLOSE_DUPLICATE_CONNECTION: u16 = 4004;
/// WebSocket close code: the upgrade carried no `id` query param.
pub const CLOSE_NO_CLIENT_ID: u16 = 4001;
/// WebSocket close code: the upgrade carried no credential.
pub const CLOSE_NO_AUTH: u16 = 4002;
/// WebSocket close code: an internal failure prevented registration.
pub const CLOSE_INTERNAL_ERROR: u16 = 4003;

enum OutboundFrame {
    Json(RelayMessage),
    Close(u16),
}

/// An event a [`Connection`]'s background tasks report to whoever
/// owns the receiving half of the channel (the Client Registry).
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A non-ping message arrived and should be dispatched.
    Message { world_id: WorldId, credential: Credential, message: RelayMessage },
    /// The socket closed or errored; the Registry should evict it.
    Closed { world_id: WorldId },
}

/// A handle to a live connection's send/liveness surface.
///
/// Cheap to clone; all clones share the same underlying socket and
/// liveness state.
#[derive(Clone)]
pub struct Connection {
    world_id: WorldId,
    credential: Credential,
    last_seen: Arc<std::sync::Mutex<Instant>>,
    connected: Arc<AtomicBool>,
    outbound: mpsc::Sender<OutboundFrame>,
}

impl Connection {
    /// Accept an upgraded socket and spawn its reader/writer/pinger
    /// tasks. Returns the [`Connection`] handle the Registry stores.
    ///
    /// `events` receives [`ConnectionEvent`]s for the lifetime of the
    /// connection; the caller (Registry) owns draining it.
    pub fn accept(
        socket: WebSocket,
        world_id: WorldId,
        credential: Credential,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let (sink, stream) = socket.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_DEPTH);
        let last_seen = Arc::new(std::sync::Mutex::new(Instant::now()));
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(run_writer(sink, outbound_rx));
        tokio::spawn(run_pinger(outbound_tx.clone(), connected.clone()));
        tokio::spawn(run_reader(
            stream,
            world_id.clone(),
            credential.clone(),
            last_seen.clone(),
            connected.clone(),
            outbound_tx.clone(),
            events,
        ));

        Self { world_id, credential, last_seen, connected, outbound: outbound_tx }
    }

    /// This connection's world id.
    #[must_use]
    pub fn world_id(&self) -> &WorldId {
        &self.world_id
    }

    /// This connection's owning credential.
    #[must_use]
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Send a message. Returns `false` without raising when the
    /// socket is closed, stale, or the outbound buffer is full
    /// (spec.md §4.B).
    pub fn send(&self, message: RelayMessage) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.outbound.try_send(OutboundFrame::Json(message)).is_ok()
    }

    /// `true` if the socket is open and has been heard from (directly
    /// or via ping/pong) within [`STALE_AFTER`].
    #[must_use]
    pub fn is_alive(&self) -> bool {
        if !self.connected.load(Ordering::Acquire) {
            return false;
        }
        let last_seen = *self.last_seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        last_seen.elapsed() < STALE_AFTER
    }

    /// Record fresh activity, resetting the staleness clock.
    pub fn update_last_seen(&self) {
        *self.last_seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
    }

    /// Gracefully close the socket with the given close code.
    pub fn disconnect(&self, close_code: u16) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let _ = self.outbound.try_send(OutboundFrame::Close(close_code));
        }
    }
}

async fn run_writer(mut sink: SplitSink<WebSocket, Message>, mut outbound_rx: mpsc::Receiver<OutboundFrame>) {
    while let Some(frame) = outbound_rx.recv().await {
        let result = match frame {
            OutboundFrame::Json(message) => match serde_json::to_string(&message) {
                Ok(text) => sink.send(Message::Text(text.into())).await,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound relay message");
                    continue;
                },
            },
            OutboundFrame::Close(code) => {
                let frame =
                    axum::extract::ws::CloseFrame { code, reason: "relay closed connection".into() };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            },
        };
        if result.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn run_pinger(outbound_tx: mpsc::Sender<OutboundFrame>, connected: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(PING_INTERVAL);
    interval.tick().await; // first tick fires immediately; skip it
    loop {
        interval.tick().await;
        if !connected.load(Ordering::Acquire) {
            return;
        }
        if outbound_tx.send(OutboundFrame::Json(RelayMessage::ping())).await.is_err() {
            return;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_reader(
    mut stream: SplitStream<WebSocket>,
    world_id: WorldId,
    credential: Credential,
    last_seen: Arc<std::sync::Mutex<Instant>>,
    connected: Arc<AtomicBool>,
    outbound_tx: mpsc::Sender<OutboundFrame>,
    events: mpsc::Sender<ConnectionEvent>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let parsed: Result<RelayMessage, _> = serde_json::from_str(&text);
                match parsed {
                    Ok(message) if message.is_ping() => {
                        *last_seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
                        let _ = outbound_tx.send(OutboundFrame::Json(RelayMessage::pong())).await;
                    },
                    Ok(message) => {
                        *last_seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
                        if events
                            .send(ConnectionEvent::Message {
                                world_id: world_id.clone(),
                                credential: credential.clone(),
                                message,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    },
                    Err(e) => {
                        // Decode failure: log and continue, never close (spec.md §4.B).
                        debug!(error = %e, world_id = %world_id, "dropped undecodable frame");
                    },
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_)) => {},
            Err(e) => {
                debug!(error = %e, world_id = %world_id, "transport error, closing connection");
                break;
            },
        }
    }

    if connected.swap(false, Ordering::AcqRel) {
        let _ = events.send(ConnectionEvent::Closed { world_id }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_after_is_sixty_seconds_per_spec() {
        assert_eq!(STALE_AFTER, Duration::from_secs(60));
    }

    #[test]
    fn ping_interval_is_twenty_seconds_per_spec() {
        assert_eq!(PING_INTERVAL, Duration::from_secs(20));
    }

    #[test]
    fn close_codes_are_distinct() {
        let codes =
            [CLOSE_NO_CLIENT_ID, CLOSE_NO_AUTH, CLOSE_DUPLICATE_CONNECTION, CLOSE_INTERNAL_ERROR];
        for (i, a) in codes.iter().enumerate() {
            for (j, b) in codes.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b);
                }
            }
        }
    }
}
