//! Reference relay for the document channel.
//!
//! ```text
//! Session A ──┐                                   ┌──► Session B
//!             ├── /wsapp/document/{id} ── Room ───┤
//! Session B ──┘     (content, version, fan-out)   └──► Session C
//! ```
//!
//! Stands in for the production channel server during development and in
//! tests. Each note gets a room holding its latest content and version. An
//! `updateNote` is accepted only when it carries exactly the room's version
//! plus one; the room then adopts the payload and relays it as an
//! `updateNotification` to every other member. Nothing is persisted and a
//! room is forgotten as soon as its last member leaves.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};

use crate::config::RelayConfig;
use crate::protocol::{ClientMessage, ServerMessage};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Relay statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub accepted_updates: u64,
    pub rejected_updates: u64,
    pub active_rooms: usize,
}

/// Point-in-time view of one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub content: String,
    pub version: u64,
    pub members: usize,
}

/// A frame on its way to a room's members, tagged with the connection it
/// came from so that it is not sent back there.
#[derive(Debug, Clone)]
struct Relayed {
    origin: u64,
    text: Utf8Bytes,
}

struct Room {
    content: String,
    version: u64,
    members: usize,
    fanout: broadcast::Sender<Relayed>,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (fanout, _) = broadcast::channel(capacity);
        Self {
            content: String::new(),
            version: 0,
            members: 0,
            fanout,
        }
    }
}

type Rooms = Arc<RwLock<HashMap<String, Room>>>;

pub struct RelayServer {
    config: RelayConfig,
    rooms: Rooms,
    stats: Arc<RwLock<RelayStats>>,
    next_connection: Arc<AtomicU64>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(RelayStats::default())),
            next_connection: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Bind to the configured address and serve until an accept fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections arriving on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        log::info!(
            "Relay listening on {} under {}",
            listener.local_addr()?,
            self.config.document_path
        );

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();
            let conn_id = self.next_connection.fetch_add(1, Ordering::Relaxed);

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, conn_id, rooms, stats, config).await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        conn_id: u64,
        rooms: Rooms,
        stats: Arc<RwLock<RelayStats>>,
        config: RelayConfig,
    ) -> Result<(), BoxError> {
        let prefix = format!("{}/", config.document_path.trim_end_matches('/'));
        let mut note_key: Option<String> = None;

        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            match req.uri().path().strip_prefix(prefix.as_str()) {
                Some(id) if !id.is_empty() && !id.contains('/') => {
                    note_key = Some(id.to_string());
                    Ok(resp)
                }
                _ => {
                    let mut reject = ErrorResponse::new(Some("unknown document path".to_string()));
                    *reject.status_mut() = StatusCode::NOT_FOUND;
                    Err(reject)
                }
            }
        })
        .await?;
        let Some(note_key) = note_key else {
            return Ok(());
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Join the room, catching up on its current content if it has any.
        let (mut relay_rx, welcome) = {
            let mut rooms_w = rooms.write().await;
            let room = rooms_w.entry(note_key.clone()).or_insert_with(|| {
                log::info!("Room {note_key} opened");
                Room::new(config.broadcast_capacity)
            });
            room.members += 1;
            let welcome = (room.version > 0)
                .then(|| ServerMessage::notification(room.content.clone(), room.version));
            let rx = room.fanout.subscribe();
            let room_count = rooms_w.len();
            stats.write().await.active_rooms = room_count;
            (rx, welcome)
        };
        log::info!("Connection {conn_id} from {addr} joined note {note_key}");

        let result = async {
            if let Some(welcome) = welcome {
                ws_sender.send(Message::Text(welcome.encode()?.into())).await?;
            }

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            stats.write().await.total_frames += 1;
                            Self::on_client_frame(text.as_str(), conn_id, &note_key, &rooms, &stats).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection {conn_id} closed");
                            break;
                        }
                        Some(Ok(_)) => {
                            log::debug!("Ignoring non-text frame from connection {conn_id}");
                        }
                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }
                    },

                    relayed = relay_rx.recv() => match relayed {
                        Ok(relayed) => {
                            // Never echo to the sender
                            if relayed.origin == conn_id {
                                continue;
                            }
                            ws_sender.send(Message::Text(relayed.text)).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Connection {conn_id} lagged by {n} updates");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            Ok::<(), BoxError>(())
        }
        .await;

        Self::leave(&note_key, &rooms, &stats).await;
        result
    }

    async fn on_client_frame(
        text: &str,
        conn_id: u64,
        note_key: &str,
        rooms: &Rooms,
        stats: &Arc<RwLock<RelayStats>>,
    ) {
        let (payload, version) = match ClientMessage::decode(text) {
            Ok(ClientMessage::Heartbeat) => {
                log::trace!("Heartbeat from connection {conn_id}");
                return;
            }
            Ok(ClientMessage::UpdateNote { payload, version }) => (payload, version),
            Err(e) => {
                log::warn!("Dropping frame from connection {conn_id}: {e}");
                return;
            }
        };

        let mut rooms_w = rooms.write().await;
        let Some(room) = rooms_w.get_mut(note_key) else {
            return;
        };

        if version != room.version + 1 {
            log::debug!(
                "Dropping update v{version} for note {note_key}: room is at v{}",
                room.version
            );
            stats.write().await.rejected_updates += 1;
            return;
        }

        let notification = match ServerMessage::notification(payload.as_str(), version).encode() {
            Ok(text) => text,
            Err(e) => {
                log::error!("{e}");
                return;
            }
        };
        room.content = payload;
        room.version = version;
        // Sent under the room lock so members see versions in order.
        let _ = room.fanout.send(Relayed {
            origin: conn_id,
            text: notification.into(),
        });
        stats.write().await.accepted_updates += 1;
    }

    async fn leave(note_key: &str, rooms: &Rooms, stats: &Arc<RwLock<RelayStats>>) {
        let mut rooms_w = rooms.write().await;
        if let Some(room) = rooms_w.get_mut(note_key) {
            room.members = room.members.saturating_sub(1);
            if room.members == 0 {
                rooms_w.remove(note_key);
                log::info!("Room {note_key} removed (empty)");
            }
        }

        let mut s = stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
        s.active_rooms = rooms_w.len();
    }

    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    pub async fn room(&self, note_id: &str) -> Option<RoomSnapshot> {
        self.rooms.read().await.get(note_id).map(|room| RoomSnapshot {
            content: room.content.clone(),
            version: room.version,
            members: room.members,
        })
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout, Duration};
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start_relay() -> (Arc<RelayServer>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = Arc::new(RelayServer::with_defaults());
        let server = relay.clone();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });
        (relay, addr)
    }

    async fn connect(addr: SocketAddr, note: &str) -> Client {
        let url = format!("ws://{addr}/wsapp/document/{note}");
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws
    }

    async fn send(ws: &mut Client, msg: ClientMessage) {
        ws.send(Message::Text(msg.encode().unwrap().into())).await.unwrap();
    }

    async fn recv(ws: &mut Client) -> ServerMessage {
        loop {
            let msg = timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for relay")
                .unwrap()
                .unwrap();
            if let Message::Text(text) = msg {
                return ServerMessage::decode(text.as_str()).unwrap();
            }
        }
    }

    async fn assert_silent(ws: &mut Client) {
        assert!(timeout(Duration::from_millis(150), ws.next()).await.is_err());
    }

    async fn wait_for_members(relay: &RelayServer, note: &str, members: usize) {
        for _ in 0..100 {
            if relay.room(note).await.map_or(0, |r| r.members) == members {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("room {note} never reached {members} members");
    }

    #[test]
    fn test_relay_creation() {
        let relay = RelayServer::with_defaults();
        assert_eq!(relay.bind_addr(), "127.0.0.1:9090");
    }

    #[tokio::test]
    async fn test_update_relayed_to_others_only() {
        let (relay, addr) = start_relay().await;
        let mut alice = connect(addr, "n1").await;
        let mut bob = connect(addr, "n1").await;
        wait_for_members(&relay, "n1", 2).await;

        send(&mut alice, ClientMessage::update("hello", 1)).await;
        assert_eq!(recv(&mut bob).await, ServerMessage::notification("hello", 1));
        assert_silent(&mut alice).await;

        let room = relay.room("n1").await.unwrap();
        assert_eq!(room.content, "hello");
        assert_eq!(room.version, 1);
    }

    #[tokio::test]
    async fn test_only_next_version_accepted() {
        let (relay, addr) = start_relay().await;
        let mut alice = connect(addr, "n2").await;
        let mut bob = connect(addr, "n2").await;
        wait_for_members(&relay, "n2", 2).await;

        send(&mut alice, ClientMessage::update("skips ahead", 3)).await;
        send(&mut alice, ClientMessage::update("first", 1)).await;
        assert_eq!(recv(&mut bob).await, ServerMessage::notification("first", 1));

        send(&mut bob, ClientMessage::update("stale", 1)).await;
        send(&mut bob, ClientMessage::update("second", 2)).await;
        assert_eq!(recv(&mut alice).await, ServerMessage::notification("second", 2));

        let stats = relay.stats().await;
        assert_eq!(stats.accepted_updates, 2);
        assert_eq!(stats.rejected_updates, 2);
    }

    #[tokio::test]
    async fn test_joiner_receives_current_content() {
        let (relay, addr) = start_relay().await;
        let mut alice = connect(addr, "n3").await;
        wait_for_members(&relay, "n3", 1).await;
        send(&mut alice, ClientMessage::update("draft", 1)).await;
        send(&mut alice, ClientMessage::Heartbeat).await;

        for _ in 0..100 {
            if relay.room("n3").await.map(|r| r.version) == Some(1) {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        let mut carol = connect(addr, "n3").await;
        assert_eq!(recv(&mut carol).await, ServerMessage::notification("draft", 1));
    }

    #[tokio::test]
    async fn test_fresh_room_sends_nothing_on_join() {
        let (_relay, addr) = start_relay().await;
        let mut alice = connect(addr, "n4").await;
        assert_silent(&mut alice).await;
    }

    #[tokio::test]
    async fn test_empty_room_is_discarded() {
        let (relay, addr) = start_relay().await;
        let mut alice = connect(addr, "n5").await;
        wait_for_members(&relay, "n5", 1).await;
        send(&mut alice, ClientMessage::update("gone soon", 1)).await;
        alice.close(None).await.unwrap();

        for _ in 0..100 {
            if relay.room("n5").await.is_none() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(relay.room("n5").await.is_none());

        // The version starts over.
        let mut bob = connect(addr, "n5").await;
        assert_silent(&mut bob).await;
    }

    #[tokio::test]
    async fn test_unknown_path_rejected() {
        let (_relay, addr) = start_relay().await;
        let result = tokio_tungstenite::connect_async(format!("ws://{addr}/elsewhere/x")).await;
        assert!(result.is_err());
    }
}
