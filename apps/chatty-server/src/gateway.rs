use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use dashmap::DashMap;
use event_bus::{Bus, BusResult};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, decrement_gauge, increment_gauge};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bridge::EVENT_CHANNEL;
use crate::error::ApiError;
use crate::handlers::AppState;
use crate::protocol::{BusEvent, ClientFrame, ServerFrame};

/// Opaque token assigned to a connection at accept time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Live connection states. `Closed` is terminal and represented by absence
/// from the registry; `Registry::close` is the only transition into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Open,
}

struct ConnHandle {
    tx: mpsc::UnboundedSender<ServerFrame>,
    state: ConnState,
    rooms: HashSet<String>,
}

/// Local map of live connections. Owned exclusively by this process; mutated
/// only through these methods, from gateway tasks.
pub struct Registry {
    connections: DashMap<ConnectionId, ConnHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection in state `Connecting`.
    pub fn register(&self, tx: mpsc::UnboundedSender<ServerFrame>) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections.insert(
            id.clone(),
            ConnHandle {
                tx,
                state: ConnState::Connecting,
                rooms: HashSet::new(),
            },
        );
        id
    }

    /// `Connecting -> Open`. Returns false for any other transition; states
    /// only move forward.
    pub fn mark_open(&self, id: &ConnectionId) -> bool {
        match self.connections.get_mut(id) {
            Some(mut conn) if conn.state == ConnState::Connecting => {
                conn.state = ConnState::Open;
                true
            }
            _ => false,
        }
    }

    /// Terminal transition. Idempotent: true exactly once per connection, no
    /// matter how many close signals arrive.
    pub fn close(&self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    pub fn state(&self, id: &ConnectionId) -> Option<ConnState> {
        self.connections.get(id).map(|conn| conn.state)
    }

    pub fn join(&self, id: &ConnectionId, room: String) {
        if let Some(mut conn) = self.connections.get_mut(id) {
            conn.rooms.insert(room);
        }
    }

    pub fn leave(&self, id: &ConnectionId, room: &str) {
        if let Some(mut conn) = self.connections.get_mut(id) {
            conn.rooms.remove(room);
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Deliver one event to every open connection matching its selector,
    /// exactly once each. A connection whose channel is gone is closed; the
    /// others are unaffected.
    pub fn deliver(&self, event: BusEvent) {
        let frame = event.clone().into_frame();
        let mut stale = Vec::new();
        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.state != ConnState::Open {
                continue;
            }
            if let Some(room) = &event.room {
                if !conn.rooms.contains(room) {
                    continue;
                }
            }
            if conn.tx.send(frame.clone()).is_err() {
                stale.push(entry.key().clone());
            } else {
                counter!("chatty_events_delivered_total", 1);
            }
        }
        // Remove after iteration; removing under a held shard guard deadlocks.
        for id in stale {
            warn!(connection = id.as_str(), "dropping connection with closed channel");
            self.close(&id);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// One process's connection gateway: the local registry plus the bus that
/// fans events out to (and in from) every other process.
pub struct Gateway {
    registry: Registry,
    bus: Arc<dyn Bus>,
}

impl Gateway {
    pub fn new(bus: Arc<dyn Bus>) -> Arc<Self> {
        Arc::new(Self {
            registry: Registry::new(),
            bus,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Publish an event to the whole fleet. Fire-and-forget: at-most-once,
    /// no retry. Local connections receive it through the subscribe path
    /// like everyone else's, so one broadcast is one delivery per matching
    /// connection.
    pub async fn broadcast(&self, event: &BusEvent) -> BusResult<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|err| event_bus::BusError::Transport(err.to_string()))?;
        counter!("chatty_events_published_total", 1);
        self.bus.publish(EVENT_CHANNEL, payload.into()).await
    }

    /// Consume the bus and re-emit every event to matching local
    /// connections, in bus receive order.
    pub fn spawn_bus_ingest(self: &Arc<Self>) -> JoinHandle<()> {
        let mut sub = self.bus.subscribe();
        let gateway = self.clone();
        tokio::spawn(async move {
            loop {
                match sub.recv().await {
                    Ok(msg) => {
                        if msg.channel != EVENT_CHANNEL {
                            continue;
                        }
                        match serde_json::from_slice::<BusEvent>(&msg.payload) {
                            Ok(event) => gateway.registry.deliver(event),
                            Err(err) => {
                                warn!(error = %err, "ignoring undecodable bus event")
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "bus ingest lagged; events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Comma-separated rooms to join on accept.
    rooms: Option<String>,
}

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let rooms = match query.rooms.as_deref() {
        None => Vec::new(),
        Some(list) => {
            let rooms: Vec<String> = list.split(',').map(str::to_string).collect();
            if rooms.iter().any(String::is_empty) {
                return Err(ApiError::BadRequest("rooms must not be empty".to_string()));
            }
            rooms
        }
    };
    let gateway = state.gateway.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, gateway, rooms)))
}

/// Drive a single accepted connection: `Connecting -> Open -> Closed`. Any
/// exit path, peer close or transport error, closes only this connection.
async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>, rooms: Vec<String>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    let id = gateway.registry().register(tx.clone());
    for room in rooms {
        gateway.registry().join(&id, room);
    }
    gateway.registry().mark_open(&id);
    increment_gauge!("chatty_open_connections", 1.0);
    debug!(connection = id.as_str(), "websocket open");

    let writer_id = id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "failed to serialize outbound frame"),
            }
        }
        debug!(connection = writer_id.as_str(), "writer task ended");
    });

    while let Some(result) = stream.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(err) => {
                warn!(connection = id.as_str(), error = %err, "websocket transport error");
                break;
            }
        };
        match msg {
            Message::Text(text) => handle_client_frame(&gateway, &id, &tx, &text).await,
            Message::Binary(data) => {
                // JSON frames over binary are accepted for client convenience.
                if let Ok(text) = std::str::from_utf8(&data) {
                    handle_client_frame(&gateway, &id, &tx, text).await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    gateway.registry().close(&id);
    decrement_gauge!("chatty_open_connections", 1.0);
    drop(tx);
    let _ = writer.await;
    debug!(connection = id.as_str(), "websocket closed");
}

async fn handle_client_frame(
    gateway: &Arc<Gateway>,
    id: &ConnectionId,
    tx: &mpsc::UnboundedSender<ServerFrame>,
    text: &str,
) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Join { room }) => gateway.registry().join(id, room),
        Ok(ClientFrame::Leave { room }) => gateway.registry().leave(id, &room),
        Ok(ClientFrame::Emit { event, room, body }) => {
            let event = BusEvent { event, room, body };
            if let Err(err) = gateway.broadcast(&event).await {
                // Degraded, not fatal: the event is dropped by contract.
                warn!(connection = id.as_str(), error = %err, "broadcast dropped");
            }
        }
        Ok(ClientFrame::Ping) => {
            let _ = tx.send(ServerFrame::Pong);
        }
        Err(err) => {
            let _ = tx.send(ServerFrame::Error {
                message: format!("invalid frame: {err}"),
            });
        }
    }
}
