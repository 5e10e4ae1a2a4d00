//! Adapter over the external randomizer client.
//!
//! The WebSocket client itself is an external collaborator; the framework
//! talks to it through the [`RandomizerSocket`] seam and converts whatever
//! it reports into typed [`FrameworkEvent`]s for the main loop. `poll` is
//! pumped from exactly one thread (the polling worker); outbound sends may
//! come from the main thread, which is why the adapter lives behind a
//! mutex handle.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use thiserror::Error;

use crate::types::{ErrorCode, ReceivedItem, ScoutResult, SlotInfo, SlotStatus};

/// Receive items from all sources (own checks, other players, starting
/// inventory).
pub const ITEMS_HANDLING_ALL: u32 = 0b111;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AdapterError {
    #[error("connection attempt failed: {0}")]
    ConnectFailed(String),

    #[error("not connected to a server")]
    NotConnected,
}

/// Everything the underlying client can report during one pump.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    RoomInfo,
    SlotConnected(SlotInfo),
    SlotRefused(Vec<String>),
    ItemReceived(ReceivedItem),
    LocationScouted(Vec<ScoutResult>),
    Disconnected,
    Print(String),
    PrintJson { kind: String, data: Value },
    Bounced(Value),
}

/// Seam for the external WebSocket client. The host links the real
/// implementation; tests script a fake.
pub trait RandomizerSocket: Send {
    fn connect(&mut self, host: &str, port: u16, game: &str, uuid: &str)
    -> Result<(), AdapterError>;
    /// Only valid after a `RoomInfo` event.
    fn connect_slot(&mut self, slot: &str, password: &str, items_handling: u32);
    fn disconnect(&mut self);
    fn is_socket_open(&self) -> bool;
    fn is_slot_authenticated(&self) -> bool;
    /// Pump the client once, returning the callbacks that fired in order.
    fn poll(&mut self) -> Vec<SocketEvent>;
    fn send_location_checks(&mut self, ids: &[i64]);
    fn send_location_scouts(&mut self, ids: &[i64], as_hint: bool);
    fn send_status(&mut self, status: SlotStatus);
    fn send_say(&mut self, text: &str);
    fn send_bounce(&mut self, games: &[String], slots: &[i64], tags: &[String], data: &Value);
}

/// Connection-lifecycle signals surfaced to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleSignal {
    SlotConnected(SlotInfo),
    Disconnected,
}

/// Typed events consumed by the main loop.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameworkEvent {
    ItemReceived(ReceivedItem),
    LocationScout(Vec<ScoutResult>),
    Lifecycle(LifecycleSignal),
    ApMessage { kind: String, message: String },
    Error { code: ErrorCode, message: String, details: String },
}

pub struct ServerAdapter {
    socket: Box<dyn RandomizerSocket>,
    slot: String,
    password: String,
}

/// Shared adapter handle: the polling worker pumps, the main thread sends.
pub type ServerHandle = Arc<Mutex<ServerAdapter>>;

pub fn shared(adapter: ServerAdapter) -> ServerHandle {
    Arc::new(Mutex::new(adapter))
}

pub fn lock(handle: &ServerHandle) -> MutexGuard<'_, ServerAdapter> {
    handle.lock().unwrap_or_else(|e| e.into_inner())
}

impl ServerAdapter {
    pub fn new(socket: Box<dyn RandomizerSocket>) -> Self {
        Self {
            socket,
            slot: String::new(),
            password: String::new(),
        }
    }

    /// Open the socket. Slot credentials are kept for the `RoomInfo`
    /// handshake: `connect_slot` is issued from that callback, per the
    /// client's authentication flow.
    pub fn connect(
        &mut self,
        host: &str,
        port: u16,
        game: &str,
        uuid: &str,
        slot: &str,
        password: &str,
    ) -> Result<(), AdapterError> {
        self.slot = slot.to_string();
        self.password = password.to_string();
        tracing::info!(host, port, game, "connecting to randomizer server");
        self.socket.connect(host, port, game, uuid)
    }

    pub fn disconnect(&mut self) {
        self.socket.disconnect();
    }

    pub fn is_socket_open(&self) -> bool {
        self.socket.is_socket_open()
    }

    pub fn is_slot_authenticated(&self) -> bool {
        self.socket.is_slot_authenticated()
    }

    pub fn send_location_checks(&mut self, ids: &[i64]) {
        self.socket.send_location_checks(ids);
    }

    pub fn send_location_scouts(&mut self, ids: &[i64], as_hint: bool) {
        self.socket.send_location_scouts(ids, as_hint);
    }

    pub fn send_status(&mut self, status: SlotStatus) {
        self.socket.send_status(status);
    }

    pub fn send_say(&mut self, text: &str) {
        self.socket.send_say(text);
    }

    pub fn send_bounce(&mut self, games: &[String], slots: &[i64], tags: &[String], data: &Value) {
        self.socket.send_bounce(games, slots, tags, data);
    }

    /// Pump the client once and convert its callbacks into framework
    /// events.
    pub fn pump(&mut self) -> Vec<FrameworkEvent> {
        let mut events = Vec::new();
        for event in self.socket.poll() {
            match event {
                SocketEvent::RoomInfo => {
                    tracing::debug!(slot = %self.slot, "room info received, authenticating slot");
                    let (slot, password) = (self.slot.clone(), self.password.clone());
                    self.socket
                        .connect_slot(&slot, &password, ITEMS_HANDLING_ALL);
                }
                SocketEvent::SlotConnected(info) => {
                    tracing::info!(slot = %info.slot_name, "slot connected");
                    events.push(FrameworkEvent::Lifecycle(LifecycleSignal::SlotConnected(
                        info,
                    )));
                }
                SocketEvent::SlotRefused(errors) => {
                    tracing::error!(?errors, "slot connection refused");
                    events.push(FrameworkEvent::Error {
                        code: ErrorCode::ConnectionFailed,
                        message: "slot connection refused".to_string(),
                        details: errors.join("; "),
                    });
                }
                SocketEvent::ItemReceived(item) => {
                    events.push(FrameworkEvent::ItemReceived(item));
                }
                SocketEvent::LocationScouted(results) => {
                    events.push(FrameworkEvent::LocationScout(results));
                }
                SocketEvent::Disconnected => {
                    tracing::warn!("server connection lost");
                    events.push(FrameworkEvent::Lifecycle(LifecycleSignal::Disconnected));
                }
                SocketEvent::Print(message) => {
                    events.push(FrameworkEvent::ApMessage {
                        kind: "print".to_string(),
                        message,
                    });
                }
                SocketEvent::PrintJson { kind, data } => {
                    events.push(FrameworkEvent::ApMessage {
                        kind,
                        message: json_text(&data),
                    });
                }
                SocketEvent::Bounced(data) => {
                    events.push(FrameworkEvent::ApMessage {
                        kind: "bounced".to_string(),
                        message: data.to_string(),
                    });
                }
            }
        }
        events
    }
}

/// Concatenate the `text` fields of a print_json node list.
fn json_text(data: &Value) -> String {
    match data.as_array() {
        Some(nodes) => nodes
            .iter()
            .filter_map(|node| node.get("text").and_then(Value::as_str))
            .collect(),
        None => data.to_string(),
    }
}
