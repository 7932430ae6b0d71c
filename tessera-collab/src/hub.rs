//! Message routing between connected peers.
//!
//! The hub owns the live connection set and is driven by one event stream,
//! so every mutation of that set happens in a single context. Handling is
//! run-to-completion: sends only enqueue, nothing here awaits.
//!
//! | Inbound              | Action                                  |
//! |----------------------|-----------------------------------------|
//! | PING                 | PING_ANS to the sender                  |
//! | VERSION              | VERSION_ANS to the sender               |
//! | REQUEST_PROJECTS     | project list to the sender              |
//! | REQUEST_PROJECTDATA  | map list, or NOT_FOUND                  |
//! | REQUEST_METADATA     | map size and counts, or NOT_FOUND       |
//! | REQUEST_MAP          | map snapshot, or NOT_FOUND              |
//! | edits and CHAT       | relayed to every peer except the sender |
//! | PING_ANS             | ignored                                 |
//! | anything else        | PING to the sender                      |

use std::collections::HashMap;

use tessera_core::encode_map;

use crate::codec::FRAME_HEADER_LEN;
use crate::connection::{CloseReason, ConnectionEvent, ConnectionHandle, ConnectionId};
use crate::error::{ProtocolError, SendError};
use crate::payload::{self, MapMetadata, Payload, VersionAnswer};
use crate::protocol::{Message, MessageType, PROTOCOL_VERSION};
use crate::store::MapStore;

/// Input to the hub loop.
#[derive(Debug)]
pub enum HubEvent {
    Accepted(ConnectionHandle),
    Connection(ConnectionEvent),
}

impl From<ConnectionEvent> for HubEvent {
    fn from(event: ConnectionEvent) -> Self {
        HubEvent::Connection(event)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    /// Inbound bytes including frame headers
    pub total_bytes: u64,
    pub relayed_messages: u64,
    pub answered_requests: u64,
}

pub struct Hub {
    store: MapStore,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    stats: HubStats,
}

impl Hub {
    pub fn new(store: MapStore) -> Self {
        Self {
            store,
            connections: HashMap::new(),
            stats: HubStats::default(),
        }
    }

    pub fn store(&self) -> &MapStore {
        &self.store
    }

    pub fn stats(&self) -> &HubStats {
        &self.stats
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn register(&mut self, handle: ConnectionHandle) {
        log::info!("Peer {} connected from {:?}", handle.id(), handle.peer());
        self.connections.insert(handle.id(), handle);
        self.stats.total_connections += 1;
        self.update_active();
    }

    /// Drop a peer from the live set and close it.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionHandle> {
        let handle = self.connections.remove(&id)?;
        handle.close();
        self.update_active();
        Some(handle)
    }

    pub fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Accepted(handle) => self.register(handle),
            HubEvent::Connection(ConnectionEvent::Message { id, message }) => {
                self.dispatch(id, &message)
            }
            HubEvent::Connection(ConnectionEvent::Closed { id, reason }) => {
                if self.remove(id).is_some() {
                    log::info!("Peer {id} disconnected: {reason}");
                }
            }
        }
    }

    pub fn dispatch(&mut self, from: ConnectionId, message: &Message) {
        self.stats.total_messages += 1;
        self.stats.total_bytes += (FRAME_HEADER_LEN + message.len()) as u64;

        if !self.connections.contains_key(&from) {
            log::debug!("Dropping {message} from unregistered peer {from}");
            return;
        }
        log::debug!("Peer {from}: {message}");

        match message.message_type() {
            Some(t) if t.is_relayed() => self.broadcast(from, message),
            Some(MessageType::PingAns) => {}
            _ => match self.answer(message) {
                Ok(reply) => {
                    if !matches!(
                        reply.message_type(),
                        Some(MessageType::Ping | MessageType::PingAns)
                    ) {
                        self.stats.answered_requests += 1;
                    }
                    self.reply(from, reply);
                }
                Err(e) => {
                    let peer = self.connections.get(&from).and_then(|h| h.peer());
                    log::warn!("Closing peer {from} ({peer:?}): {e}");
                    if let Some(handle) = self.connections.get(&from) {
                        handle.close_with(CloseReason::Protocol(e));
                    }
                    self.remove(from);
                }
            },
        }
    }

    /// Build the reply to a message the hub interprets itself.
    fn answer(&self, message: &Message) -> Result<Message, ProtocolError> {
        let Some(msg_type) = message.message_type() else {
            return Ok(Message::ping());
        };
        match msg_type {
            MessageType::Ping => Ok(Message::empty(MessageType::PingAns)),
            MessageType::Version => VersionAnswer {
                version: PROTOCOL_VERSION,
            }
            .to_message(),
            MessageType::RequestProjects => payload::names_message(
                MessageType::RequestProjectsAns,
                &self.store.project_names(),
            ),
            MessageType::RequestProjectData => {
                let project = payload::read_name(message, msg_type)?;
                if !self.store.has_project(&project) {
                    return not_found(&project);
                }
                payload::names_message(MessageType::RequestProjectDataAns, &self.store.map_names())
            }
            MessageType::RequestMetadata => {
                let name = payload::read_name(message, msg_type)?;
                match self.store.get(&name) {
                    Some(map) => MapMetadata::from_map(map)?.to_message(),
                    None => not_found(&name),
                }
            }
            MessageType::RequestMap => {
                let name = payload::read_name(message, msg_type)?;
                let Some(map) = self.store.get(&name) else {
                    log::warn!("Requested map {name} is not loaded");
                    return not_found(&name);
                };
                match encode_map(map) {
                    Ok(bytes) => {
                        log::debug!("Sending map {name} ({} bytes)", bytes.len());
                        Ok(Message::new(MessageType::RequestMapAns, bytes))
                    }
                    Err(e) => {
                        log::error!("Failed to encode map {name}: {e}");
                        not_found(&name)
                    }
                }
            }
            _ => Ok(Message::ping()),
        }
    }

    fn reply(&mut self, to: ConnectionId, message: Message) {
        let Some(handle) = self.connections.get(&to) else {
            return;
        };
        if let Err(e) = handle.send(message) {
            self.drop_unreachable(e);
        }
    }

    /// Send `message` to every peer except `from`.
    pub fn broadcast(&mut self, from: ConnectionId, message: &Message) {
        let mut failed = Vec::new();
        let mut delivered = 0usize;
        for (id, handle) in &self.connections {
            if *id == from {
                continue;
            }
            match handle.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => failed.push(e),
            }
        }
        self.stats.relayed_messages += 1;
        log::trace!("Relayed {message} from {from} to {delivered} peers");

        for e in failed {
            self.drop_unreachable(e);
        }
    }

    /// A peer that cannot keep up is closed rather than stalling the hub.
    fn drop_unreachable(&mut self, error: SendError) {
        let id = match error {
            SendError::Full(id) => {
                log::warn!("Peer {id} is not reading, closing it");
                if let Some(handle) = self.connections.get(&id) {
                    handle.close_with(CloseReason::SlowConsumer);
                }
                id
            }
            SendError::Closed(id) => id,
        };
        self.remove(id);
    }

    fn update_active(&mut self) {
        self.stats.active_connections = self.connections.len() as u64;
    }
}

fn not_found(name: &str) -> Result<Message, ProtocolError> {
    payload::name_message(MessageType::NotFound, name)
}
