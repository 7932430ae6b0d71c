//! Client-side synchronization of one open map.
//!
//! [`MapSynchronizer`] sits between the document and the connection:
//!
//! - local edits made through [`MapSynchronizer::edit`] leave the document
//!   as change events and are encoded into outbound messages
//! - inbound messages are decoded, translated through the [`GidMapper`] and
//!   applied to the document
//!
//! While an inbound message is being applied the synchronizer records its
//! type in `processing`. Document events raised in that window are
//! discarded, so a remote edit is never sent back out.

use tessera_core::{decode_map, MapEvent, Region, TileMap};

use crate::connection::{ConnectionEvent, ConnectionHandle};
use crate::error::{ConnectionError, ProtocolError, SyncError};
use crate::gid::GidMapper;
use crate::payload::{
    self, AddLayer, ChangeTiles, DeleteLayer, LayerChanged, MapMetadata, MoveLayer, Payload,
    RenameLayer, TileChange,
};
use crate::protocol::{Message, MessageType};

/// What the synchronizer reports to the editor.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Connected,
    ConnectionLost(ConnectionError),
    /// Remote cell changes, one event per inbound batch
    RegionApplied { layer: usize, region: Region },
    /// A remote peer added, removed, renamed, moved or restyled a layer
    LayersChanged,
    ProjectList(Vec<String>),
    MapList(Vec<String>),
    /// A map snapshot arrived and replaced the document
    MapOpened { name: Option<String> },
    Metadata(MapMetadata),
    NotFound(String),
    Chat(String),
}

#[derive(Debug, Default)]
pub struct MapSynchronizer {
    outbox: Option<ConnectionHandle>,
    mapper: GidMapper,
    map: Option<TileMap>,
    map_name: Option<String>,
    /// Map requested and not yet answered
    pending_map: Option<String>,
    processing: Option<MessageType>,
}

impl MapSynchronizer {
    /// An offline synchronizer with no document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Go online over `handle` and ask for the project list.
    pub fn attach(&mut self, handle: ConnectionHandle) -> Result<SyncEvent, SyncError> {
        log::info!("Synchronizer attached to connection {}", handle.id());
        self.outbox = Some(handle);
        self.request_projects()?;
        Ok(SyncEvent::Connected)
    }

    pub fn is_online(&self) -> bool {
        self.outbox.as_ref().is_some_and(|h| !h.is_closed())
    }

    pub fn document(&self) -> Option<&TileMap> {
        self.map.as_ref()
    }

    pub fn map_name(&self) -> Option<&str> {
        self.map_name.as_deref()
    }

    pub fn mapper(&self) -> &GidMapper {
        &self.mapper
    }

    /// Type of the inbound message currently being applied.
    pub fn processing(&self) -> Option<MessageType> {
        self.processing
    }

    /// Replace the document, e.g. with a map opened from disk.
    pub fn open_document(&mut self, name: Option<String>, mut map: TileMap) {
        map.take_events();
        self.mapper = GidMapper::from_map(&map);
        self.map = Some(map);
        self.map_name = name;
    }

    // ---------------------------------------------------------------
    // Requests
    // ---------------------------------------------------------------

    fn send(&self, message: Message) -> Result<(), SyncError> {
        let outbox = self.outbox.as_ref().ok_or(SyncError::Offline)?;
        log::debug!("Sending {message}");
        outbox.send(message)?;
        Ok(())
    }

    pub fn request_projects(&self) -> Result<(), SyncError> {
        self.send(Message::empty(MessageType::RequestProjects))
    }

    pub fn request_project(&self, project: &str) -> Result<(), SyncError> {
        self.send(payload::name_message(MessageType::RequestProjectData, project)?)
    }

    /// Ask for a map. The answer replaces the document.
    pub fn request_map(&mut self, name: &str) -> Result<(), SyncError> {
        self.send(payload::name_message(MessageType::RequestMap, name)?)?;
        self.pending_map = Some(name.to_string());
        Ok(())
    }

    pub fn request_metadata(&self, name: &str) -> Result<(), SyncError> {
        self.send(payload::name_message(MessageType::RequestMetadata, name)?)
    }

    pub fn request_version(&self) -> Result<(), SyncError> {
        self.send(Message::empty(MessageType::Version))
    }

    pub fn send_chat(&self, text: &str) -> Result<(), SyncError> {
        self.send(payload::name_message(MessageType::Chat, text)?)
    }

    pub fn ping(&self) -> Result<(), SyncError> {
        self.send(Message::ping())
    }

    // ---------------------------------------------------------------
    // Local edits
    // ---------------------------------------------------------------

    /// Run `f` on the document and publish the resulting changes.
    pub fn edit<R>(&mut self, f: impl FnOnce(&mut TileMap) -> R) -> Result<R, SyncError> {
        let map = self.map.as_mut().ok_or(SyncError::NoDocument)?;
        let result = f(map);
        self.flush_local_changes()?;
        Ok(result)
    }

    /// Drain the document's change events into outbound messages.
    ///
    /// Events raised while an inbound message is applied, or while offline,
    /// are dropped. Returns the number of messages queued.
    pub fn flush_local_changes(&mut self) -> Result<usize, SyncError> {
        let Some(map) = self.map.as_mut() else {
            return Ok(0);
        };
        let events = map.take_events();
        if events.is_empty() {
            return Ok(0);
        }
        if let Some(msg_type) = self.processing {
            log::trace!("Suppressing {} events raised by remote {msg_type:?}", events.len());
            return Ok(0);
        }
        let Some(outbox) = self.outbox.as_ref() else {
            log::debug!("Offline, not publishing {} local changes", events.len());
            return Ok(0);
        };

        if !self.mapper.is_current(map) {
            log::debug!("Tilesets changed, rebuilding gid mapper");
            self.mapper = GidMapper::from_map(map);
        }

        let mut sent = 0;
        for event in events {
            for message in encode_event(&self.mapper, event)? {
                log::debug!("Sending {message}");
                outbox.send(message)?;
                sent += 1;
            }
        }
        Ok(sent)
    }

    // ---------------------------------------------------------------
    // Inbound
    // ---------------------------------------------------------------

    pub fn handle_connection_event(&mut self, event: ConnectionEvent) -> Result<Vec<SyncEvent>, SyncError> {
        match event {
            ConnectionEvent::Message { message, .. } => self.handle_message(&message),
            ConnectionEvent::Closed { reason, .. } => Ok(vec![self.connection_lost(reason.into())]),
        }
    }

    /// Apply one inbound message to the document.
    pub fn handle_message(&mut self, message: &Message) -> Result<Vec<SyncEvent>, SyncError> {
        self.flush_local_changes()?;

        log::debug!("Received {message}");
        self.processing = Some(message.message_type().unwrap_or(MessageType::None));
        let result = self.apply(message);
        // Still guarded: whatever the apply raised is discarded here.
        let flushed = self.flush_local_changes();
        self.processing = None;

        flushed?;
        result
    }

    fn apply(&mut self, message: &Message) -> Result<Vec<SyncEvent>, SyncError> {
        let Some(msg_type) = message.message_type() else {
            log::debug!("Ignoring unknown message id {:#06x}", message.id());
            return Ok(Vec::new());
        };

        match msg_type {
            MessageType::ChangeTiles => self.apply_change_tiles(message),
            MessageType::RenameLayer
            | MessageType::MoveLayer
            | MessageType::DeleteLayer
            | MessageType::AddLayer
            | MessageType::LayerChanged => self.apply_layer_message(msg_type, message),

            MessageType::RequestProjectsAns => Ok(vec![SyncEvent::ProjectList(payload::read_names(
                message, msg_type,
            )?)]),
            MessageType::RequestProjectDataAns => Ok(vec![SyncEvent::MapList(payload::read_names(
                message, msg_type,
            )?)]),
            MessageType::RequestMapAns => {
                let map = decode_map(message.payload())
                    .map_err(|e| ProtocolError::InvalidMap(e.to_string()))?;
                let name = self.pending_map.take();
                log::info!(
                    "Opened map {} ({}x{}, {} layers)",
                    name.as_deref().unwrap_or("<unnamed>"),
                    map.width,
                    map.height,
                    map.layer_count()
                );
                self.open_document(name.clone(), map);
                Ok(vec![SyncEvent::MapOpened { name }])
            }
            MessageType::RequestMetadataAns => {
                Ok(vec![SyncEvent::Metadata(MapMetadata::from_message(message)?)])
            }
            MessageType::NotFound => {
                let name = payload::read_name(message, msg_type)?;
                if self.pending_map.as_deref() == Some(name.as_str()) {
                    self.pending_map = None;
                }
                Ok(vec![SyncEvent::NotFound(name)])
            }
            MessageType::Chat => Ok(vec![SyncEvent::Chat(payload::read_name(message, msg_type)?)]),
            MessageType::Ping => {
                self.send(Message::empty(MessageType::PingAns))?;
                Ok(Vec::new())
            }
            _ => {
                log::debug!("No handler for {msg_type:?}");
                Ok(Vec::new())
            }
        }
    }

    /// Apply a CHANGETILES batch, all or nothing.
    ///
    /// A tile the mapper cannot resolve means this peer's copy has drifted
    /// from the sender's; the map is requested again.
    fn apply_change_tiles(&mut self, message: &Message) -> Result<Vec<SyncEvent>, SyncError> {
        let batch = ChangeTiles::from_message(message)?;
        let Some(map) = self.map.as_mut() else {
            log::debug!("No document open, ignoring remote tile changes");
            return Ok(Vec::new());
        };
        if !self.mapper.is_current(map) {
            self.mapper = GidMapper::from_map(map);
        }

        let layer = batch.layer as usize;
        let mut resolved = Vec::with_capacity(batch.changes.len());
        let mut failure = map.tile_layer(layer).err().map(SyncError::from);
        for TileChange { x, y, gid } in batch.changes {
            if failure.is_some() {
                break;
            }
            let cell = match self.mapper.gid_to_cell(gid) {
                Ok(cell) => cell,
                Err(e) => {
                    failure = Some(SyncError::from(e));
                    break;
                }
            };
            if let Err(e) = map.check_cell(layer, x, y) {
                failure = Some(SyncError::from(e));
                break;
            }
            resolved.push((x, y, cell));
        }
        if let Some(e) = failure {
            log::warn!("Rejected remote tile changes on layer {layer}: {e}");
            self.request_resync();
            return Err(e);
        }

        if resolved.is_empty() {
            return Ok(Vec::new());
        }

        let mut region = Region::new();
        for (x, y, cell) in resolved {
            map.set_cell(layer, x, y, cell)?;
            region.add_cell(x, y);
        }
        log::debug!("Applied {} remote cells on layer {layer}", region.len());
        Ok(vec![SyncEvent::RegionApplied { layer, region }])
    }

    fn apply_layer_message(&mut self, msg_type: MessageType, message: &Message) -> Result<Vec<SyncEvent>, SyncError> {
        let Some(map) = self.map.as_mut() else {
            log::debug!("No document open, ignoring remote {msg_type:?}");
            return Ok(Vec::new());
        };

        match msg_type {
            MessageType::RenameLayer => {
                let p = RenameLayer::from_message(message)?;
                map.rename_layer(p.index as usize, p.name)?;
            }
            MessageType::MoveLayer => {
                let p = MoveLayer::from_message(message)?;
                map.move_layer(p.from as usize, p.to as usize)?;
            }
            MessageType::DeleteLayer => {
                let p = DeleteLayer::from_message(message)?;
                map.remove_layer(p.index as usize)?;
            }
            MessageType::AddLayer => {
                let p = AddLayer::from_message(message)?;
                map.add_layer(p.index as usize, p.kind);
            }
            MessageType::LayerChanged => {
                let p = LayerChanged::from_message(message)?;
                map.set_layer_visible(p.index as usize, p.visible)?;
                map.set_layer_opacity(p.index as usize, p.opacity)?;
            }
            _ => return Ok(Vec::new()),
        }
        Ok(vec![SyncEvent::LayersChanged])
    }

    /// Ask the server for a fresh copy of the current map.
    fn request_resync(&mut self) {
        let Some(name) = self.map_name.clone() else {
            log::warn!("Document has no server name, cannot resynchronize");
            return;
        };
        match payload::name_message(MessageType::RequestMap, &name)
            .map_err(SyncError::from)
            .and_then(|m| self.send(m))
        {
            Ok(()) => {
                log::info!("Requested fresh copy of map {name}");
                self.pending_map = Some(name);
            }
            Err(e) => log::warn!("Could not request map {name}: {e}"),
        }
    }

    /// Mark the synchronizer offline. The document stays as it was and can
    /// still be edited locally; those edits are not replayed later.
    pub fn connection_lost(&mut self, error: ConnectionError) -> SyncEvent {
        log::warn!("Connection lost: {error}");
        self.outbox = None;
        self.pending_map = None;
        self.processing = None;
        SyncEvent::ConnectionLost(error)
    }
}

fn wire_index(value: usize) -> Result<u16, ProtocolError> {
    u16::try_from(value).map_err(|_| ProtocolError::FieldOverflow {
        field: "layer index",
        value,
    })
}

/// Messages announcing one document event to the other peers.
fn encode_event(mapper: &GidMapper, event: MapEvent) -> Result<Vec<Message>, SyncError> {
    let messages = match event {
        MapEvent::RegionEdited { layer, cells, .. } => {
            if cells.is_empty() {
                return Ok(Vec::new());
            }
            let mut changes = Vec::with_capacity(cells.len());
            for (x, y, cell) in &cells {
                changes.push(TileChange {
                    x: *x,
                    y: *y,
                    gid: mapper.cell_to_gid(cell)?,
                });
            }
            vec![ChangeTiles {
                layer: wire_index(layer)?,
                changes,
            }
            .to_message()?]
        }
        MapEvent::LayerAdded { index, kind, name } => {
            let index = wire_index(index)?;
            // The receiving side names new layers itself.
            vec![
                AddLayer { index, kind }.to_message()?,
                RenameLayer { index, name }.to_message()?,
            ]
        }
        MapEvent::LayerRemoved(index) => vec![DeleteLayer {
            index: wire_index(index)?,
        }
        .to_message()?],
        MapEvent::LayerRenamed { index, name } => vec![RenameLayer {
            index: wire_index(index)?,
            name,
        }
        .to_message()?],
        MapEvent::LayerMoved { from, to } => vec![MoveLayer {
            from: wire_index(from)?,
            to: wire_index(to)?,
        }
        .to_message()?],
        MapEvent::LayerChanged {
            index,
            visible,
            opacity,
        } => vec![LayerChanged {
            index: wire_index(index)?,
            visible,
            opacity,
        }
        .to_message()?],
    };
    Ok(messages)
}
