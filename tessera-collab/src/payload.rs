//! Typed payloads for the messages both ends interpret.
//!
//! Integers are big-endian. Strings are a `u32` byte length followed by
//! UTF-8; string lists are a `u32` count followed by strings.

use tessera_core::{LayerType, TileMap};

use crate::error::ProtocolError;
use crate::protocol::{Message, MessageType};

/// Bytes per `(x, y, gid)` entry in a CHANGETILES payload.
pub const TILE_CHANGE_LEN: usize = 8;

const LAYER_KIND_TILE: u16 = 1;
const LAYER_KIND_OBJECT: u16 = 2;

#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn f32(&mut self, value: f32) -> &mut Self {
        self.u32(value.to_bits())
    }

    pub fn string(&mut self, value: &str) -> Result<&mut Self, ProtocolError> {
        let len = u32::try_from(value.len()).map_err(|_| ProtocolError::FieldOverflow {
            field: "string length",
            value: value.len(),
        })?;
        self.u32(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(self)
    }

    pub fn string_list<S: AsRef<str>>(&mut self, values: &[S]) -> Result<&mut Self, ProtocolError> {
        let count = u32::try_from(values.len()).map_err(|_| ProtocolError::FieldOverflow {
            field: "list length",
            value: values.len(),
        })?;
        self.u32(count);
        for value in values {
            self.string(value.as_ref())?;
        }
        Ok(self)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a received payload.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    message: MessageType,
    bytes: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(message: MessageType, bytes: &'a [u8]) -> Self {
        Self { message, bytes }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], ProtocolError> {
        if self.bytes.len() < needed {
            return Err(ProtocolError::Truncated {
                message: self.message,
                needed,
                available: self.bytes.len(),
            });
        }
        let (head, tail) = self.bytes.split_at(needed);
        self.bytes = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub fn string(&mut self) -> Result<String, ProtocolError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(self.message))
    }

    pub fn string_list(&mut self) -> Result<Vec<String>, ProtocolError> {
        let count = self.u32()? as usize;
        // Each string needs at least its length prefix.
        let mut out = Vec::with_capacity(count.min(self.remaining() / 4));
        for _ in 0..count {
            out.push(self.string()?);
        }
        Ok(out)
    }

    /// Require that the payload has been fully consumed.
    pub fn finish(self) -> Result<(), ProtocolError> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingBytes {
                message: self.message,
                count: self.bytes.len(),
            })
        }
    }
}

/// A payload with a fixed message type.
pub trait Payload: Sized {
    const TYPE: MessageType;

    fn write(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError>;

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError>;

    fn to_message(&self) -> Result<Message, ProtocolError> {
        let mut w = PayloadWriter::new();
        self.write(&mut w)?;
        Ok(Message::new(Self::TYPE, w.into_bytes()))
    }

    fn from_message(message: &Message) -> Result<Self, ProtocolError> {
        expect_type(message, Self::TYPE)?;
        let mut r = PayloadReader::new(Self::TYPE, message.payload());
        let value = Self::read(&mut r)?;
        r.finish()?;
        Ok(value)
    }
}

fn expect_type(message: &Message, expected: MessageType) -> Result<(), ProtocolError> {
    if message.id() == expected.id() {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedType {
            expected,
            got: message.id(),
        })
    }
}

fn wire_index(field: &'static str, value: usize) -> Result<u16, ProtocolError> {
    u16::try_from(value).map_err(|_| ProtocolError::FieldOverflow { field, value })
}

/// One cell of a CHANGETILES batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileChange {
    pub x: u16,
    pub y: u16,
    pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeTiles {
    pub layer: u16,
    pub changes: Vec<TileChange>,
}

impl Payload for ChangeTiles {
    const TYPE: MessageType = MessageType::ChangeTiles;

    fn write(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError> {
        w.u16(self.layer);
        for change in &self.changes {
            w.u16(change.x).u16(change.y).u32(change.gid);
        }
        Ok(())
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError> {
        let layer = r.u16()?;
        if r.remaining() % TILE_CHANGE_LEN != 0 {
            return Err(ProtocolError::Misaligned { len: r.remaining() + 2 });
        }
        let mut changes = Vec::with_capacity(r.remaining() / TILE_CHANGE_LEN);
        while !r.is_empty() {
            changes.push(TileChange {
                x: r.u16()?,
                y: r.u16()?,
                gid: r.u32()?,
            });
        }
        Ok(Self { layer, changes })
    }

    fn to_message(&self) -> Result<Message, ProtocolError> {
        let mut w = PayloadWriter::with_capacity(2 + self.changes.len() * TILE_CHANGE_LEN);
        self.write(&mut w)?;
        Ok(Message::new(Self::TYPE, w.into_bytes()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameLayer {
    pub index: u16,
    pub name: String,
}

impl Payload for RenameLayer {
    const TYPE: MessageType = MessageType::RenameLayer;

    fn write(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError> {
        w.u16(self.index).string(&self.name)?;
        Ok(())
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            index: r.u16()?,
            name: r.string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveLayer {
    pub from: u16,
    pub to: u16,
}

impl Payload for MoveLayer {
    const TYPE: MessageType = MessageType::MoveLayer;

    fn write(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError> {
        w.u16(self.from).u16(self.to);
        Ok(())
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            from: r.u16()?,
            to: r.u16()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteLayer {
    pub index: u16,
}

impl Payload for DeleteLayer {
    const TYPE: MessageType = MessageType::DeleteLayer;

    fn write(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError> {
        w.u16(self.index);
        Ok(())
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { index: r.u16()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddLayer {
    pub index: u16,
    pub kind: LayerType,
}

impl Payload for AddLayer {
    const TYPE: MessageType = MessageType::AddLayer;

    fn write(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError> {
        let kind = match self.kind {
            LayerType::Tile => LAYER_KIND_TILE,
            LayerType::Object => LAYER_KIND_OBJECT,
        };
        w.u16(self.index).u16(kind);
        Ok(())
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError> {
        let index = r.u16()?;
        let kind = match r.u16()? {
            LAYER_KIND_TILE => LayerType::Tile,
            LAYER_KIND_OBJECT => LayerType::Object,
            other => return Err(ProtocolError::InvalidLayerKind(other)),
        };
        Ok(Self { index, kind })
    }
}

/// Visibility and opacity of one layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerChanged {
    pub index: u16,
    pub visible: bool,
    pub opacity: f32,
}

impl Payload for LayerChanged {
    const TYPE: MessageType = MessageType::LayerChanged;

    fn write(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError> {
        w.u16(self.index).u8(self.visible as u8).f32(self.opacity);
        Ok(())
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            index: r.u16()?,
            visible: r.u8()? != 0,
            opacity: r.f32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapMetadata {
    pub width: u16,
    pub height: u16,
    pub tile_width: u16,
    pub tile_height: u16,
    pub layer_count: u16,
    pub tileset_count: u16,
}

impl MapMetadata {
    pub fn from_map(map: &TileMap) -> Result<Self, ProtocolError> {
        Ok(Self {
            width: map.width,
            height: map.height,
            tile_width: map.tile_width,
            tile_height: map.tile_height,
            layer_count: wire_index("layer count", map.layer_count())?,
            tileset_count: wire_index("tileset count", map.tilesets().len())?,
        })
    }
}

impl Payload for MapMetadata {
    const TYPE: MessageType = MessageType::RequestMetadataAns;

    fn write(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError> {
        w.u16(self.width)
            .u16(self.height)
            .u16(self.tile_width)
            .u16(self.tile_height)
            .u16(self.layer_count)
            .u16(self.tileset_count);
        Ok(())
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            width: r.u16()?,
            height: r.u16()?,
            tile_width: r.u16()?,
            tile_height: r.u16()?,
            layer_count: r.u16()?,
            tileset_count: r.u16()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionAnswer {
    pub version: u16,
}

impl Payload for VersionAnswer {
    const TYPE: MessageType = MessageType::VersionAns;

    fn write(&self, w: &mut PayloadWriter) -> Result<(), ProtocolError> {
        w.u16(self.version);
        Ok(())
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { version: r.u16()? })
    }
}

/// Encode a message whose whole payload is one string: CHAT, NOT_FOUND,
/// REQUEST_PROJECTDATA, REQUEST_MAP and REQUEST_METADATA.
pub fn name_message(msg_type: MessageType, name: &str) -> Result<Message, ProtocolError> {
    let mut w = PayloadWriter::with_capacity(4 + name.len());
    w.string(name)?;
    Ok(Message::new(msg_type, w.into_bytes()))
}

pub fn read_name(message: &Message, expected: MessageType) -> Result<String, ProtocolError> {
    expect_type(message, expected)?;
    let mut r = PayloadReader::new(expected, message.payload());
    let name = r.string()?;
    r.finish()?;
    Ok(name)
}

/// Encode a message whose whole payload is a string list.
pub fn names_message<S: AsRef<str>>(msg_type: MessageType, names: &[S]) -> Result<Message, ProtocolError> {
    let mut w = PayloadWriter::new();
    w.string_list(names)?;
    Ok(Message::new(msg_type, w.into_bytes()))
}

pub fn read_names(message: &Message, expected: MessageType) -> Result<Vec<String>, ProtocolError> {
    expect_type(message, expected)?;
    let mut r = PayloadReader::new(expected, message.payload());
    let names = r.string_list()?;
    r.finish()?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Tileset;

    #[test]
    fn test_change_tiles_layout() {
        let payload = ChangeTiles {
            layer: 2,
            changes: vec![
                TileChange { x: 1, y: 3, gid: 7 },
                TileChange { x: 0x0102, y: 0, gid: 0x8000_0001 },
            ],
        };
        let msg = payload.to_message().unwrap();
        assert_eq!(msg.message_type(), Some(MessageType::ChangeTiles));
        assert_eq!(
            msg.payload(),
            &[
                0x00, 0x02, //
                0x00, 0x01, 0x00, 0x03, 0x00, 0x00, 0x00, 0x07, //
                0x01, 0x02, 0x00, 0x00, 0x80, 0x00, 0x00, 0x01,
            ]
        );
        assert_eq!(ChangeTiles::from_message(&msg).unwrap(), payload);
    }

    #[test]
    fn test_change_tiles_without_entries() {
        let msg = Message::new(MessageType::ChangeTiles, vec![0, 4]);
        let decoded = ChangeTiles::from_message(&msg).unwrap();
        assert_eq!(decoded.layer, 4);
        assert!(decoded.changes.is_empty());
    }

    #[test]
    fn test_change_tiles_misaligned() {
        let msg = Message::new(MessageType::ChangeTiles, vec![0, 0, 0, 1, 0, 1, 0]);
        assert_eq!(
            ChangeTiles::from_message(&msg).unwrap_err(),
            ProtocolError::Misaligned { len: 7 }
        );
    }

    #[test]
    fn test_change_tiles_truncated() {
        let msg = Message::new(MessageType::ChangeTiles, vec![0]);
        assert!(matches!(
            ChangeTiles::from_message(&msg),
            Err(ProtocolError::Truncated { needed: 2, available: 1, .. })
        ));
    }

    #[test]
    fn test_rename_layer_layout() {
        let msg = RenameLayer { index: 1, name: "Walls".into() }.to_message().unwrap();
        assert_eq!(msg.payload(), &[0, 1, 0, 0, 0, 5, b'W', b'a', b'l', b'l', b's']);
    }

    #[test]
    fn test_rename_layer_invalid_utf8() {
        let msg = Message::new(MessageType::RenameLayer, vec![0, 1, 0, 0, 0, 2, 0xC3, 0x28]);
        assert_eq!(
            RenameLayer::from_message(&msg).unwrap_err(),
            ProtocolError::InvalidUtf8(MessageType::RenameLayer)
        );
    }

    #[test]
    fn test_add_layer_kinds() {
        let msg = AddLayer { index: 3, kind: LayerType::Object }.to_message().unwrap();
        assert_eq!(msg.payload(), &[0, 3, 0, 2]);

        let bad = Message::new(MessageType::AddLayer, vec![0, 3, 0, 9]);
        assert_eq!(AddLayer::from_message(&bad).unwrap_err(), ProtocolError::InvalidLayerKind(9));
    }

    #[test]
    fn test_layer_changed_layout() {
        let change = LayerChanged { index: 0, visible: false, opacity: 0.5 };
        let msg = change.to_message().unwrap();
        assert_eq!(msg.payload(), &[0, 0, 0, 0x3F, 0x00, 0x00, 0x00]);
        assert_eq!(LayerChanged::from_message(&msg).unwrap(), change);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let msg = Message::new(MessageType::DeleteLayer, vec![0, 1, 0xFF]);
        assert_eq!(
            DeleteLayer::from_message(&msg).unwrap_err(),
            ProtocolError::TrailingBytes { message: MessageType::DeleteLayer, count: 1 }
        );
    }

    #[test]
    fn test_wrong_type_rejected() {
        let msg = Message::new(MessageType::MoveLayer, vec![0, 1, 0, 2]);
        assert_eq!(
            DeleteLayer::from_message(&msg).unwrap_err(),
            ProtocolError::UnexpectedType { expected: MessageType::DeleteLayer, got: 0x0051 }
        );
    }

    #[test]
    fn test_name_lists() {
        let msg = names_message(MessageType::RequestProjectsAns, &["default"]).unwrap();
        assert_eq!(
            msg.payload(),
            &[0, 0, 0, 1, 0, 0, 0, 7, b'd', b'e', b'f', b'a', b'u', b'l', b't']
        );
        assert_eq!(read_names(&msg, MessageType::RequestProjectsAns).unwrap(), vec!["default"]);

        let empty = names_message::<&str>(MessageType::RequestProjectDataAns, &[]).unwrap();
        assert_eq!(empty.payload(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_string_list_with_huge_count_is_truncated() {
        let msg = Message::new(MessageType::RequestProjectsAns, vec![0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            read_names(&msg, MessageType::RequestProjectsAns),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_metadata_from_map() {
        let mut map = TileMap::new(40, 30, 16, 16);
        map.add_tileset(Tileset::new("a", 16, 16, 4));
        map.add_layer(0, LayerType::Tile);
        map.add_layer(1, LayerType::Object);

        let meta = MapMetadata::from_map(&map).unwrap();
        let msg = meta.to_message().unwrap();
        assert_eq!(msg.payload(), &[0, 40, 0, 30, 0, 16, 0, 16, 0, 2, 0, 1]);
        assert_eq!(MapMetadata::from_message(&msg).unwrap(), meta);
    }

    #[test]
    fn test_name_message() {
        let msg = name_message(MessageType::RequestMap, "level1").unwrap();
        assert_eq!(read_name(&msg, MessageType::RequestMap).unwrap(), "level1");
        assert!(read_name(&msg, MessageType::Chat).is_err());
    }
}
