//! Error types for the collaboration layer.

use std::io;

use tessera_core::{MapError, TilesetId};
use thiserror::Error;

use crate::connection::ConnectionId;
use crate::protocol::MessageType;

/// Byte-level framing failures. The offending connection is closed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Frame payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: u64, max: u64 },
}

/// A frame whose payload does not match the layout of its type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Truncated {message:?} payload: needed {needed} bytes, {available} available")]
    Truncated {
        message: MessageType,
        needed: usize,
        available: usize,
    },
    #[error("{message:?} payload has {count} trailing bytes")]
    TrailingBytes { message: MessageType, count: usize },
    #[error("CHANGETILES payload of {len} bytes is not a whole number of entries")]
    Misaligned { len: usize },
    #[error("Invalid UTF-8 in {0:?} payload")]
    InvalidUtf8(MessageType),
    #[error("Invalid layer kind: {0}")]
    InvalidLayerKind(u16),
    #[error("Expected {expected:?}, got message id {got:#06x}")]
    UnexpectedType { expected: MessageType, got: u16 },
    #[error("Invalid map snapshot: {0}")]
    InvalidMap(String),
    #[error("{field} value {value} does not fit the wire format")]
    FieldOverflow { field: &'static str, value: usize },
}

/// A tile reference the gid mapper cannot translate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnknownTileReference {
    #[error("Global tile id {0} is outside every tileset range")]
    Gid(u32),
    #[error("Tileset {0} is not part of the mapped document")]
    Tileset(TilesetId),
    #[error("Tile {index} is outside tileset {tileset}")]
    TileIndex { tileset: TilesetId, index: u32 },
}

/// Why a connection could not be established or was lost.
///
/// The display strings are shown to the user as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("The host was not found: {0}")]
    HostNotFound(String),
    #[error("The connection was refused by the peer: {0}")]
    Refused(String),
    #[error("The remote host closed the connection")]
    RemoteClosed,
    #[error("The following error occurred: {0}")]
    Io(String),
}

impl ConnectionError {
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused | io::ErrorKind::TimedOut => {
                ConnectionError::Refused(err.to_string())
            }
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => ConnectionError::RemoteClosed,
            _ => ConnectionError::Io(err.to_string()),
        }
    }
}

/// Failure to enqueue an outbound message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Outbound queue of connection {0} is full")]
    Full(ConnectionId),
    #[error("Connection {0} is closed")]
    Closed(ConnectionId),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Unknown tile reference: {0}")]
    UnknownTile(#[from] UnknownTileReference),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("No map is open")]
    NoDocument,
    #[error("Not connected")]
    Offline,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error("No maps loaded")]
    NoMaps,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_classification() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(matches!(ConnectionError::from_io(&refused), ConnectionError::Refused(_)));

        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(ConnectionError::from_io(&reset), ConnectionError::RemoteClosed);

        let other = io::Error::other("disk on fire");
        assert!(matches!(ConnectionError::from_io(&other), ConnectionError::Io(_)));
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            ConnectionError::RemoteClosed.to_string(),
            "The remote host closed the connection"
        );
        assert_eq!(
            FramingError::PayloadTooLarge { len: 10, max: 4 }.to_string(),
            "Frame payload of 10 bytes exceeds the 4 byte limit"
        );
        assert_eq!(
            UnknownTileReference::TileIndex { tileset: TilesetId(2), index: 9 }.to_string(),
            "Tile 9 is outside tileset #2"
        );
    }
}
