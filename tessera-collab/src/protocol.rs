//! Message model for the collaboration protocol.
//!
//! Every unit on the wire is a [`Message`]: a 16-bit type id plus an opaque
//! payload whose layout depends on the type (see [`crate::payload`]).
//!
//! ```text
//! ┌──────────┬───────────┬──────────────────┐
//! │ type id  │ length    │ payload          │
//! │ 2 bytes  │ 4 bytes   │ `length` bytes   │
//! └──────────┴───────────┴──────────────────┘
//! ```
//!
//! The catalogue is closed: new behaviour gets a new id, existing ids are
//! never overloaded.

use std::fmt;
use std::sync::Arc;

/// Version answered to VERSION requests.
pub const PROTOCOL_VERSION: u16 = 1;

/// Known message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    None = 0x0000,
    Ping = 0x0001,
    PingAns = 0x0002,
    Version = 0x0003,
    VersionAns = 0x0004,
    Information = 0x0005,
    InformationAns = 0x0006,

    /// Free text, relayed to every other peer
    Chat = 0x0010,

    LoginRequest = 0x0020,
    LoginAck = 0x0021,
    LoginAttempt = 0x0022,
    LoginSuccess = 0x0023,
    LoginFailure = 0x0024,

    /// List of projects
    RequestProjects = 0x0030,
    RequestProjectsAns = 0x0031,
    /// List of maps within one project
    RequestProjectData = 0x0032,
    RequestProjectDataAns = 0x0033,
    /// One map, specified by name
    RequestMap = 0x0034,
    RequestMapAns = 0x0035,
    /// Size and layer/tileset counts of one map
    RequestMetadata = 0x0036,
    RequestMetadataAns = 0x0037,
    RequestOpenFile = 0x0038,
    RequestCloseFile = 0x0039,
    /// Answer to a request naming a project or map the server does not hold
    NotFound = 0x003A,

    /// `<layer u16> [<x u16> <y u16> <gid u32>]*`
    ChangeTiles = 0x0040,
    /// `<index u16> <name>`
    RenameLayer = 0x0050,
    /// `<old index u16> <new index u16>`
    MoveLayer = 0x0051,
    /// `<index u16>`
    DeleteLayer = 0x0052,
    /// `<index u16> <kind u16>`
    AddLayer = 0x0053,
    /// `<index u16> <visible u8> <opacity f32>`
    LayerChanged = 0x0054,
}

impl MessageType {
    pub fn from_u16(id: u16) -> Option<Self> {
        use MessageType::*;
        Some(match id {
            0x0000 => None,
            0x0001 => Ping,
            0x0002 => PingAns,
            0x0003 => Version,
            0x0004 => VersionAns,
            0x0005 => Information,
            0x0006 => InformationAns,
            0x0010 => Chat,
            0x0020 => LoginRequest,
            0x0021 => LoginAck,
            0x0022 => LoginAttempt,
            0x0023 => LoginSuccess,
            0x0024 => LoginFailure,
            0x0030 => RequestProjects,
            0x0031 => RequestProjectsAns,
            0x0032 => RequestProjectData,
            0x0033 => RequestProjectDataAns,
            0x0034 => RequestMap,
            0x0035 => RequestMapAns,
            0x0036 => RequestMetadata,
            0x0037 => RequestMetadataAns,
            0x0038 => RequestOpenFile,
            0x0039 => RequestCloseFile,
            0x003A => NotFound,
            0x0040 => ChangeTiles,
            0x0050 => RenameLayer,
            0x0051 => MoveLayer,
            0x0052 => DeleteLayer,
            0x0053 => AddLayer,
            0x0054 => LayerChanged,
            _ => return Option::None,
        })
    }

    pub fn id(self) -> u16 {
        self as u16
    }

    /// Edits the hub forwards verbatim to every peer except the sender.
    pub fn is_relayed(self) -> bool {
        matches!(
            self,
            MessageType::ChangeTiles
                | MessageType::RenameLayer
                | MessageType::MoveLayer
                | MessageType::DeleteLayer
                | MessageType::AddLayer
                | MessageType::LayerChanged
                | MessageType::Chat
        )
    }
}

/// One protocol message.
///
/// The payload is reference-counted so fanning a message out to N peers
/// does not copy it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: u16,
    payload: Arc<[u8]>,
}

impl Message {
    pub fn new(msg_type: MessageType, payload: Vec<u8>) -> Self {
        Self::from_raw(msg_type.id(), payload)
    }

    pub fn empty(msg_type: MessageType) -> Self {
        Self::new(msg_type, Vec::new())
    }

    /// Build a message from a raw id, which may be unknown to this build.
    pub fn from_raw(id: u16, payload: Vec<u8>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    pub fn ping() -> Self {
        Self::empty(MessageType::Ping)
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    /// `None` for ids outside the catalogue.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u16(self.id)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload.to_vec()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message_type() {
            Some(t) => write!(f, "{t:?}({:#06x}, {} bytes)", self.id, self.len()),
            None => write!(f, "Unknown({:#06x}, {} bytes)", self.id, self.len()),
        }
    }
}
