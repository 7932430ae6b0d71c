//! # tessera-collab: Collaborative tile map editing over TCP
//!
//! Architecture:
//! ```text
//! ┌──────────────┐                 ┌──────────────┐
//! │ Editor A     │                 │ Editor B     │
//! │ TileMap      │                 │ TileMap      │
//! │   │ events   │                 │   ▲          │
//! │   ▼          │                 │   │ apply    │
//! │ MapSync      │                 │ MapSync      │
//! │ (GidMapper)  │                 │ (GidMapper)  │
//! └──────┬───────┘                 └──────▲───────┘
//!        │ frames                         │ frames
//!        ▼                                │
//! ┌─────────────────────────────────────────────────┐
//! │ SyncServer                                      │
//! │   Connection ──► HubEvent ──► Hub ──► relay     │
//! │                               │                 │
//! │                            MapStore             │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: message type catalogue and the `Message` unit
//! - [`codec`]: frame encoding and the incremental frame decoder
//! - [`payload`]: typed payload layouts
//! - [`connection`]: per-socket reader and writer tasks
//! - [`hub`]: dispatch table and the live connection set
//! - [`server`]: listener, hub loop and configuration
//! - [`store`]: maps served by the hub
//! - [`gid`]: global tile id mapping
//! - [`sync`]: client-side document synchronizer
//! - [`client`]: client connection setup

pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod gid;
pub mod hub;
pub mod payload;
pub mod protocol;
pub mod server;
pub mod store;
pub mod sync;

pub use client::{RemoteSession, SessionOptions};
pub use codec::{encode_frame, FrameDecoder};
pub use connection::{CloseReason, ConnectionEvent, ConnectionHandle, ConnectionId, ConnectionOptions};
pub use error::{
    ConnectionError, FramingError, ProtocolError, SendError, ServerError, SyncError,
    UnknownTileReference,
};
pub use gid::GidMapper;
pub use hub::{Hub, HubEvent, HubStats};
pub use protocol::{Message, MessageType, PROTOCOL_VERSION};
pub use server::{ServerConfig, SyncServer};
pub use store::MapStore;
pub use sync::{MapSynchronizer, SyncEvent};
