//! # tessera-core: In-memory tile map document
//!
//! The document that collaborating editors share: a fixed-size grid of
//! tile layers and object layers plus an ordered list of tilesets.
//!
//! Editing operations queue [`MapEvent`]s which the owner drains with
//! [`TileMap::take_events`]; this is how edits reach the synchronizer
//! in `tessera-collab` without the map holding a reference back to it.
//!
//! ## Modules
//!
//! - [`map`]: `TileMap`, editing operations and change events
//! - [`layer`]: tile layers and object groups
//! - [`tileset`]: tilesets, tile references and cells
//! - [`region`]: sets of touched cell coordinates
//! - [`io`]: JSON map files and the binary snapshot used on the wire

pub mod io;
pub mod layer;
pub mod map;
pub mod region;
pub mod tileset;

use thiserror::Error;

pub use io::{decode_map, encode_map, read_map_file, write_map_file};
pub use layer::{Layer, LayerKind, LayerType, MapObject, ObjectGroup, TileLayer};
pub use map::{MapEvent, TileMap};
pub use region::{Region, TileRect};
pub use tileset::{Cell, TileRef, Tileset, TilesetId};

/// Errors raised by document operations and map I/O.
#[derive(Error, Debug)]
pub enum MapError {
    #[error("Layer index out of range: {0}")]
    LayerOutOfRange(usize),
    #[error("Layer {0} is not a tile layer")]
    NotATileLayer(usize),
    #[error("Cell ({x}, {y}) is outside layer {layer}")]
    CellOutOfBounds { layer: usize, x: u16, y: u16 },
    #[error("Unknown tileset: {0}")]
    UnknownTileset(TilesetId),
    #[error("Tile layer {layer} holds {actual} cells, expected {expected}")]
    CorruptLayer {
        layer: usize,
        expected: usize,
        actual: usize,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Snapshot encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("Snapshot decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}
