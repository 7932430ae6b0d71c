//! Tilesets and the cells that reference them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Map-local handle of a tileset.
///
/// Assigned by [`TileMap::add_tileset`](crate::TileMap::add_tileset) and
/// stable for the lifetime of the map, independent of tileset order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TilesetId(pub u32);

impl fmt::Display for TilesetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tileset {
    pub id: TilesetId,
    pub name: String,
    pub tile_width: u16,
    pub tile_height: u16,
    pub tile_count: u32,
    /// Path of the tileset image, relative to the map file
    pub image_source: Option<String>,
}

impl Tileset {
    /// Create a tileset. The id is assigned when it is added to a map.
    pub fn new(name: impl Into<String>, tile_width: u16, tile_height: u16, tile_count: u32) -> Self {
        Self {
            id: TilesetId(0),
            name: name.into(),
            tile_width,
            tile_height,
            tile_count,
            image_source: None,
        }
    }

    pub fn with_image(mut self, source: impl Into<String>) -> Self {
        self.image_source = Some(source.into());
        self
    }

    pub fn contains(&self, index: u32) -> bool {
        index < self.tile_count
    }
}

/// A tile: a tileset plus the tile's index inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRef {
    pub tileset: TilesetId,
    pub index: u32,
}

/// Contents of one map cell. `tile == None` is the empty cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cell {
    pub tile: Option<TileRef>,
    pub flipped_horizontally: bool,
    pub flipped_vertically: bool,
    pub flipped_anti_diagonally: bool,
}

impl Cell {
    pub const EMPTY: Cell = Cell {
        tile: None,
        flipped_horizontally: false,
        flipped_vertically: false,
        flipped_anti_diagonally: false,
    };

    pub fn new(tileset: TilesetId, index: u32) -> Self {
        Self {
            tile: Some(TileRef { tileset, index }),
            ..Self::EMPTY
        }
    }

    pub fn flipped(mut self, horizontally: bool, vertically: bool, anti_diagonally: bool) -> Self {
        self.flipped_horizontally = horizontally;
        self.flipped_vertically = vertically;
        self.flipped_anti_diagonally = anti_diagonally;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tile.is_none()
    }
}
