//! Global tile ids.
//!
//! Peers may hold the same tilesets in different orders, so cells travel
//! as global ids: tilesets are laid end to end starting at 1, and a tile's
//! gid is its tileset's first gid plus its index. 0 is the empty cell. The
//! top three bits carry the cell's flip flags.

use tessera_core::{Cell, TileMap, Tileset, TilesetId};

use crate::error::UnknownTileReference;

pub const FLIPPED_HORIZONTALLY_FLAG: u32 = 0x8000_0000;
pub const FLIPPED_VERTICALLY_FLAG: u32 = 0x4000_0000;
pub const FLIPPED_ANTI_DIAGONALLY_FLAG: u32 = 0x2000_0000;

const FLAG_MASK: u32 =
    FLIPPED_HORIZONTALLY_FLAG | FLIPPED_VERTICALLY_FLAG | FLIPPED_ANTI_DIAGONALLY_FLAG;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GidRange {
    first_gid: u32,
    tileset: TilesetId,
    tile_count: u32,
}

impl GidRange {
    fn end(&self) -> u32 {
        self.first_gid.saturating_add(self.tile_count)
    }
}

/// Bidirectional mapping between cells and global tile ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GidMapper {
    /// Sorted by `first_gid`, non-overlapping
    ranges: Vec<GidRange>,
}

impl GidMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lay out the map's tilesets in document order.
    pub fn from_map(map: &TileMap) -> Self {
        Self::from_tilesets(map.tilesets())
    }

    pub fn from_tilesets(tilesets: &[Tileset]) -> Self {
        let mut mapper = Self::new();
        let mut first_gid = 1u32;
        for tileset in tilesets {
            if tileset.tile_count == 0 {
                continue;
            }
            if first_gid.saturating_add(tileset.tile_count) > FLIPPED_ANTI_DIAGONALLY_FLAG {
                log::warn!(
                    "Tileset {} ({}) does not fit below the flip flag bits, leaving it unmapped",
                    tileset.id,
                    tileset.name
                );
                break;
            }
            mapper.insert(first_gid, tileset.id, tileset.tile_count);
            first_gid += tileset.tile_count;
        }
        mapper
    }

    pub fn insert(&mut self, first_gid: u32, tileset: TilesetId, tile_count: u32) {
        let at = self.ranges.partition_point(|r| r.first_gid <= first_gid);
        self.ranges.insert(
            at,
            GidRange {
                first_gid,
                tileset,
                tile_count,
            },
        );
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of mapped tilesets.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn first_gid(&self, tileset: TilesetId) -> Option<u32> {
        self.ranges
            .iter()
            .find(|r| r.tileset == tileset)
            .map(|r| r.first_gid)
    }

    pub fn cell_to_gid(&self, cell: &Cell) -> Result<u32, UnknownTileReference> {
        let Some(tile) = cell.tile else {
            return Ok(0);
        };
        let range = self
            .ranges
            .iter()
            .find(|r| r.tileset == tile.tileset)
            .ok_or(UnknownTileReference::Tileset(tile.tileset))?;
        if tile.index >= range.tile_count {
            return Err(UnknownTileReference::TileIndex {
                tileset: tile.tileset,
                index: tile.index,
            });
        }

        let mut gid = range.first_gid + tile.index;
        if cell.flipped_horizontally {
            gid |= FLIPPED_HORIZONTALLY_FLAG;
        }
        if cell.flipped_vertically {
            gid |= FLIPPED_VERTICALLY_FLAG;
        }
        if cell.flipped_anti_diagonally {
            gid |= FLIPPED_ANTI_DIAGONALLY_FLAG;
        }
        Ok(gid)
    }

    pub fn gid_to_cell(&self, gid: u32) -> Result<Cell, UnknownTileReference> {
        let id = gid & !FLAG_MASK;
        if id == 0 {
            return Ok(Cell::EMPTY);
        }

        let at = self.ranges.partition_point(|r| r.first_gid <= id);
        let range = at
            .checked_sub(1)
            .and_then(|i| self.ranges.get(i))
            .filter(|r| id < r.end())
            .ok_or(UnknownTileReference::Gid(gid))?;

        Ok(Cell::new(range.tileset, id - range.first_gid).flipped(
            gid & FLIPPED_HORIZONTALLY_FLAG != 0,
            gid & FLIPPED_VERTICALLY_FLAG != 0,
            gid & FLIPPED_ANTI_DIAGONALLY_FLAG != 0,
        ))
    }

    /// Whether this mapper still matches the map's tileset layout.
    pub fn is_current(&self, map: &TileMap) -> bool {
        *self == Self::from_map(map)
    }
}
