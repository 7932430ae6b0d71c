//! The tile map document and its change events.

use serde::{Deserialize, Serialize};

use crate::layer::{Layer, LayerType, TileLayer};
use crate::region::Region;
use crate::tileset::{Cell, Tileset, TilesetId};
use crate::MapError;

/// A change made through one of the map's editing operations.
///
/// Raw [`TileMap::set_cell`] does not produce events; it is what remote
/// edits are applied with.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    /// Cells set on a tile layer, with the values they held right after
    /// the edit
    RegionEdited {
        layer: usize,
        region: Region,
        cells: Vec<(u16, u16, Cell)>,
    },
    LayerAdded { index: usize, kind: LayerType, name: String },
    LayerRemoved(usize),
    LayerRenamed { index: usize, name: String },
    LayerMoved { from: usize, to: usize },
    /// Visibility or opacity changed
    LayerChanged { index: usize, visible: bool, opacity: f32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileMap {
    pub width: u16,
    pub height: u16,
    pub tile_width: u16,
    pub tile_height: u16,
    tilesets: Vec<Tileset>,
    layers: Vec<Layer>,
    next_tileset_id: u32,
    #[serde(skip)]
    events: Vec<MapEvent>,
}

impl TileMap {
    pub fn new(width: u16, height: u16, tile_width: u16, tile_height: u16) -> Self {
        Self {
            width,
            height,
            tile_width,
            tile_height,
            tilesets: Vec::new(),
            layers: Vec::new(),
            next_tileset_id: 1,
            events: Vec::new(),
        }
    }

    // ---------------------------------------------------------------
    // Tilesets
    // ---------------------------------------------------------------

    /// Append a tileset and assign it a fresh id.
    pub fn add_tileset(&mut self, mut tileset: Tileset) -> TilesetId {
        let id = TilesetId(self.next_tileset_id);
        self.next_tileset_id += 1;
        tileset.id = id;
        self.tilesets.push(tileset);
        id
    }

    /// Tilesets in document order. This order defines global tile ids.
    pub fn tilesets(&self) -> &[Tileset] {
        &self.tilesets
    }

    pub fn tileset(&self, id: TilesetId) -> Option<&Tileset> {
        self.tilesets.iter().find(|ts| ts.id == id)
    }

    // ---------------------------------------------------------------
    // Layers
    // ---------------------------------------------------------------

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn tile_layer(&self, index: usize) -> Result<&TileLayer, MapError> {
        self.layers
            .get(index)
            .ok_or(MapError::LayerOutOfRange(index))?
            .as_tile_layer()
            .ok_or(MapError::NotATileLayer(index))
    }

    fn tile_layer_mut(&mut self, index: usize) -> Result<&mut TileLayer, MapError> {
        self.layers
            .get_mut(index)
            .ok_or(MapError::LayerOutOfRange(index))?
            .as_tile_layer_mut()
            .ok_or(MapError::NotATileLayer(index))
    }

    /// Insert a new, empty layer of the given type. `index` past the end
    /// appends. Returns the index the layer landed at.
    pub fn add_layer(&mut self, index: usize, layer_type: LayerType) -> usize {
        let number = self
            .layers
            .iter()
            .filter(|l| l.layer_type() == layer_type)
            .count()
            + 1;
        let layer = match layer_type {
            LayerType::Tile => Layer::tiles(format!("Tile Layer {number}"), self.width, self.height),
            LayerType::Object => Layer::objects(format!("Object Layer {number}")),
        };
        self.insert_layer(index, layer)
    }

    pub fn insert_layer(&mut self, index: usize, layer: Layer) -> usize {
        let index = index.min(self.layers.len());
        self.events.push(MapEvent::LayerAdded {
            index,
            kind: layer.layer_type(),
            name: layer.name.clone(),
        });
        self.layers.insert(index, layer);
        index
    }

    pub fn remove_layer(&mut self, index: usize) -> Result<Layer, MapError> {
        if index >= self.layers.len() {
            return Err(MapError::LayerOutOfRange(index));
        }
        let layer = self.layers.remove(index);
        self.events.push(MapEvent::LayerRemoved(index));
        Ok(layer)
    }

    pub fn rename_layer(&mut self, index: usize, name: impl Into<String>) -> Result<(), MapError> {
        let layer = self
            .layers
            .get_mut(index)
            .ok_or(MapError::LayerOutOfRange(index))?;
        layer.name = name.into();
        self.events.push(MapEvent::LayerRenamed {
            index,
            name: layer.name.clone(),
        });
        Ok(())
    }

    pub fn move_layer(&mut self, from: usize, to: usize) -> Result<(), MapError> {
        let len = self.layers.len();
        if from >= len {
            return Err(MapError::LayerOutOfRange(from));
        }
        if to >= len {
            return Err(MapError::LayerOutOfRange(to));
        }
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        self.events.push(MapEvent::LayerMoved { from, to });
        Ok(())
    }

    pub fn set_layer_visible(&mut self, index: usize, visible: bool) -> Result<(), MapError> {
        let layer = self
            .layers
            .get_mut(index)
            .ok_or(MapError::LayerOutOfRange(index))?;
        layer.visible = visible;
        self.events.push(MapEvent::LayerChanged {
            index,
            visible,
            opacity: layer.opacity,
        });
        Ok(())
    }

    pub fn set_layer_opacity(&mut self, index: usize, opacity: f32) -> Result<(), MapError> {
        let layer = self
            .layers
            .get_mut(index)
            .ok_or(MapError::LayerOutOfRange(index))?;
        layer.opacity = opacity.clamp(0.0, 1.0);
        self.events.push(MapEvent::LayerChanged {
            index,
            visible: layer.visible,
            opacity: layer.opacity,
        });
        Ok(())
    }

    // ---------------------------------------------------------------
    // Cells
    // ---------------------------------------------------------------

    pub fn cell_at(&self, layer: usize, x: u16, y: u16) -> Result<Cell, MapError> {
        self.tile_layer(layer)?
            .cell_at(x, y)
            .copied()
            .ok_or(MapError::CellOutOfBounds { layer, x, y })
    }

    /// Check that `(x, y)` is writable on `layer` without touching it.
    pub fn check_cell(&self, layer: usize, x: u16, y: u16) -> Result<(), MapError> {
        if self.tile_layer(layer)?.contains(x, y) {
            Ok(())
        } else {
            Err(MapError::CellOutOfBounds { layer, x, y })
        }
    }

    /// Set one cell without raising an event.
    pub fn set_cell(&mut self, layer: usize, x: u16, y: u16, cell: Cell) -> Result<(), MapError> {
        if let Some(tile) = cell.tile {
            if self.tileset(tile.tileset).is_none() {
                return Err(MapError::UnknownTileset(tile.tileset));
            }
        }
        if self.tile_layer_mut(layer)?.set_cell(x, y, cell) {
            Ok(())
        } else {
            Err(MapError::CellOutOfBounds { layer, x, y })
        }
    }

    /// Set a batch of cells as one user edit and queue a single
    /// `RegionEdited` event. Nothing is written if any cell is invalid.
    pub fn paint(
        &mut self,
        layer: usize,
        cells: impl IntoIterator<Item = (u16, u16, Cell)>,
    ) -> Result<Region, MapError> {
        let cells: Vec<_> = cells.into_iter().collect();
        for &(x, y, cell) in &cells {
            self.check_cell(layer, x, y)?;
            if let Some(tile) = cell.tile {
                if self.tileset(tile.tileset).is_none() {
                    return Err(MapError::UnknownTileset(tile.tileset));
                }
            }
        }

        let mut region = Region::new();
        for (x, y, cell) in cells {
            self.set_cell(layer, x, y, cell)?;
            region.add_cell(x, y);
        }
        if !region.is_empty() {
            self.emit_region_edited(layer, region.clone());
        }
        Ok(region)
    }

    /// Report cells changed through [`set_cell`](Self::set_cell) as a user edit.
    ///
    /// The current cell values are captured now, so later edits in the same
    /// batch do not change what the event reports.
    pub fn emit_region_edited(&mut self, layer: usize, region: Region) {
        let Ok(tiles) = self.tile_layer(layer) else {
            log::debug!("Not reporting edits on layer {layer}: not a tile layer");
            return;
        };
        let cells = region
            .iter()
            .filter_map(|(x, y)| tiles.cell_at(x, y).map(|cell| (x, y, *cell)))
            .collect();
        self.events.push(MapEvent::RegionEdited { layer, region, cells });
    }

    // ---------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------

    /// Drain the queued change events, oldest first.
    pub fn take_events(&mut self) -> Vec<MapEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn has_pending_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Check structural consistency of a map read from a file or the wire.
    pub fn validate(&self) -> Result<(), MapError> {
        for (index, layer) in self.layers.iter().enumerate() {
            let Some(tiles) = layer.as_tile_layer() else {
                continue;
            };
            let expected = tiles.width() as usize * tiles.height() as usize;
            if tiles.cell_count() != expected {
                return Err(MapError::CorruptLayer {
                    layer: index,
                    expected,
                    actual: tiles.cell_count(),
                });
            }
            for cell in tiles.cells() {
                if let Some(tile) = cell.tile {
                    if self.tileset(tile.tileset).is_none() {
                        return Err(MapError::UnknownTileset(tile.tileset));
                    }
                }
            }
        }
        Ok(())
    }
}
