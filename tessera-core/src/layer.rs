//! Map layers: tile grids and object groups.

use serde::{Deserialize, Serialize};

use crate::tileset::Cell;

/// Kind of a layer, without its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerType {
    Tile,
    Object,
}

/// Row-major grid of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileLayer {
    width: u16,
    height: u16,
    cells: Vec<Cell>,
}

impl TileLayer {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            cells: vec![Cell::EMPTY; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn contains(&self, x: u16, y: u16) -> bool {
        x < self.width && y < self.height
    }

    pub fn cell_at(&self, x: u16, y: u16) -> Option<&Cell> {
        if !self.contains(x, y) {
            return None;
        }
        self.cells.get(self.offset(x, y))
    }

    /// Returns `false` when `(x, y)` lies outside the layer.
    pub fn set_cell(&mut self, x: u16, y: u16, cell: Cell) -> bool {
        if !self.contains(x, y) {
            return false;
        }
        let offset = self.offset(x, y);
        match self.cells.get_mut(offset) {
            Some(slot) => {
                *slot = cell;
                true
            }
            None => false,
        }
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }

    pub(crate) fn cell_count(&self) -> usize {
        self.cells.len()
    }

    fn offset(&self, x: u16, y: u16) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MapObject {
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectGroup {
    pub objects: Vec<MapObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LayerKind {
    Tile(TileLayer),
    Object(ObjectGroup),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub visible: bool,
    /// 0.0 (transparent) ..= 1.0 (opaque)
    pub opacity: f32,
    pub kind: LayerKind,
}

impl Layer {
    pub fn tiles(name: impl Into<String>, width: u16, height: u16) -> Self {
        Self {
            name: name.into(),
            visible: true,
            opacity: 1.0,
            kind: LayerKind::Tile(TileLayer::new(width, height)),
        }
    }

    pub fn objects(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visible: true,
            opacity: 1.0,
            kind: LayerKind::Object(ObjectGroup::default()),
        }
    }

    pub fn layer_type(&self) -> LayerType {
        match self.kind {
            LayerKind::Tile(_) => LayerType::Tile,
            LayerKind::Object(_) => LayerType::Object,
        }
    }

    pub fn as_tile_layer(&self) -> Option<&TileLayer> {
        match &self.kind {
            LayerKind::Tile(layer) => Some(layer),
            LayerKind::Object(_) => None,
        }
    }

    pub fn as_tile_layer_mut(&mut self) -> Option<&mut TileLayer> {
        match &mut self.kind {
            LayerKind::Tile(layer) => Some(layer),
            LayerKind::Object(_) => None,
        }
    }
}
