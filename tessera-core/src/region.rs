//! Sets of cell coordinates touched by one logical edit.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Axis-aligned rectangle in cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

/// An ordered set of `(x, y)` cells.
///
/// Iteration order is row-major by `x` then `y`, which keeps encoded
/// tile-change batches deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    cells: BTreeSet<(u16, u16)>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(x: u16, y: u16, width: u16, height: u16) -> Self {
        let mut region = Self::new();
        region.add_rect(TileRect { x, y, width, height });
        region
    }

    pub fn add_cell(&mut self, x: u16, y: u16) {
        self.cells.insert((x, y));
    }

    /// Add every cell of `rect`. Cells past `u16::MAX` are clipped.
    pub fn add_rect(&mut self, rect: TileRect) {
        let x_end = rect.x.saturating_add(rect.width);
        let y_end = rect.y.saturating_add(rect.height);
        for x in rect.x..x_end {
            for y in rect.y..y_end {
                self.cells.insert((x, y));
            }
        }
    }

    pub fn union(&mut self, other: &Region) {
        self.cells.extend(other.cells.iter().copied());
    }

    pub fn contains(&self, x: u16, y: u16) -> bool {
        self.cells.contains(&(x, y))
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.cells.iter().copied()
    }

    /// Smallest rectangle covering the region, `None` when empty.
    pub fn bounds(&self) -> Option<TileRect> {
        let mut cells = self.cells.iter();
        let &(x0, y0) = cells.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (x0, y0, x0, y0);
        for &(x, y) in cells {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Some(TileRect {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        })
    }
}

impl FromIterator<(u16, u16)> for Region {
    fn from_iter<I: IntoIterator<Item = (u16, u16)>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rect() {
        let region = Region::from_rect(2, 3, 2, 2);
        assert_eq!(region.len(), 4);
        assert!(region.contains(2, 3));
        assert!(region.contains(3, 4));
        assert!(!region.contains(4, 4));
    }

    #[test]
    fn test_union_deduplicates() {
        let mut a = Region::from_rect(0, 0, 2, 1);
        let b = Region::from_rect(1, 0, 2, 1);
        a.union(&b);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_bounds() {
        assert!(Region::new().bounds().is_none());

        let region: Region = [(5, 1), (2, 7), (3, 3)].into_iter().collect();
        assert_eq!(
            region.bounds(),
            Some(TileRect { x: 2, y: 1, width: 4, height: 7 })
        );
    }

    #[test]
    fn test_iteration_order() {
        let region: Region = [(1, 0), (0, 1), (0, 0)].into_iter().collect();
        let cells: Vec<_> = region.iter().collect();
        assert_eq!(cells, vec![(0, 0), (0, 1), (1, 0)]);
    }

    #[test]
    fn test_rect_clipped_at_max() {
        let region = Region::from_rect(u16::MAX - 1, 0, 5, 1);
        assert_eq!(region.len(), 1);
    }
}
