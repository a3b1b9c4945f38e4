//! Cell indexing behind a trait.
//!
//! The remote partitions the map into cells and scans take a list of cell ids.
//! The real geodesic indexing lives outside this crate; [`GridCellIndex`] is a
//! flat latitude/longitude grid good enough for the simulated world.

use crate::core::types::{CellId, Position};

pub trait CellIndex {
    /// Cells covering `position` and its neighbours out to `radius` cells.
    fn cells(&self, position: &Position, radius: u32) -> Vec<CellId>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCellIndex {
    pub cell_deg: f64,
}

impl Default for GridCellIndex {
    fn default() -> Self {
        // Roughly 110 m at the equator.
        Self { cell_deg: 0.001 }
    }
}

impl GridCellIndex {
    pub fn new(cell_deg: f64) -> Self {
        Self { cell_deg }
    }

    pub fn cell_of(&self, position: &Position) -> CellId {
        let (row, col) = self.coords(position);
        encode(row, col)
    }

    /// South-west corner of `cell`.
    pub fn origin(&self, cell: CellId) -> Position {
        let (row, col) = decode(cell);
        Position::new(
            f64::from(row) * self.cell_deg,
            f64::from(col) * self.cell_deg,
        )
    }

    fn coords(&self, position: &Position) -> (i32, i32) {
        let row = (position.latitude / self.cell_deg).floor() as i32;
        let col = (position.longitude / self.cell_deg).floor() as i32;
        (row, col)
    }
}

impl CellIndex for GridCellIndex {
    fn cells(&self, position: &Position, radius: u32) -> Vec<CellId> {
        let (row, col) = self.coords(position);
        let radius = i32::try_from(radius).unwrap_or(i32::MAX / 2);
        let mut cells = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
        for dr in -radius..=radius {
            for dc in -radius..=radius {
                cells.push(encode(row.saturating_add(dr), col.saturating_add(dc)));
            }
        }
        // Centre first: the remote reports the nearest cells even when it truncates.
        let centre = encode(row, col);
        cells.sort_by_key(|cell| (*cell != centre, *cell));
        cells
    }
}

fn encode(row: i32, col: i32) -> CellId {
    (u64::from(row as u32) << 32) | u64::from(col as u32)
}

fn decode(cell: CellId) -> (i32, i32) {
    ((cell >> 32) as u32 as i32, cell as u32 as i32)
}
