//! Dense fixed-size voxel grid.

use crate::block::{BlockPos, BlockType};

/// Default map edge length in blocks.
pub const DEFAULT_MAP_SIZE: usize = 64;

/// Cubic block grid indexed by `(x, y, z)`.
///
/// Storage is x-major, then y, then z, so a bulk-transfer column (fixed x,
/// a run of y, all z) is a contiguous slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockGrid {
    size: usize,
    cells: Vec<BlockType>,
}

impl BlockGrid {
    /// Create an empty grid with the given edge length.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            cells: vec![BlockType::None; size * size * size],
        }
    }

    /// Edge length in blocks.
    pub fn size(&self) -> usize {
        self.size
    }

    fn index(&self, pos: BlockPos) -> Option<usize> {
        let size = self.size as i32;
        let in_range = |v: i32| (0..size).contains(&v);
        if !(in_range(pos.x) && in_range(pos.y) && in_range(pos.z)) {
            return None;
        }
        let (x, y, z) = (pos.x as usize, pos.y as usize, pos.z as usize);
        Some((x * self.size + y) * self.size + z)
    }

    /// Whether `pos` lies inside the grid.
    pub fn contains(&self, pos: BlockPos) -> bool {
        self.index(pos).is_some()
    }

    /// Block at `pos`; out-of-range reads are empty.
    pub fn get(&self, pos: BlockPos) -> BlockType {
        self.index(pos)
            .map(|i| self.cells[i])
            .unwrap_or(BlockType::None)
    }

    /// Write `block` at `pos`, returning the previous occupant.
    ///
    /// Returns `None` when `pos` is outside the grid.
    pub fn set(&mut self, pos: BlockPos, block: BlockType) -> Option<BlockType> {
        let i = self.index(pos)?;
        Some(std::mem::replace(&mut self.cells[i], block))
    }

    /// Count of non-empty cells.
    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|b| !b.is_empty()).count()
    }

    /// Reset every cell to empty.
    pub fn clear(&mut self) {
        self.cells.fill(BlockType::None);
    }
}

impl Default for BlockGrid {
    fn default() -> Self {
        Self::new(DEFAULT_MAP_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_returns_previous_occupant() {
        let mut grid = BlockGrid::new(4);
        let pos = BlockPos::new(1, 2, 3);
        assert_eq!(grid.set(pos, BlockType::Dirt), Some(BlockType::None));
        assert_eq!(grid.set(pos, BlockType::Lava), Some(BlockType::Dirt));
        assert_eq!(grid.get(pos), BlockType::Lava);
        assert_eq!(grid.occupied(), 1);
    }

    #[test]
    fn out_of_range_is_empty_and_unwritable() {
        let mut grid = BlockGrid::new(4);
        let outside = BlockPos::new(4, 0, 0);
        assert_eq!(grid.get(outside), BlockType::None);
        assert_eq!(grid.set(outside, BlockType::Rock), None);
        assert!(!grid.contains(BlockPos::new(0, -1, 0)));
    }
}
