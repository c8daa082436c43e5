//! Block types and integer block coordinates.

use glam::{IVec3, Vec3};

use crate::wire_enum::wire_enum;

wire_enum! {
    /// Contents of a single voxel cell.
    ///
    /// `None` is the empty sentinel; every other variant is a solid or
    /// special block owned by the block engine.
    pub enum BlockType {
        /// Empty cell.
        None = 0,
        /// Diggable dirt.
        Dirt = 1,
        /// Ore deposit.
        Ore = 2,
        /// Gold deposit.
        Gold = 3,
        /// Diamond deposit.
        Diamond = 4,
        /// Undiggable rock.
        Rock = 5,
        /// Climbable ladder.
        Ladder = 6,
        /// Placed explosive charge.
        Explosive = 7,
        /// Jump pad.
        Jump = 8,
        /// Shock trap.
        Shock = 9,
        /// Red team bank.
        BankRed = 10,
        /// Blue team bank.
        BankBlue = 11,
        /// Red team beacon.
        BeaconRed = 12,
        /// Blue team beacon.
        BeaconBlue = 13,
        /// Road surface.
        Road = 14,
        /// Red team solid block.
        SolidRed = 15,
        /// Blue team solid block.
        SolidBlue = 16,
        /// Indestructible metal.
        Metal = 17,
        /// Dirt with a sign texture.
        DirtSign = 18,
        /// Flowing lava.
        Lava = 19,
        /// Red team force field.
        TransRed = 20,
        /// Blue team force field.
        TransBlue = 21,
    }
}

impl BlockType {
    /// Whether the cell holds anything.
    pub const fn is_empty(self) -> bool {
        matches!(self, BlockType::None)
    }

    /// Whether a player occupying this cell is harmed by it.
    pub const fn is_hazard(self) -> bool {
        matches!(self, BlockType::Lava)
    }
}

impl Default for BlockType {
    fn default() -> Self {
        BlockType::None
    }
}

/// Integer voxel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockPos {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate (up).
    pub y: i32,
    /// Z coordinate.
    pub z: i32,
}

impl BlockPos {
    /// Create a block position.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Block containing the given world-space point.
    pub fn containing(point: Vec3) -> Self {
        let p = point.floor();
        Self::new(p.x as i32, p.y as i32, p.z as i32)
    }

    /// Chebyshev distance between two cells.
    pub fn chebyshev(self, other: BlockPos) -> i32 {
        (self.x - other.x)
            .abs()
            .max((self.y - other.y).abs())
            .max((self.z - other.z).abs())
    }

    /// Minimum corner of the cell in world space.
    pub fn min_corner(self) -> Vec3 {
        Vec3::new(self.x as f32, self.y as f32, self.z as f32)
    }

    /// Convert to byte coordinates, if every axis fits.
    pub fn to_bytes(self) -> Option<[u8; 3]> {
        Some([
            u8::try_from(self.x).ok()?,
            u8::try_from(self.y).ok()?,
            u8::try_from(self.z).ok()?,
        ])
    }
}

impl From<IVec3> for BlockPos {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<BlockPos> for IVec3 {
    fn from(p: BlockPos) -> Self {
        IVec3::new(p.x, p.y, p.z)
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_type_roundtrips_through_u8() {
        for &block in BlockType::ALL {
            assert_eq!(BlockType::from_u8(block.as_u8()), Some(block));
        }
        assert_eq!(BlockType::from_u8(BlockType::ALL.len() as u8), None);
    }

    #[test]
    fn containing_floors_negative_coordinates() {
        let pos = BlockPos::containing(Vec3::new(-0.5, 3.99, 0.0));
        assert_eq!(pos, BlockPos::new(-1, 3, 0));
    }

    #[test]
    fn to_bytes_rejects_out_of_range() {
        assert_eq!(BlockPos::new(1, 2, 3).to_bytes(), Some([1, 2, 3]));
        assert_eq!(BlockPos::new(-1, 2, 3).to_bytes(), None);
        assert_eq!(BlockPos::new(1, 256, 3).to_bytes(), None);
    }

    #[test]
    fn chebyshev_uses_largest_axis() {
        let a = BlockPos::new(0, 0, 0);
        assert_eq!(a.chebyshev(BlockPos::new(1, -3, 2)), 3);
    }
}
