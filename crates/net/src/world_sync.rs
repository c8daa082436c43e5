//! World synchronization: bulk download then incremental block deltas.

use crate::protocol::{BlockColumn, BAND_HEIGHT};
use deepmine_core::{BlockGrid, BlockPos, BlockType};
use glam::Vec3;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Offsets below the eye at which the local body is sampled.
pub const BODY_SAMPLE_OFFSETS: [f32; 3] = [0.0, 0.7, 1.4];

/// Block engine as seen by world sync.
pub trait BlockStore {
    /// Edge length of the cubic grid.
    fn size(&self) -> usize;

    /// Contents of one cell; out-of-range cells read as empty.
    fn block_at(&self, pos: BlockPos) -> BlockType;

    /// Insert `block` into an empty cell.
    fn add_block(&mut self, pos: BlockPos, block: BlockType);

    /// Remove whatever occupies `pos`.
    fn remove_block(&mut self, pos: BlockPos);

    /// Insert a cell during the bulk download. Engines that batch rebuilds
    /// can defer work until [`BlockStore::finish_download`].
    fn stage_block(&mut self, pos: BlockPos, block: BlockType) {
        self.add_block(pos, block);
    }

    /// Every bulk column has arrived.
    fn finish_download(&mut self) {}

    /// Drop all cells.
    fn reset(&mut self);
}

impl BlockStore for BlockGrid {
    fn size(&self) -> usize {
        BlockGrid::size(self)
    }

    fn block_at(&self, pos: BlockPos) -> BlockType {
        self.get(pos)
    }

    fn add_block(&mut self, pos: BlockPos, block: BlockType) {
        self.set(pos, block);
    }

    fn remove_block(&mut self, pos: BlockPos) {
        self.set(pos, BlockType::None);
    }

    fn reset(&mut self) {
        self.clear();
    }
}

/// World data that cannot be applied. Logged and skipped by callers.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum WorldSyncError {
    /// Column or cell lies outside the grid.
    #[error("({x}, {y}, {z}) is outside the {size}-block grid")]
    OutOfGrid {
        /// X coordinate.
        x: i32,
        /// Y coordinate.
        y: i32,
        /// Z coordinate.
        z: i32,
        /// Grid edge length.
        size: usize,
    },
    /// Bulk column y is not a band boundary.
    #[error("bulk column y={0} is not aligned to the band height")]
    Misaligned(u8),
}

/// Completeness grid over `(x, y-band)` columns.
#[derive(Debug, Clone)]
pub struct WorldTransferState {
    width: usize,
    bands: usize,
    band: usize,
    received: Vec<bool>,
    count: usize,
}

impl WorldTransferState {
    /// Grid for a world `width` wide and `height` tall, split into bands of
    /// `band` levels.
    pub fn new(width: usize, height: usize, band: usize) -> Self {
        let band = band.max(1);
        let bands = height.div_ceil(band);
        Self {
            width,
            bands,
            band,
            received: vec![false; width * bands],
            count: 0,
        }
    }

    /// Total number of columns.
    pub fn column_count(&self) -> usize {
        self.received.len()
    }

    /// Columns marked so far.
    pub fn received_count(&self) -> usize {
        self.count
    }

    /// Mark the column at `x` whose band starts at `y`.
    ///
    /// Returns `Ok(true)` the first time a column is marked.
    pub fn mark(&mut self, x: usize, y: usize) -> Result<bool, WorldSyncError> {
        if y % self.band != 0 {
            return Err(WorldSyncError::Misaligned(y as u8));
        }
        let band = y / self.band;
        if x >= self.width || band >= self.bands {
            return Err(WorldSyncError::OutOfGrid {
                x: x as i32,
                y: y as i32,
                z: 0,
                size: self.width,
            });
        }
        let slot = &mut self.received[x * self.bands + band];
        let fresh = !*slot;
        if fresh {
            *slot = true;
            self.count += 1;
        }
        Ok(fresh)
    }

    /// Whether every column has been marked.
    pub fn is_complete(&self) -> bool {
        self.count == self.received.len()
    }

    /// Clear every mark.
    pub fn reset(&mut self) {
        self.received.fill(false);
        self.count = 0;
    }
}

/// Outcome of one applied block delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockChange {
    /// Cell that changed.
    pub pos: BlockPos,
    /// Previous occupant.
    pub previous: BlockType,
    /// New occupant.
    pub block: BlockType,
    /// Cell touches the local player's body; hazards need re-checking.
    pub near_player: bool,
}

/// Whether `pos` is within one block of any body sample point below `eye`.
pub fn touches_body(eye: Vec3, pos: BlockPos) -> bool {
    BODY_SAMPLE_OFFSETS
        .iter()
        .map(|dy| BlockPos::containing(eye - Vec3::Y * *dy))
        .any(|point| point.chebyshev(pos) <= 1)
}

/// Client-side world state machine.
#[derive(Debug, Clone)]
pub struct WorldSync {
    map_size: usize,
    transfer: Option<WorldTransferState>,
    ready: bool,
}

impl WorldSync {
    /// World sync for a cubic map of edge `map_size`.
    pub fn new(map_size: usize) -> Self {
        Self {
            map_size,
            transfer: None,
            ready: false,
        }
    }

    /// Start a fresh download.
    pub fn begin_transfer(&mut self) {
        self.transfer = Some(WorldTransferState::new(
            self.map_size,
            self.map_size,
            BAND_HEIGHT,
        ));
        self.ready = false;
    }

    /// Whether "world ready" has been signalled.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Download progress, if a transfer is active.
    pub fn transfer(&self) -> Option<&WorldTransferState> {
        self.transfer.as_ref()
    }

    /// Forget all derived state and begin a new download.
    pub fn reset(&mut self, store: &mut impl BlockStore) {
        store.reset();
        self.begin_transfer();
    }

    /// Apply one bulk column. Returns `Ok(true)` exactly once, when the last
    /// missing column arrives.
    pub fn apply_bulk(
        &mut self,
        column: &BlockColumn,
        store: &mut impl BlockStore,
    ) -> Result<bool, WorldSyncError> {
        if self.ready {
            debug!(x = column.x, y = column.y, "bulk column after download; applying as deltas");
            self.write_column(column, store, false);
            return Ok(false);
        }
        let transfer = self.transfer.get_or_insert_with(|| {
            WorldTransferState::new(self.map_size, self.map_size, BAND_HEIGHT)
        });
        if !transfer.mark(column.x as usize, column.y as usize)? {
            trace!(x = column.x, y = column.y, "duplicate bulk column");
        }
        let complete = transfer.is_complete();
        self.write_column(column, store, true);

        if complete {
            store.finish_download();
            self.transfer = None;
            self.ready = true;
            info!("world download complete");
        }
        Ok(complete)
    }

    fn write_column(&self, column: &BlockColumn, store: &mut impl BlockStore, staged: bool) {
        let size = self.map_size as i32;
        for (dy, z, block) in column.cells() {
            let pos = BlockPos::new(column.x as i32, column.y as i32 + dy as i32, z as i32);
            if pos.y >= size || pos.z >= size {
                continue;
            }
            if staged {
                if !block.is_empty() {
                    store.stage_block(pos, block);
                }
            } else {
                replace_cell(store, pos, block);
            }
        }
    }

    /// Apply a single-cell delta. `eye` is the local player's eye position
    /// when one is in play.
    pub fn apply_block_set(
        &mut self,
        pos: BlockPos,
        block: BlockType,
        store: &mut impl BlockStore,
        eye: Option<Vec3>,
    ) -> Result<BlockChange, WorldSyncError> {
        let size = self.map_size as i32;
        if [pos.x, pos.y, pos.z].iter().any(|v| !(0..size).contains(v)) {
            return Err(WorldSyncError::OutOfGrid {
                x: pos.x,
                y: pos.y,
                z: pos.z,
                size: self.map_size,
            });
        }
        let previous = replace_cell(store, pos, block);
        let near_player = eye.is_some_and(|eye| touches_body(eye, pos));
        trace!(%pos, ?previous, ?block, near_player, "block set");
        Ok(BlockChange {
            pos,
            previous,
            block,
            near_player,
        })
    }
}

impl Default for WorldSync {
    fn default() -> Self {
        Self::new(deepmine_core::DEFAULT_MAP_SIZE)
    }
}

/// Delete-if-present then insert. Returns the previous occupant.
fn replace_cell(store: &mut impl BlockStore, pos: BlockPos, block: BlockType) -> BlockType {
    let previous = store.block_at(pos);
    if !previous.is_empty() {
        store.remove_block(pos);
    }
    if !block.is_empty() {
        store.add_block(pos, block);
    }
    previous
}
