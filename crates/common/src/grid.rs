use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::types::{Bounds, GridCoord};

/// Uniform world grid: square tiles of `tile_size` on the XZ plane, with
/// tile (0, 0) starting at `pos00`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridLayout {
    tile_size: f64,
    pos00: DVec3,
}

impl GridLayout {
    /// Create a layout. Panics if `tile_size` is not positive.
    pub fn new(tile_size: f64, pos00: DVec3) -> Self {
        assert!(tile_size > 0.0, "tile_size must be positive");
        Self { tile_size, pos00 }
    }

    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    /// World position of the minimum corner of tile (0, 0).
    pub fn pos00(&self) -> DVec3 {
        self.pos00
    }

    /// The coordinate of the tile containing `pos`. Tiles own their minimum
    /// edge and not their maximum edge.
    pub fn coord_of(&self, pos: DVec3) -> GridCoord {
        GridCoord {
            x: ((pos.x - self.pos00.x) / self.tile_size).floor() as i32,
            z: ((pos.z - self.pos00.z) / self.tile_size).floor() as i32,
        }
    }

    /// Minimum corner of a tile. Y is taken from `pos00`.
    pub fn tile_origin(&self, coord: GridCoord) -> DVec3 {
        DVec3::new(
            self.pos00.x + coord.x as f64 * self.tile_size,
            self.pos00.y,
            self.pos00.z + coord.z as f64 * self.tile_size,
        )
    }

    /// Bounds of a tile with the given vertical height.
    pub fn tile_bounds(&self, coord: GridCoord, height: f64) -> Bounds {
        let min = self.tile_origin(coord);
        let max = min + DVec3::new(self.tile_size, height, self.tile_size);
        Bounds::from_min_max(min, max)
    }
}
