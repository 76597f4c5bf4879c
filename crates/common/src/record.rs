use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::grid::GridLayout;
use crate::types::{Bounds, GridCoord};

/// Persisted description of one tile: where its representations live and
/// where it sits in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub name: String,
    /// Locator of the full-detail representation.
    pub regular: Option<String>,
    pub impostor: Option<String>,
    pub collider: Option<String>,
    pub backup: Option<String>,
    /// Minimum corner of the tile in world space.
    pub position: DVec3,
    pub bounds: Bounds,
    pub coord: Option<GridCoord>,
    #[serde(default)]
    pub large_world_fix: bool,
}

impl TileRecord {
    /// A record positioned on a grid cell, with only a regular locator set.
    pub fn on_grid(
        name: impl Into<String>,
        layout: &GridLayout,
        coord: GridCoord,
        height: f64,
        regular: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            regular: Some(regular.into()),
            impostor: None,
            collider: None,
            backup: None,
            position: layout.tile_origin(coord),
            bounds: layout.tile_bounds(coord, height),
            coord: Some(coord),
            large_world_fix: false,
        }
    }

    pub fn with_impostor(mut self, locator: impl Into<String>) -> Self {
        self.impostor = Some(locator.into());
        self
    }

    pub fn with_collider(mut self, locator: impl Into<String>) -> Self {
        self.collider = Some(locator.into());
        self
    }

    /// Bounds must start at the tile position on the XZ plane.
    pub fn is_consistent(&self) -> bool {
        const EPSILON: f64 = 1e-3;
        let min = self.bounds.min();
        (min.x - self.position.x).abs() < EPSILON && (min.z - self.position.z).abs() < EPSILON
    }
}
