//! Spatial queries: which tiles does a loading volume touch?
//!
//! Two paths exist. The irregular path tests every tile's bounds against the
//! volume. The grid path turns the volume into an inclusive coordinate
//! rectangle and looks tiles up by coordinate, which does not depend on how
//! many tiles the registry holds. Both paths treat touching edges as
//! overlapping, so they select the same tiles for grid-placed records.

use std::collections::BTreeSet;

use glam::DVec3;
use terrastream_common::{Bounds, GridCoord, GridLayout, TileId};

use crate::registry::TileRegistry;

/// A box around a point (the loading origin or a tracked camera) inside
/// which tiles should be loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadingVolume {
    pub center: DVec3,
    pub extents: DVec3,
}

impl LoadingVolume {
    pub fn new(center: DVec3, extents: DVec3) -> Self {
        Self {
            center,
            extents: extents.abs(),
        }
    }

    /// A volume with no horizontal extent requests no tiles at all.
    pub fn is_degenerate(&self) -> bool {
        self.extents.x == 0.0 && self.extents.z == 0.0
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.center, self.extents)
    }
}

/// Inclusive rectangle of grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordRect {
    pub min: GridCoord,
    pub max: GridCoord,
}

impl CoordRect {
    pub fn contains(&self, coord: GridCoord) -> bool {
        coord.x >= self.min.x && coord.x <= self.max.x && coord.z >= self.min.z && coord.z <= self.max.z
    }

    /// Number of coordinates inside, saturating at `usize::MAX`.
    pub fn area(&self) -> usize {
        let w = (i64::from(self.max.x) - i64::from(self.min.x) + 1).max(0) as u64;
        let h = (i64::from(self.max.z) - i64::from(self.min.z) + 1).max(0) as u64;
        usize::try_from(w.saturating_mul(h)).unwrap_or(usize::MAX)
    }

    pub fn coords(&self) -> impl Iterator<Item = GridCoord> + '_ {
        (self.min.x..=self.max.x)
            .flat_map(move |x| (self.min.z..=self.max.z).map(move |z| GridCoord::new(x, z)))
    }
}

/// How tiles are laid out in the world.
#[derive(Debug, Clone, Copy)]
pub enum QueryMode<'a> {
    /// Uniform grid: resolve by coordinate range.
    Grid(&'a GridLayout),
    /// Arbitrary placement: resolve by bounds intersection.
    Irregular,
}

/// Grid index of a world-space offset from `pos00`, rounded with `round` and
/// clamped into `i32`. Infinite offsets land on the ends of the range.
fn grid_index(offset: f64, tile_size: f64, round: fn(f64) -> f64) -> i32 {
    let index = round(offset / tile_size);
    if index.is_nan() {
        0
    } else {
        index.clamp(i32::MIN as f64, i32::MAX as f64) as i32
    }
}

/// Coordinate rectangle covered by `volume`, or `None` for a degenerate
/// volume.
///
/// Tile `c` spans `[pos00 + c * size, pos00 + (c + 1) * size]` with both
/// edges included, the same rule [`Bounds::intersects`] applies, so a volume
/// ending exactly on a tile edge also selects the tile on the other side.
/// The rectangle is clamped to the `i32` coordinate space.
pub fn grid_range(layout: &GridLayout, volume: &LoadingVolume) -> Option<CoordRect> {
    if volume.is_degenerate() {
        return None;
    }
    let size = layout.tile_size();
    let pos00 = layout.pos00();
    let lo = volume.center - volume.extents - pos00;
    let hi = volume.center + volume.extents - pos00;

    let min = GridCoord::new(
        grid_index(lo.x, size, f64::ceil).saturating_sub(1),
        grid_index(lo.z, size, f64::ceil).saturating_sub(1),
    );
    let max = GridCoord::new(
        grid_index(hi.x, size, f64::floor),
        grid_index(hi.z, size, f64::floor),
    );
    Some(CoordRect { min, max })
}

/// All tiles touched by `volume`.
pub fn tiles_in_volume(
    registry: &TileRegistry,
    volume: &LoadingVolume,
    mode: QueryMode<'_>,
) -> BTreeSet<TileId> {
    if volume.is_degenerate() {
        return BTreeSet::new();
    }
    match mode {
        QueryMode::Grid(layout) => {
            let Some(rect) = grid_range(layout, volume) else {
                return BTreeSet::new();
            };
            if rect.area() <= registry.len() {
                rect.coords()
                    .filter_map(|c| registry.find_by_coord(c))
                    .collect()
            } else {
                registry
                    .iter()
                    .filter(|t| t.coord.is_some_and(|c| rect.contains(c)))
                    .map(|t| t.id())
                    .collect()
            }
        }
        QueryMode::Irregular => {
            let bounds = volume.bounds();
            registry
                .iter()
                .filter(|t| t.bounds.intersects(&bounds))
                .map(|t| t.id())
                .collect()
        }
    }
}

/// Distance from `from` to the center of a tile's bounds.
pub fn distance_to(from: DVec3, bounds: &Bounds) -> f64 {
    from.distance(bounds.center)
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrastream_common::TileRecord;

    fn world_layout() -> GridLayout {
        GridLayout::new(1000.0, DVec3::new(-5000.0, 0.0, -5000.0))
    }

    fn populated(layout: &GridLayout, n: i32) -> TileRegistry {
        let mut reg = TileRegistry::new();
        for x in 0..n {
            for z in 0..n {
                let name = format!("terrain_{x}_{z}");
                reg.register(TileRecord::on_grid(
                    name.clone(),
                    layout,
                    GridCoord::new(x, z),
                    1000.0,
                    name,
                ))
                .unwrap();
            }
        }
        reg
    }

    #[test]
    fn grid_range_around_world_origin() {
        let volume = LoadingVolume::new(DVec3::ZERO, DVec3::splat(1500.0));
        let rect = grid_range(&world_layout(), &volume).unwrap();
        assert!(rect.contains(GridCoord::new(5, 5)));
        assert_eq!(rect.min, GridCoord::new(3, 3));
        assert_eq!(rect.max, GridCoord::new(6, 6));
    }

    #[test]
    fn grid_range_accounts_for_center_offset() {
        // Center 900 into tile 5 (world x = 900): reaches -600 and 2400.
        let volume = LoadingVolume::new(DVec3::new(900.0, 0.0, 500.0), DVec3::new(1500.0, 10.0, 100.0));
        let rect = grid_range(&world_layout(), &volume).unwrap();
        assert_eq!(rect.min, GridCoord::new(4, 5));
        assert_eq!(rect.max, GridCoord::new(7, 5));
    }

    #[test]
    fn edge_aligned_volume_includes_touching_tiles() {
        let volume = LoadingVolume::new(DVec3::new(500.0, 0.0, 500.0), DVec3::new(500.0, 1.0, 500.0));
        let rect = grid_range(&world_layout(), &volume).unwrap();
        assert_eq!(rect.min, GridCoord::new(4, 4));
        assert_eq!(rect.max, GridCoord::new(6, 6));
        assert_eq!(rect.area(), 9);
    }

    #[test]
    fn grid_and_irregular_agree_on_edges() {
        let layout = world_layout();
        let reg = populated(&layout, 10);
        let volume = LoadingVolume::new(DVec3::new(500.0, 0.0, 500.0), DVec3::new(500.0, 100.0, 500.0));
        let grid = tiles_in_volume(&reg, &volume, QueryMode::Grid(&layout));
        let irregular = tiles_in_volume(&reg, &volume, QueryMode::Irregular);
        assert_eq!(grid, irregular);
        assert_eq!(grid.len(), 9);

        // Touching only the outer edge of the populated block.
        let corner = LoadingVolume::new(DVec3::new(-5500.0, 0.0, -5500.0), DVec3::new(500.0, 100.0, 500.0));
        let grid = tiles_in_volume(&reg, &corner, QueryMode::Grid(&layout));
        assert_eq!(grid, tiles_in_volume(&reg, &corner, QueryMode::Irregular));
        assert_eq!(grid.len(), 1);
    }

    #[test]
    fn infinite_volume_selects_every_tile() {
        let layout = world_layout();
        let reg = populated(&layout, 3);
        let volume = LoadingVolume::new(DVec3::ZERO, DVec3::splat(f64::INFINITY));
        let rect = grid_range(&layout, &volume).unwrap();
        assert_eq!(rect.min, GridCoord::new(i32::MIN, i32::MIN));
        assert_eq!(rect.max, GridCoord::new(i32::MAX, i32::MAX));
        assert_eq!(rect.area(), usize::MAX);

        let grid = tiles_in_volume(&reg, &volume, QueryMode::Grid(&layout));
        assert_eq!(grid.len(), 9);
        assert_eq!(grid, tiles_in_volume(&reg, &volume, QueryMode::Irregular));
    }

    #[test]
    fn degenerate_volume_selects_nothing() {
        let layout = world_layout();
        let reg = populated(&layout, 10);
        let volume = LoadingVolume::new(DVec3::ZERO, DVec3::new(0.0, 500.0, 0.0));
        assert!(grid_range(&layout, &volume).is_none());
        assert!(tiles_in_volume(&reg, &volume, QueryMode::Grid(&layout)).is_empty());
        assert!(tiles_in_volume(&reg, &volume, QueryMode::Irregular).is_empty());
    }

    #[test]
    fn grid_and_irregular_agree_off_edges() {
        let layout = world_layout();
        let reg = populated(&layout, 10);
        let volume = LoadingVolume::new(DVec3::new(250.0, 500.0, -1250.0), DVec3::new(1300.0, 600.0, 700.0));
        let grid = tiles_in_volume(&reg, &volume, QueryMode::Grid(&layout));
        let irregular = tiles_in_volume(&reg, &volume, QueryMode::Irregular);
        assert_eq!(grid, irregular);
        assert_eq!(grid.len(), 4 * 2);
    }

    #[test]
    fn huge_rect_falls_back_to_registry_scan() {
        let layout = world_layout();
        let reg = populated(&layout, 3);
        let volume = LoadingVolume::new(DVec3::ZERO, DVec3::splat(1.0e7));
        let grid = tiles_in_volume(&reg, &volume, QueryMode::Grid(&layout));
        assert_eq!(grid.len(), 9);
    }

    #[test]
    fn rect_coords_cover_area() {
        let rect = CoordRect {
            min: GridCoord::new(-1, 2),
            max: GridCoord::new(1, 3),
        };
        let coords: Vec<_> = rect.coords().collect();
        assert_eq!(coords.len(), rect.area());
        assert!(coords.iter().all(|c| rect.contains(*c)));
    }
}
