//! Discover tile resources in a directory by file name.
//!
//! Files named `<kind>_<x>_<z>.<ext>` are grouped by grid coordinate, where
//! kind is one of `terrain`, `impostor`, `collider` or `backup`. Every
//! coordinate that has a `terrain` file becomes one record.

use std::collections::BTreeMap;
use std::path::Path;

use terrastream_common::{GridCoord, GridLayout, TileRecord};

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    Terrain,
    Impostor,
    Collider,
    Backup,
}

impl ResourceKind {
    fn parse(prefix: &str) -> Option<Self> {
        match prefix {
            "terrain" => Some(Self::Terrain),
            "impostor" => Some(Self::Impostor),
            "collider" => Some(Self::Collider),
            "backup" => Some(Self::Backup),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Found {
    terrain: Option<String>,
    impostor: Option<String>,
    collider: Option<String>,
    backup: Option<String>,
}

/// Split a file stem like `terrain_3_-2` into its kind and coordinate.
fn parse_stem(stem: &str) -> Option<(ResourceKind, GridCoord)> {
    let mut parts = stem.rsplitn(3, '_');
    let z = parts.next()?.parse().ok()?;
    let x = parts.next()?.parse().ok()?;
    let kind = ResourceKind::parse(parts.next()?)?;
    Some((kind, GridCoord::new(x, z)))
}

/// Scan `dir` (not recursively) and build one grid-positioned record per
/// coordinate with a terrain file. Bounds are as tall as a tile is wide.
/// Records come back ordered by coordinate.
pub fn scan_directory(dir: impl AsRef<Path>, layout: &GridLayout) -> Result<Vec<TileRecord>, StoreError> {
    let dir = dir.as_ref();
    let mut found: BTreeMap<GridCoord, Found> = BTreeMap::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some((kind, coord)) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(parse_stem)
        else {
            tracing::trace!(path = %path.display(), "ignoring file");
            continue;
        };
        let locator = path.to_string_lossy().into_owned();
        let slot = found.entry(coord).or_default();
        let target = match kind {
            ResourceKind::Terrain => &mut slot.terrain,
            ResourceKind::Impostor => &mut slot.impostor,
            ResourceKind::Collider => &mut slot.collider,
            ResourceKind::Backup => &mut slot.backup,
        };
        if let Some(previous) = target.replace(locator) {
            tracing::warn!(?coord, ?kind, %previous, "duplicate resource for tile, keeping the later one");
        }
    }

    let mut records = Vec::with_capacity(found.len());
    for (coord, resources) in found {
        let Some(terrain) = resources.terrain else {
            tracing::warn!(?coord, "resources without a terrain file, skipping");
            continue;
        };
        let name = format!("terrain_{}_{}", coord.x, coord.z);
        let mut record = TileRecord::on_grid(name, layout, coord, layout.tile_size(), terrain);
        record.impostor = resources.impostor;
        record.collider = resources.collider;
        record.backup = resources.backup;
        records.push(record);
    }
    tracing::info!(dir = %dir.display(), tiles = records.len(), "scanned tile directory");
    Ok(records)
}
