use std::collections::{BTreeMap, HashMap};

use terrastream_common::{GridCoord, TileId, TileRecord};

use crate::error::StreamError;
use crate::tile::TileDescriptor;

/// Ordered collection of tile descriptors with a grid-coordinate index.
///
/// Uses BTreeMap so iteration follows registration order. Tiles are only
/// removed through [`TileRegistry::remove`].
#[derive(Debug, Default)]
pub struct TileRegistry {
    tiles: BTreeMap<TileId, TileDescriptor>,
    by_coord: HashMap<GridCoord, TileId>,
    next_id: u64,
}

impl TileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tile from its persisted record.
    ///
    /// A record without a regular locator is rejected with a warning and the
    /// registry is left unchanged.
    pub fn register(&mut self, record: TileRecord) -> Result<TileId, StreamError> {
        if record.regular.as_deref().is_none_or(str::is_empty) {
            tracing::warn!(name = %record.name, "refusing to register tile without a regular source");
            return Err(StreamError::MissingSource(record.name));
        }
        if let Some(coord) = record.coord {
            if let Some(&existing) = self.by_coord.get(&coord) {
                tracing::warn!(name = %record.name, ?coord, %existing, "grid coordinate already taken");
                return Err(StreamError::DuplicateCoord { coord, existing });
            }
        }
        if !record.is_consistent() {
            tracing::warn!(name = %record.name, "tile bounds do not start at the tile position");
        }

        let id = TileId(self.next_id);
        self.next_id += 1;
        if let Some(coord) = record.coord {
            self.by_coord.insert(coord, id);
        }
        tracing::debug!(%id, name = %record.name, coord = ?record.coord, "registered tile");
        self.tiles.insert(id, TileDescriptor::from_record(id, record));
        Ok(id)
    }

    /// Remove a tile. The caller is responsible for releasing its resources.
    pub fn remove(&mut self, id: TileId) -> Option<TileDescriptor> {
        let tile = self.tiles.remove(&id)?;
        if let Some(coord) = tile.coord {
            self.by_coord.remove(&coord);
        }
        Some(tile)
    }

    pub fn get(&self, id: TileId) -> Option<&TileDescriptor> {
        self.tiles.get(&id)
    }

    pub fn get_mut(&mut self, id: TileId) -> Option<&mut TileDescriptor> {
        self.tiles.get_mut(&id)
    }

    pub fn find_by_coord(&self, coord: GridCoord) -> Option<TileId> {
        self.by_coord.get(&coord).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileDescriptor> {
        self.tiles.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TileDescriptor> {
        self.tiles.values_mut()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Export every tile back to its persisted form.
    pub fn records(&self) -> Vec<TileRecord> {
        self.tiles.values().map(TileDescriptor::to_record).collect()
    }
}
