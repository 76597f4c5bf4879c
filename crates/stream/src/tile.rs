//! Tile descriptors and the per-representation reference tracker.
//!
//! # Invariants
//! - A representation is `Loaded` iff its reference set is non-empty, except
//!   while `Loading`.
//! - Removing the last reference never leaves a representation `Loaded`: it
//!   becomes `Cached` or `Unloaded`.
//! - A `Cached` representation promoted by a new reference does not reload.

use std::collections::BTreeSet;
use std::time::Instant;

use glam::DVec3;
use terrastream_common::{Bounds, GridCoord, OwnerId, TileId, TileRecord};

use crate::error::HostError;
use crate::host::{LoadHandle, SceneHost};

/// Load state of one representation of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    /// Unreferenced but still resident, waiting for re-use or eviction.
    Cached,
}

/// Which form of a tile a reference applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Representation {
    Regular,
    Impostor,
}

/// Result of adding a reference.
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// The owner was already referencing the representation.
    AlreadyReferenced,
    /// A new load was started.
    LoadStarted,
    /// The representation was cached and is `Loaded` again without a reload.
    PromotedFromCache,
    /// Another owner already keeps it loaded (or loading).
    Joined,
    /// Nothing to load: the tile has no locator for this representation.
    NoSource,
    /// The host refused the load. The reference was not kept.
    Failed(HostError),
}

/// Result of removing a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    NotReferenced,
    StillReferenced,
    Cached,
    Unloaded,
}

/// Reference set and load state of one representation.
#[derive(Debug, Clone)]
pub struct RepresentationState {
    locator: Option<String>,
    state: LoadState,
    references: BTreeSet<OwnerId>,
    handle: Option<LoadHandle>,
    cached_since: Option<Instant>,
    load_count: u32,
}

impl RepresentationState {
    pub fn new(locator: Option<String>) -> Self {
        Self {
            locator,
            state: LoadState::Unloaded,
            references: BTreeSet::new(),
            handle: None,
            cached_since: None,
            load_count: 0,
        }
    }

    pub fn locator(&self) -> Option<&str> {
        self.locator.as_deref()
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn references(&self) -> &BTreeSet<OwnerId> {
        &self.references
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    pub fn has_reference(&self, owner: OwnerId) -> bool {
        self.references.contains(&owner)
    }

    pub fn is_referenced(&self) -> bool {
        !self.references.is_empty()
    }

    /// When the representation entered `Cached`.
    pub fn cached_since(&self) -> Option<Instant> {
        self.cached_since
    }

    /// How many times a load was started through the host.
    pub fn load_count(&self) -> u32 {
        self.load_count
    }

    pub(crate) fn add_reference<H: SceneHost + ?Sized>(
        &mut self,
        owner: OwnerId,
        representation: Representation,
        host: &mut H,
    ) -> AddOutcome {
        if !self.references.insert(owner) {
            return AddOutcome::AlreadyReferenced;
        }
        match self.state {
            LoadState::Unloaded => {
                let Some(locator) = self.locator.as_deref() else {
                    self.references.remove(&owner);
                    return AddOutcome::NoSource;
                };
                match host.begin_load(locator, representation) {
                    Ok(handle) => {
                        self.handle = Some(handle);
                        self.load_count += 1;
                        self.state = if host.is_resident(handle) {
                            LoadState::Loaded
                        } else {
                            LoadState::Loading
                        };
                        AddOutcome::LoadStarted
                    }
                    Err(err) => {
                        self.references.remove(&owner);
                        AddOutcome::Failed(err)
                    }
                }
            }
            LoadState::Cached => {
                self.state = LoadState::Loaded;
                self.cached_since = None;
                AddOutcome::PromotedFromCache
            }
            LoadState::Loading | LoadState::Loaded => AddOutcome::Joined,
        }
    }

    pub(crate) fn remove_reference<H: SceneHost + ?Sized>(
        &mut self,
        owner: OwnerId,
        host: &mut H,
        caching_allowed: bool,
        forced: bool,
        now: Instant,
    ) -> RemoveOutcome {
        if !self.references.remove(&owner) {
            return RemoveOutcome::NotReferenced;
        }
        if !self.references.is_empty() {
            return RemoveOutcome::StillReferenced;
        }
        match self.state {
            LoadState::Loaded if caching_allowed && !forced => {
                self.state = LoadState::Cached;
                self.cached_since = Some(now);
                RemoveOutcome::Cached
            }
            _ => {
                self.unload(host);
                RemoveOutcome::Unloaded
            }
        }
    }

    /// Move a `Loading` representation to `Loaded` once the host reports it
    /// resident. Returns true on that transition.
    pub(crate) fn poll<H: SceneHost + ?Sized>(&mut self, host: &mut H) -> bool {
        match (self.state, self.handle) {
            (LoadState::Loading, Some(handle)) if host.is_resident(handle) => {
                self.state = LoadState::Loaded;
                true
            }
            _ => false,
        }
    }

    /// Unload a `Cached` representation. Returns true if it was cached.
    pub(crate) fn evict<H: SceneHost + ?Sized>(&mut self, host: &mut H) -> bool {
        if self.state != LoadState::Cached {
            return false;
        }
        self.unload(host);
        true
    }

    /// Drop every reference and unload whatever is resident.
    pub(crate) fn release_all<H: SceneHost + ?Sized>(&mut self, host: &mut H) {
        self.references.clear();
        self.unload(host);
    }

    fn unload<H: SceneHost + ?Sized>(&mut self, host: &mut H) {
        if let Some(handle) = self.handle.take() {
            host.begin_unload(handle);
        }
        self.state = LoadState::Unloaded;
        self.cached_since = None;
    }
}

/// Streaming metadata of one terrain tile.
#[derive(Debug, Clone)]
pub struct TileDescriptor {
    id: TileId,
    pub name: String,
    /// Minimum corner in world space.
    pub position: DVec3,
    pub bounds: Bounds,
    pub coord: Option<GridCoord>,
    pub collider: Option<String>,
    pub backup: Option<String>,
    pub large_world_fix: bool,
    /// Accumulated origin shift applied to this tile while it is resident.
    pub origin_offset: DVec3,
    pub regular: RepresentationState,
    pub impostor: RepresentationState,
    /// Earliest time the tile's loading state may be polled again.
    pub next_update: Option<Instant>,
}

impl TileDescriptor {
    pub fn from_record(id: TileId, record: TileRecord) -> Self {
        Self {
            id,
            name: record.name,
            position: record.position,
            bounds: record.bounds,
            coord: record.coord,
            collider: record.collider,
            backup: record.backup,
            large_world_fix: record.large_world_fix,
            origin_offset: DVec3::ZERO,
            regular: RepresentationState::new(record.regular),
            impostor: RepresentationState::new(record.impostor),
            next_update: None,
        }
    }

    pub fn to_record(&self) -> TileRecord {
        TileRecord {
            name: self.name.clone(),
            regular: self.regular.locator.clone(),
            impostor: self.impostor.locator.clone(),
            collider: self.collider.clone(),
            backup: self.backup.clone(),
            position: self.position,
            bounds: self.bounds,
            coord: self.coord,
            large_world_fix: self.large_world_fix,
        }
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn representation(&self, representation: Representation) -> &RepresentationState {
        match representation {
            Representation::Regular => &self.regular,
            Representation::Impostor => &self.impostor,
        }
    }

    pub fn representation_mut(
        &mut self,
        representation: Representation,
    ) -> &mut RepresentationState {
        match representation {
            Representation::Regular => &mut self.regular,
            Representation::Impostor => &mut self.impostor,
        }
    }

    /// Position after origin shifting.
    pub fn effective_position(&self) -> DVec3 {
        self.position + self.origin_offset
    }

    pub fn is_resident(&self) -> bool {
        [&self.regular, &self.impostor]
            .iter()
            .any(|r| r.state != LoadState::Unloaded)
    }
}
