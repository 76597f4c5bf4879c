//! Priority-ordered queue of pending reference changes.
//!
//! # Invariants
//! - Entries are always sorted: in-frustum before out-of-frustum, then by
//!   ascending distance. Equal keys keep insertion order.
//! - No two entries share (tile, owner, kind).
//! - An entry and its opposite (add vs remove of the same representation
//!   for the same tile and owner) never coexist: the second cancels the first.

use terrastream_common::{OwnerId, TileId};

use crate::tile::Representation;

/// The reference change an entry requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    AddRegularRef,
    RemoveRegularRef,
    AddImpostorRef,
    RemoveImpostorRef,
}

impl ActionKind {
    pub fn add(representation: Representation) -> Self {
        match representation {
            Representation::Regular => Self::AddRegularRef,
            Representation::Impostor => Self::AddImpostorRef,
        }
    }

    pub fn remove(representation: Representation) -> Self {
        match representation {
            Representation::Regular => Self::RemoveRegularRef,
            Representation::Impostor => Self::RemoveImpostorRef,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::AddRegularRef => Self::RemoveRegularRef,
            Self::RemoveRegularRef => Self::AddRegularRef,
            Self::AddImpostorRef => Self::RemoveImpostorRef,
            Self::RemoveImpostorRef => Self::AddImpostorRef,
        }
    }

    pub fn representation(self) -> Representation {
        match self {
            Self::AddRegularRef | Self::RemoveRegularRef => Representation::Regular,
            Self::AddImpostorRef | Self::RemoveImpostorRef => Representation::Impostor,
        }
    }

    pub fn is_add(self) -> bool {
        matches!(self, Self::AddRegularRef | Self::AddImpostorRef)
    }
}

/// A pending reference change.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub tile: TileId,
    pub kind: ActionKind,
    pub owner: OwnerId,
    pub distance: f64,
    pub in_frustum: bool,
    /// Removal skips the cache and unloads immediately.
    pub forced: bool,
}

impl QueueEntry {
    fn same_target(&self, tile: TileId, owner: OwnerId) -> bool {
        self.tile == tile && self.owner == owner
    }

    /// Sorts before `other` when strictly higher priority.
    fn precedes(&self, other: &QueueEntry) -> bool {
        match (self.in_frustum, other.in_frustum) {
            (true, false) => true,
            (false, true) => false,
            _ => self.distance < other.distance,
        }
    }
}

/// What happened to an enqueue request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// An identical entry was already pending.
    Duplicate,
    /// The opposite entry was pending; both were dropped.
    Cancelled,
}

#[derive(Debug, Default)]
pub struct ActionQueue {
    entries: Vec<QueueEntry>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, entry: QueueEntry) -> EnqueueOutcome {
        let opposite = entry.kind.opposite();
        let mut duplicate = false;
        let mut cancel_at = None;
        for (i, e) in self.entries.iter().enumerate() {
            if !e.same_target(entry.tile, entry.owner) {
                continue;
            }
            if e.kind == entry.kind {
                duplicate = true;
            } else if e.kind == opposite {
                cancel_at = Some(i);
            }
        }
        if let Some(i) = cancel_at {
            self.entries.remove(i);
            return EnqueueOutcome::Cancelled;
        }
        if duplicate {
            return EnqueueOutcome::Duplicate;
        }
        let at = self.entries.partition_point(|e| !entry.precedes(e));
        self.entries.insert(at, entry);
        EnqueueOutcome::Queued
    }

    /// Whether an entry of `kind` is pending for this tile and owner.
    pub fn contains(&self, tile: TileId, owner: OwnerId, kind: ActionKind) -> bool {
        self.entries
            .iter()
            .any(|e| e.kind == kind && e.same_target(tile, owner))
    }

    /// Remove and return up to `max` highest-priority entries.
    pub fn take_batch(&mut self, max: usize) -> Vec<QueueEntry> {
        let n = max.min(self.entries.len());
        self.entries.drain(..n).collect()
    }

    pub fn take_all(&mut self) -> Vec<QueueEntry> {
        std::mem::take(&mut self.entries)
    }

    /// Drop every pending entry for a tile (used when the tile is deleted).
    pub fn remove_tile(&mut self, tile: TileId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.tile != tile);
        before - self.entries.len()
    }

    pub fn peek(&self) -> Option<&QueueEntry> {
        self.entries.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
