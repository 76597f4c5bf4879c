//! Shared value types for the terrastream workspace.
//!
//! Everything here is plain data: identities, grid coordinates, bounds and
//! the persisted tile record. The streaming core and the persistence layer
//! both build on these types.

mod grid;
mod record;
mod types;

pub use grid::GridLayout;
pub use record::TileRecord;
pub use types::{Bounds, Direction, GridCoord, OwnerId, TileId};
