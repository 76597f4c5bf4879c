//! Persistence for tile records: directory scanning and a versioned,
//! integrity-checked record store.
//!
//! # Invariants
//! - Stores are schema-versioned; a mismatch fails closed.
//! - Loaded payloads are verified against their recorded hash.

mod scan;
mod store;

pub use scan::scan_directory;
pub use store::{StoreError, TileMeta, TileStore};

pub fn crate_info() -> &'static str {
    "terrastream-persist v0.1.0"
}
