use terrastream_common::{GridCoord, TileId};

/// Errors reported by the host's scene-loading layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("load rejected for {locator}: {reason}")]
    Rejected { locator: String, reason: String },
}

/// Errors from streaming operations.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("grid coordinate math requested but assume_grid_layout is disabled")]
    GridLayoutDisabled,
    #[error("unknown tile {0}")]
    UnknownTile(TileId),
    #[error("tile '{0}' has no regular locator")]
    MissingSource(String),
    #[error("grid coordinate {coord:?} already registered for {existing}")]
    DuplicateCoord { coord: GridCoord, existing: TileId },
    #[error("locator '{0}' needs addressable loading support, which is not available")]
    CapabilityMissing(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),
}
