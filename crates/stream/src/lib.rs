//! Terrain tile streaming: reference-counted loading, priority-ordered
//! action queue, caching and load progress.
//!
//! # Invariants
//! - A representation is resident iff at least one owner references it, or
//!   it sits in the cache.
//! - A tile is asked to load through the host at most once per residency.
//! - Nothing here blocks; loads complete through host polling.
//!
//! The host drives a [`StreamingContext`] with loading volumes and calls
//! [`StreamingContext::tick`] once per frame. Scene loading and time are
//! reached through the [`SceneHost`] and [`Clock`] seams.

mod budget;
mod cache;
mod config;
mod context;
mod error;
mod frustum;
mod host;
mod progress;
mod queue;
mod registry;
mod spatial;
mod tile;

pub use budget::{ActionBudget, FrameTimer, StreamStats};
pub use cache::{CachePolicy, ExecutionContext};
pub use config::{CacheMemoryPreset, StreamConfig};
pub use context::{LoaderRequest, OriginMemberId, StreamingContext};
pub use error::{HostError, StreamError};
pub use frustum::{FrustumCamera, FrustumTest, ViewFrustum};
pub use host::{
    ADDRESSABLE_SCHEME, ADDRESSABLES_DEPENDENCY, AllAvailable, Capabilities, Clock, Completion,
    DependencyProbe, LoadHandle, ManualClock, MemoryHost, PROGRESS_TRACKING_DEPENDENCY, SceneHost,
    SystemClock,
};
pub use progress::{ListenerId, ProgressEvent, ProgressSnapshot, ProgressTracker};
pub use queue::{ActionKind, ActionQueue, EnqueueOutcome, QueueEntry};
pub use registry::TileRegistry;
pub use spatial::{CoordRect, LoadingVolume, QueryMode, distance_to, grid_range, tiles_in_volume};
pub use tile::{AddOutcome, LoadState, RemoveOutcome, Representation, RepresentationState, TileDescriptor};

pub fn crate_info() -> &'static str {
    "terrastream-stream v0.1.0"
}
