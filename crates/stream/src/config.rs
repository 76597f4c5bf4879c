use std::path::Path;
use std::time::Duration;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::StreamError;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

/// Memory threshold presets for the tile cache. `Custom` defers to
/// [`StreamConfig::cache_memory_custom_bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMemoryPreset {
    #[serde(rename = "256MB")]
    Mb256,
    #[serde(rename = "512MB")]
    Mb512,
    #[serde(rename = "1GB")]
    Gb1,
    #[serde(rename = "2GB")]
    Gb2,
    #[serde(rename = "4GB")]
    Gb4,
    #[serde(rename = "8GB")]
    Gb8,
    #[serde(rename = "16GB")]
    Gb16,
    #[serde(rename = "32GB")]
    Gb32,
    Custom,
}

impl CacheMemoryPreset {
    /// Byte count for the preset, or `None` for `Custom`.
    pub fn bytes(self) -> Option<u64> {
        match self {
            Self::Mb256 => Some(256 * MIB),
            Self::Mb512 => Some(512 * MIB),
            Self::Gb1 => Some(GIB),
            Self::Gb2 => Some(2 * GIB),
            Self::Gb4 => Some(4 * GIB),
            Self::Gb8 => Some(8 * GIB),
            Self::Gb16 => Some(16 * GIB),
            Self::Gb32 => Some(32 * GIB),
            Self::Custom => None,
        }
    }
}

/// Streaming configuration: grid assumptions, caching, throttling and
/// progress timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Global switch. When false, load-state recomputation is a no-op.
    pub terrain_loading_enabled: bool,
    /// Treat tiles as a uniform grid and resolve volumes by coordinate range.
    pub assume_grid_layout: bool,
    /// Allow unreferenced tiles to stay cached while playing.
    pub cache_in_runtime: bool,
    /// Allow unreferenced tiles to stay cached while editing.
    pub cache_in_editor: bool,
    pub cache_memory_preset: CacheMemoryPreset,
    /// Threshold used when the preset is `Custom`.
    pub cache_memory_custom_bytes: u64,
    /// How long a cached tile survives before eviction.
    pub cache_keep_alive_ms: u64,
    /// Minimum time between two action batches while playing.
    pub terrain_loading_threshold_ms: u64,
    /// Number of queued actions executed per batch while playing.
    pub max_actions_per_batch: usize,
    /// Progress that does not move for this long is reported as timed out.
    pub progress_timeout_ms: u64,
    /// Safety net for a hot reload whose completion is never signalled.
    pub assembly_reload_timeout_ms: u64,
    /// Minimum time between two residency polls of a loading tile.
    pub load_poll_interval_ms: u64,
    /// Extents of the origin loader's regular volume.
    pub regular_range: DVec3,
    /// Extents of the origin loader's impostor volume.
    pub impostor_range: DVec3,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            terrain_loading_enabled: true,
            assume_grid_layout: true,
            cache_in_runtime: true,
            cache_in_editor: false,
            cache_memory_preset: CacheMemoryPreset::Gb4,
            cache_memory_custom_bytes: 4 * GIB,
            cache_keep_alive_ms: 60_000,
            terrain_loading_threshold_ms: 100,
            max_actions_per_batch: 1,
            progress_timeout_ms: 20_000,
            assembly_reload_timeout_ms: 10_000,
            load_poll_interval_ms: 0,
            regular_range: DVec3::splat(1000.0),
            impostor_range: DVec3::splat(3000.0),
        }
    }
}

impl StreamConfig {
    /// Parse a YAML document. Missing fields fall back to defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, StreamError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String, StreamError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Effective cache memory threshold in bytes.
    pub fn cache_memory_threshold_bytes(&self) -> u64 {
        self.cache_memory_preset
            .bytes()
            .unwrap_or(self.cache_memory_custom_bytes)
    }

    pub fn cache_keep_alive(&self) -> Duration {
        Duration::from_millis(self.cache_keep_alive_ms)
    }

    pub fn terrain_loading_threshold(&self) -> Duration {
        Duration::from_millis(self.terrain_loading_threshold_ms)
    }

    pub fn progress_timeout(&self) -> Duration {
        Duration::from_millis(self.progress_timeout_ms)
    }

    pub fn assembly_reload_timeout(&self) -> Duration {
        Duration::from_millis(self.assembly_reload_timeout_ms)
    }

    pub fn load_poll_interval(&self) -> Duration {
        Duration::from_millis(self.load_poll_interval_ms)
    }
}
