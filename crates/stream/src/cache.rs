//! Cache and eviction policy for unreferenced tiles.
//!
//! A representation whose last reference goes away may linger as `Cached`
//! when the current execution context allows it. Cached entries are evicted
//! when their keep-alive runs out, when caching stops being allowed, or when
//! the host reports memory use above the configured threshold.

use std::time::{Duration, Instant};

use terrastream_common::TileId;

use crate::config::StreamConfig;
use crate::host::SceneHost;
use crate::registry::TileRegistry;
use crate::tile::{LoadState, Representation};

/// Whether the host is authoring or running the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionContext {
    Editing,
    Playing,
}

impl ExecutionContext {
    pub fn is_live(self) -> bool {
        self == Self::Playing
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicy {
    pub cache_in_runtime: bool,
    pub cache_in_editor: bool,
    pub keep_alive: Duration,
    pub memory_threshold_bytes: u64,
}

impl CachePolicy {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            cache_in_runtime: config.cache_in_runtime,
            cache_in_editor: config.cache_in_editor,
            keep_alive: config.cache_keep_alive(),
            memory_threshold_bytes: config.cache_memory_threshold_bytes(),
        }
    }

    pub fn caching_allowed(&self, context: ExecutionContext) -> bool {
        match context {
            ExecutionContext::Playing => self.cache_in_runtime,
            ExecutionContext::Editing => self.cache_in_editor,
        }
    }

    pub fn is_expired(&self, cached_since: Instant, now: Instant) -> bool {
        cached_since + self.keep_alive <= now
    }

    pub fn exceeds_memory(&self, resident_bytes: u64) -> bool {
        resident_bytes > self.memory_threshold_bytes
    }

    /// Evict cached representations whose keep-alive elapsed, or all of them
    /// when caching is not allowed in `context`.
    pub fn update_caching<H: SceneHost + ?Sized>(
        &self,
        registry: &mut TileRegistry,
        host: &mut H,
        now: Instant,
        context: ExecutionContext,
    ) -> Vec<(TileId, Representation)> {
        let allowed = self.caching_allowed(context);
        let mut evicted = Vec::new();
        for tile in registry.iter_mut() {
            let id = tile.id();
            for repr in [Representation::Regular, Representation::Impostor] {
                let state = tile.representation_mut(repr);
                let Some(since) = state.cached_since() else {
                    continue;
                };
                if (!allowed || self.is_expired(since, now)) && state.evict(host) {
                    tracing::debug!(tile = %id, ?repr, allowed, "evicted cached tile");
                    evicted.push((id, repr));
                }
            }
        }
        evicted
    }

    /// Evict cached representations oldest-first while the host reports
    /// memory use above the threshold. Does nothing if the host cannot
    /// report memory.
    pub fn evict_for_memory<H: SceneHost + ?Sized>(
        &self,
        registry: &mut TileRegistry,
        host: &mut H,
    ) -> Vec<(TileId, Representation)> {
        let mut evicted = Vec::new();
        loop {
            match host.resident_memory_bytes() {
                Some(bytes) if self.exceeds_memory(bytes) => {}
                _ => break,
            }
            let oldest = registry
                .iter()
                .flat_map(|t| {
                    [Representation::Regular, Representation::Impostor]
                        .into_iter()
                        .filter_map(move |r| {
                            let state = t.representation(r);
                            (state.state() == LoadState::Cached)
                                .then_some(state.cached_since())
                                .flatten()
                                .map(|since| (since, t.id(), r))
                        })
                })
                .min_by_key(|(since, _, _)| *since);
            let Some((_, id, repr)) = oldest else {
                break;
            };
            if let Some(tile) = registry.get_mut(id) {
                tile.representation_mut(repr).evict(host);
            }
            tracing::debug!(tile = %id, ?repr, "evicted cached tile under memory pressure");
            evicted.push((id, repr));
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use glam::DVec3;
    use terrastream_common::{GridCoord, GridLayout, OwnerId, TileRecord};

    fn policy(keep_alive_ms: u64) -> CachePolicy {
        CachePolicy {
            cache_in_runtime: true,
            cache_in_editor: true,
            keep_alive: Duration::from_millis(keep_alive_ms),
            memory_threshold_bytes: u64::MAX,
        }
    }

    /// Registry with `n` tiles, each loaded then released into the cache at
    /// `start + i ms`.
    fn cached_registry(host: &mut MemoryHost, n: i32, start: Instant) -> (TileRegistry, Vec<TileId>) {
        let layout = GridLayout::new(10.0, DVec3::ZERO);
        let mut reg = TileRegistry::new();
        let mut ids = Vec::new();
        let owner = OwnerId::new();
        for i in 0..n {
            let name = format!("terrain_{i}_0");
            let id = reg
                .register(TileRecord::on_grid(name.clone(), &layout, GridCoord::new(i, 0), 1.0, name))
                .unwrap();
            let rep = reg.get_mut(id).unwrap().representation_mut(Representation::Regular);
            rep.add_reference(owner, Representation::Regular, host);
            rep.remove_reference(owner, host, true, false, start + Duration::from_millis(i as u64));
            ids.push(id);
        }
        (reg, ids)
    }

    #[test]
    fn caching_follows_context_flags() {
        let p = CachePolicy {
            cache_in_runtime: true,
            cache_in_editor: false,
            ..policy(0)
        };
        assert!(p.caching_allowed(ExecutionContext::Playing));
        assert!(!p.caching_allowed(ExecutionContext::Editing));
    }

    #[test]
    fn eviction_waits_for_keep_alive() {
        let mut host = MemoryHost::immediate();
        let t0 = Instant::now();
        let (mut reg, ids) = cached_registry(&mut host, 1, t0);
        let p = policy(1000);

        let evicted = p.update_caching(&mut reg, &mut host, t0 + Duration::from_millis(999), ExecutionContext::Playing);
        assert!(evicted.is_empty());
        assert_eq!(reg.get(ids[0]).unwrap().regular.state(), LoadState::Cached);

        let evicted = p.update_caching(&mut reg, &mut host, t0 + Duration::from_millis(1000), ExecutionContext::Playing);
        assert_eq!(evicted, vec![(ids[0], Representation::Regular)]);
        assert_eq!(reg.get(ids[0]).unwrap().regular.state(), LoadState::Unloaded);
        assert_eq!(host.resource_count(), 0);
    }

    #[test]
    fn disallowed_caching_evicts_immediately() {
        let mut host = MemoryHost::immediate();
        let t0 = Instant::now();
        let (mut reg, _) = cached_registry(&mut host, 2, t0);
        let p = CachePolicy {
            cache_in_editor: false,
            ..policy(60_000)
        };
        let evicted = p.update_caching(&mut reg, &mut host, t0, ExecutionContext::Editing);
        assert_eq!(evicted.len(), 2);
    }

    #[test]
    fn memory_pressure_evicts_oldest_first() {
        let mut host = MemoryHost::immediate().with_bytes_per_resource(100);
        let t0 = Instant::now();
        let (mut reg, ids) = cached_registry(&mut host, 3, t0);
        let p = CachePolicy {
            memory_threshold_bytes: 150,
            ..policy(60_000)
        };
        let evicted = p.evict_for_memory(&mut reg, &mut host);
        assert_eq!(
            evicted,
            vec![(ids[0], Representation::Regular), (ids[1], Representation::Regular)]
        );
        assert_eq!(reg.get(ids[2]).unwrap().regular.state(), LoadState::Cached);
        assert_eq!(host.resident_memory_bytes(), Some(100));
    }

    #[test]
    fn memory_pressure_without_cached_tiles_stops() {
        let mut host = MemoryHost::immediate().with_bytes_per_resource(100);
        let mut reg = TileRegistry::new();
        let p = CachePolicy {
            memory_threshold_bytes: 0,
            ..policy(0)
        };
        host.begin_load("pinned", Representation::Regular).unwrap();
        assert!(p.evict_for_memory(&mut reg, &mut host).is_empty());
    }
}
