//! The streaming orchestrator.
//!
//! A [`StreamingContext`] owns the tile registry, the action queue, the
//! cache policy and the optional progress tracker. The host builds one per
//! world and drives it through explicit calls: loading volumes in,
//! [`StreamingContext::tick`] once per frame.
//!
//! # Invariants
//! - Recomputation enqueues a requester's removals before its additions;
//!   execution order is decided by the queue's priority alone.
//! - Outside of play mode the queue is drained fully on every recomputation.
//! - Actions whose tile was deleted are skipped, never applied.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use glam::DVec3;
use terrastream_common::{Direction, GridCoord, GridLayout, OwnerId, TileId, TileRecord};

use crate::budget::{ActionBudget, FrameTimer, StreamStats};
use crate::cache::{CachePolicy, ExecutionContext};
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::frustum::{FrustumCamera, FrustumTest};
use crate::host::{Capabilities, Clock, DependencyProbe, SceneHost, SystemClock};
use crate::progress::{ListenerId, ProgressEvent, ProgressTracker};
use crate::queue::{ActionKind, ActionQueue, EnqueueOutcome, QueueEntry};
use crate::registry::TileRegistry;
use crate::spatial::{LoadingVolume, QueryMode, distance_to, tiles_in_volume};
use crate::tile::{AddOutcome, LoadState, Representation, RemoveOutcome, TileDescriptor};

const FRAME_TIMER_CAPACITY: usize = 120;

/// The last loading request of one requester.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoaderRequest {
    /// Volume for full-detail tiles. `None` requests none.
    pub regular: Option<LoadingVolume>,
    /// Volume for impostors. `None` requests none.
    pub impostor: Option<LoadingVolume>,
    /// Camera used to prioritize visible tiles.
    pub frustum: Option<FrustumCamera>,
}

impl LoaderRequest {
    /// Both volumes centered on `center` with the given extents.
    pub fn around(center: DVec3, regular_range: DVec3, impostor_range: DVec3) -> Self {
        Self {
            regular: Some(LoadingVolume::new(center, regular_range)),
            impostor: Some(LoadingVolume::new(center, impostor_range)),
            frustum: None,
        }
    }

    pub fn with_frustum(mut self, camera: FrustumCamera) -> Self {
        self.frustum = Some(camera);
        self
    }

    /// Point distances are measured from.
    fn anchor(&self) -> DVec3 {
        self.frustum
            .map(|f| f.position)
            .or(self.regular.map(|v| v.center))
            .or(self.impostor.map(|v| v.center))
            .unwrap_or(DVec3::ZERO)
    }
}

/// Handle for an object kept in place across origin shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OriginMemberId(u64);

pub struct StreamingContext<H: SceneHost, C: Clock = SystemClock> {
    config: StreamConfig,
    layout: Option<GridLayout>,
    registry: TileRegistry,
    queue: ActionQueue,
    budget: ActionBudget,
    cache: CachePolicy,
    progress: Option<ProgressTracker>,
    capabilities: Capabilities,
    host: H,
    clock: C,
    execution: ExecutionContext,
    runtime_initialized: bool,
    reload_started: Option<Instant>,
    loaders: BTreeMap<OwnerId, LoaderRequest>,
    origin_loader: OwnerId,
    loading_center: DVec3,
    world_origin: DVec3,
    origin_members: BTreeMap<OriginMemberId, DVec3>,
    next_member: u64,
    stats: StreamStats,
    frame_timer: FrameTimer,
}

impl<H: SceneHost, C: Clock> StreamingContext<H, C> {
    /// Create a context in editing mode with every capability enabled.
    pub fn new(config: StreamConfig, host: H, clock: C) -> Self {
        let capabilities = Capabilities::all();
        Self {
            layout: None,
            registry: TileRegistry::new(),
            queue: ActionQueue::new(),
            budget: ActionBudget::new(
                config.terrain_loading_threshold(),
                config.max_actions_per_batch,
            ),
            cache: CachePolicy::from_config(&config),
            progress: Some(ProgressTracker::new(config.progress_timeout())),
            capabilities,
            host,
            clock,
            execution: ExecutionContext::Editing,
            runtime_initialized: false,
            reload_started: None,
            loaders: BTreeMap::new(),
            origin_loader: OwnerId::new(),
            loading_center: DVec3::ZERO,
            world_origin: DVec3::ZERO,
            origin_members: BTreeMap::new(),
            next_member: 0,
            stats: StreamStats::default(),
            frame_timer: FrameTimer::new(FRAME_TIMER_CAPACITY),
            config,
        }
    }

    pub fn with_layout(mut self, layout: GridLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Detect optional capabilities from the host. Without progress
    /// tracking support the tracker is dropped.
    pub fn with_probe(mut self, probe: &dyn DependencyProbe) -> Self {
        self.capabilities = Capabilities::detect(probe);
        if !self.capabilities.progress_tracking {
            self.progress = None;
        }
        self
    }

    // --- registry --------------------------------------------------------

    /// Register a tile. Locators the host cannot load are rejected.
    pub fn register_tile(&mut self, record: TileRecord) -> Result<TileId, StreamError> {
        let unsupported = [&record.regular, &record.impostor, &record.collider]
            .into_iter()
            .flatten()
            .find(|l| !self.capabilities.supports_locator(l))
            .cloned();
        if let Some(locator) = unsupported {
            tracing::warn!(name = %record.name, %locator, "tile needs addressable loading support");
            return Err(StreamError::CapabilityMissing(locator));
        }
        self.registry.register(record)
    }

    /// Delete a tile, unloading whatever it has resident and dropping its
    /// pending actions.
    pub fn remove_tile(&mut self, id: TileId) -> Result<TileRecord, StreamError> {
        let mut tile = self.registry.remove(id).ok_or(StreamError::UnknownTile(id))?;
        let dropped = self.queue.remove_tile(id);
        tile.regular.release_all(&mut self.host);
        tile.impostor.release_all(&mut self.host);
        tracing::debug!(%id, dropped, "removed tile");
        Ok(tile.to_record())
    }

    pub fn registry(&self) -> &TileRegistry {
        &self.registry
    }

    pub fn tile(&self, id: TileId) -> Option<&TileDescriptor> {
        self.registry.get(id)
    }

    pub fn records(&self) -> Vec<TileRecord> {
        self.registry.records()
    }

    // --- grid ------------------------------------------------------------

    pub fn layout(&self) -> Option<&GridLayout> {
        self.layout.as_ref()
    }

    fn grid_layout(&self) -> Option<&GridLayout> {
        if self.config.assume_grid_layout {
            self.layout.as_ref()
        } else {
            None
        }
    }

    /// Grid coordinate of a world position. Fails when the world is not
    /// treated as a grid.
    pub fn grid_coord_of(&self, position: DVec3) -> Result<GridCoord, StreamError> {
        match self.grid_layout() {
            Some(layout) => Ok(layout.coord_of(position)),
            None => {
                tracing::error!("grid coordinates requested while assume_grid_layout is off or no layout is set");
                Err(StreamError::GridLayoutDisabled)
            }
        }
    }

    /// The tile one step away from `tile` in `direction`, if registered.
    pub fn try_get_neighbor(&self, tile: TileId, direction: Direction) -> Option<TileId> {
        let coord = self.registry.get(tile)?.coord?;
        self.registry.find_by_coord(coord.step(direction))
    }

    fn query_mode(&self) -> QueryMode<'_> {
        match self.grid_layout() {
            Some(layout) => QueryMode::Grid(layout),
            None => QueryMode::Irregular,
        }
    }

    /// Tiles touched by a volume, using the configured query path.
    pub fn tiles_in_volume(&self, volume: &LoadingVolume) -> BTreeSet<TileId> {
        tiles_in_volume(&self.registry, volume, self.query_mode())
    }

    // --- execution context -------------------------------------------------

    pub fn execution(&self) -> ExecutionContext {
        self.execution
    }

    /// Switch between editing and playing. Entering play mode requires
    /// [`Self::initialize_runtime`] before loading resumes.
    pub fn set_execution_context(&mut self, execution: ExecutionContext) {
        if self.execution == execution {
            return;
        }
        tracing::info!(?execution, "execution context changed");
        self.execution = execution;
        self.budget.reset();
        if execution.is_live() {
            self.runtime_initialized = false;
        }
    }

    /// One-time runtime setup after entering play mode.
    pub fn initialize_runtime(&mut self) {
        self.runtime_initialized = true;
        tracing::debug!("streaming runtime initialized");
    }

    pub fn set_terrain_loading_enabled(&mut self, enabled: bool) {
        self.config.terrain_loading_enabled = enabled;
    }

    /// Suppress recomputation while the host reloads code.
    pub fn begin_assembly_reload(&mut self) {
        self.reload_started = Some(self.clock.now());
    }

    pub fn end_assembly_reload(&mut self) {
        self.reload_started = None;
    }

    pub fn is_reload_suppressed(&self) -> bool {
        self.reload_started.is_some()
    }

    fn expire_reload_suppression(&mut self, now: Instant) {
        if let Some(since) = self.reload_started {
            if now.duration_since(since) >= self.config.assembly_reload_timeout() {
                tracing::warn!("assembly reload never completed, lifting suppression");
                self.reload_started = None;
            }
        }
    }

    fn loading_allowed(&mut self) -> bool {
        if !self.config.terrain_loading_enabled {
            tracing::debug!("terrain loading disabled");
            return false;
        }
        if self.execution.is_live() && !self.runtime_initialized {
            tracing::debug!("runtime not initialized yet");
            return false;
        }
        let now = self.clock.now();
        self.expire_reload_suppression(now);
        if self.reload_started.is_some() {
            tracing::debug!("recomputation suppressed during assembly reload");
            return false;
        }
        true
    }

    // --- load state --------------------------------------------------------

    /// Recompute what `requester` should hold and queue the difference.
    ///
    /// Returns false when recomputation is currently suppressed. The request
    /// is remembered either way so a forced recompute can replay it.
    pub fn update_terrain_load_state(&mut self, requester: OwnerId, request: LoaderRequest) -> bool {
        let _span = tracing::info_span!("update_terrain_load_state").entered();
        self.loaders.insert(requester, request.clone());
        if !self.loading_allowed() {
            return false;
        }

        let regular = self.desired(request.regular.as_ref(), Representation::Regular);
        let impostor = self.desired(request.impostor.as_ref(), Representation::Impostor);
        let anchor = request.anchor();
        let frustum = request.frustum.as_ref();

        let mut removals = Vec::new();
        let mut additions = Vec::new();
        for (repr, desired) in [
            (Representation::Regular, &regular),
            (Representation::Impostor, &impostor),
        ] {
            for tile in self.registry.iter() {
                let held = self.holds(tile, requester, repr);
                let wanted = desired.contains(&tile.id());
                if held && !wanted {
                    removals.push(self.entry(tile, ActionKind::remove(repr), requester, anchor, frustum));
                } else if wanted && !held {
                    additions.push(self.entry(tile, ActionKind::add(repr), requester, anchor, frustum));
                }
            }
        }

        let (queued_removals, queued_additions) = (removals.len(), additions.len());
        for entry in removals.into_iter().chain(additions) {
            if self.queue.enqueue(entry) == EnqueueOutcome::Cancelled {
                tracing::trace!("queued action cancelled by its opposite");
            }
        }
        tracing::debug!(
            removals = queued_removals,
            additions = queued_additions,
            pending = self.queue.len(),
            "load state recomputed"
        );

        if !self.execution.is_live() {
            self.process_queue();
        }
        true
    }

    fn desired(&self, volume: Option<&LoadingVolume>, repr: Representation) -> BTreeSet<TileId> {
        let Some(volume) = volume else {
            return BTreeSet::new();
        };
        let mut tiles = self.tiles_in_volume(volume);
        if repr == Representation::Impostor {
            tiles.retain(|id| {
                self.registry
                    .get(*id)
                    .is_some_and(|t| t.impostor.locator().is_some())
            });
        }
        tiles
    }

    /// Whether `owner` holds (or will hold, once the queue drains) a
    /// reference on this representation.
    fn holds(&self, tile: &TileDescriptor, owner: OwnerId, repr: Representation) -> bool {
        if self.queue.contains(tile.id(), owner, ActionKind::remove(repr)) {
            return false;
        }
        if self.queue.contains(tile.id(), owner, ActionKind::add(repr)) {
            return true;
        }
        tile.representation(repr).has_reference(owner)
    }

    fn entry(
        &self,
        tile: &TileDescriptor,
        kind: ActionKind,
        owner: OwnerId,
        anchor: DVec3,
        frustum: Option<&FrustumCamera>,
    ) -> QueueEntry {
        QueueEntry {
            tile: tile.id(),
            kind,
            owner,
            distance: distance_to(anchor, &tile.bounds),
            in_frustum: frustum.is_some_and(|f| f.intersects(&tile.bounds)),
            forced: false,
        }
    }

    /// Move the origin loader and recompute.
    pub fn set_loading_center(&mut self, center: DVec3) -> bool {
        self.loading_center = center;
        self.refresh_origin_loader()
    }

    /// Resize the origin loader's volumes and recompute. Zero horizontal
    /// extents release everything the origin loader holds.
    pub fn set_loading_range(&mut self, regular_range: DVec3, impostor_range: DVec3) -> bool {
        self.config.regular_range = regular_range;
        self.config.impostor_range = impostor_range;
        self.refresh_origin_loader()
    }

    fn refresh_origin_loader(&mut self) -> bool {
        let request = LoaderRequest::around(
            self.loading_center,
            self.config.regular_range,
            self.config.impostor_range,
        );
        self.update_terrain_load_state(self.origin_loader, request)
    }

    /// Identity the context itself uses for its origin-centered loading.
    pub fn origin_loader(&self) -> OwnerId {
        self.origin_loader
    }

    /// Release everything `owner` holds and forget its request.
    pub fn remove_loader(&mut self, owner: OwnerId) -> bool {
        let ran = self.update_terrain_load_state(owner, LoaderRequest::default());
        self.loaders.remove(&owner);
        ran
    }

    pub fn loaders(&self) -> impl Iterator<Item = (&OwnerId, &LoaderRequest)> {
        self.loaders.iter()
    }

    /// Tiles on which `owner` currently holds a reference.
    pub fn referenced_tiles(&self, owner: OwnerId, repr: Representation) -> Vec<TileId> {
        self.registry
            .iter()
            .filter(|t| t.representation(repr).has_reference(owner))
            .map(|t| t.id())
            .collect()
    }

    /// Drop every reference of every owner immediately, bypassing the queue.
    /// With `forced` nothing is cached.
    pub fn unload_all(&mut self, forced: bool) {
        self.queue.clear();
        let caching = self.cache.caching_allowed(self.execution);
        let now = self.clock.now();
        for tile in self.registry.iter_mut() {
            for repr in [Representation::Regular, Representation::Impostor] {
                let state = tile.representation_mut(repr);
                let owners: Vec<OwnerId> = state.references().iter().copied().collect();
                for owner in owners {
                    state.remove_reference(owner, &mut self.host, caching, forced, now);
                }
                if forced {
                    state.evict(&mut self.host);
                }
            }
        }
        tracing::info!(forced, "unloaded all tiles");
    }

    // --- queue ---------------------------------------------------------------

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    /// Queue a single reference change directly.
    pub fn enqueue(
        &mut self,
        tile: TileId,
        kind: ActionKind,
        owner: OwnerId,
        forced: bool,
        frustum: Option<&FrustumCamera>,
    ) -> Option<EnqueueOutcome> {
        let descriptor = self.registry.get(tile)?;
        let anchor = frustum
            .map(|f| f.position)
            .or_else(|| self.loaders.get(&owner).map(LoaderRequest::anchor))
            .unwrap_or(self.loading_center);
        let mut entry = self.entry(descriptor, kind, owner, anchor, frustum);
        entry.forced = forced;
        Some(self.queue.enqueue(entry))
    }

    /// Execute the next batch of queued actions. Outside of play mode that
    /// is the whole queue. Returns how many actions were applied.
    pub fn process_queue(&mut self) -> usize {
        let now = self.clock.now();
        let granted = self
            .budget
            .grant(now, self.execution.is_live(), self.queue.len());
        let batch = self.queue.take_batch(granted);
        let mut applied = 0;
        for entry in batch {
            if self.execute(&entry, now) {
                applied += 1;
            }
        }
        applied
    }

    fn execute(&mut self, entry: &QueueEntry, now: Instant) -> bool {
        let caching = self.cache.caching_allowed(self.execution);
        let poll_at = now + self.config.load_poll_interval();
        let world_origin = self.world_origin;
        let Some(tile) = self.registry.get_mut(entry.tile) else {
            tracing::debug!(tile = %entry.tile, kind = ?entry.kind, "skipping action for removed tile");
            return false;
        };
        let repr = entry.kind.representation();
        if entry.kind.is_add() {
            let outcome = tile
                .representation_mut(repr)
                .add_reference(entry.owner, repr, &mut self.host);
            match outcome {
                AddOutcome::Failed(err) => {
                    tracing::warn!(tile = %tile.name, ?repr, %err, "failed to start loading tile");
                }
                AddOutcome::NoSource => {
                    tracing::debug!(tile = %tile.name, ?repr, "tile has no source for representation");
                }
                AddOutcome::LoadStarted => {
                    tracing::debug!(tile = %tile.name, ?repr, "loading tile");
                    if tile.large_world_fix {
                        tile.origin_offset = DVec3::new(-world_origin.x, 0.0, -world_origin.z);
                    }
                    if tile.representation(repr).state() == LoadState::Loading {
                        tile.next_update = Some(poll_at);
                    }
                }
                outcome => tracing::trace!(tile = %tile.name, ?repr, ?outcome, "reference added"),
            }
        } else {
            let outcome = tile.representation_mut(repr).remove_reference(
                entry.owner,
                &mut self.host,
                caching,
                entry.forced,
                now,
            );
            match outcome {
                RemoveOutcome::Cached => tracing::debug!(tile = %tile.name, ?repr, "caching tile"),
                RemoveOutcome::Unloaded => tracing::debug!(tile = %tile.name, ?repr, "unloading tile"),
                _ => {}
            }
        }
        true
    }

    /// Drop every pending action. With `force_recompute`, every known loader
    /// recomputes its state from scratch afterwards.
    pub fn clear_action_queue(&mut self, force_recompute: bool) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.budget.reset();
        tracing::debug!(dropped, force_recompute, "cleared action queue");
        if force_recompute {
            let loaders: Vec<(OwnerId, LoaderRequest)> = self
                .loaders
                .iter()
                .map(|(owner, request)| (*owner, request.clone()))
                .collect();
            for (owner, request) in loaders {
                self.update_terrain_load_state(owner, request);
            }
        }
    }

    // --- per-frame ---------------------------------------------------------

    /// Advance the streaming system by one host frame.
    pub fn tick(&mut self, dt: Duration) -> &StreamStats {
        let _span = tracing::info_span!("stream_tick").entered();
        let tick_start = Instant::now();
        let now = self.clock.now();

        self.expire_reload_suppression(now);
        let loads_completed = self.poll_loading(now);
        let actions_executed = self.process_queue();

        let mut evicted = self
            .cache
            .update_caching(&mut self.registry, &mut self.host, now, self.execution);
        evicted.extend(self.cache.evict_for_memory(&mut self.registry, &mut self.host));

        if let Some(tracker) = self.progress.as_mut() {
            tracker.tick(&self.registry, now);
        }

        let (regular_loaded, impostor_loaded) = self.registry.iter().fold((0, 0), |(r, i), t| {
            (
                r + usize::from(t.regular.state() == LoadState::Loaded),
                i + usize::from(t.impostor.state() == LoadState::Loaded),
            )
        });
        let tick_time = tick_start.elapsed();
        self.frame_timer.record(tick_time);
        self.stats = StreamStats {
            actions_executed,
            tiles_evicted: evicted.len(),
            loads_completed,
            regular_loaded,
            impostor_loaded,
            queue_len: self.queue.len(),
            tick_time,
        };
        tracing::trace!(
            frame = ?dt,
            executed = actions_executed,
            evicted = evicted.len(),
            completed = loads_completed,
            pending = self.queue.len(),
            "stream tick complete"
        );
        &self.stats
    }

    fn poll_loading(&mut self, now: Instant) -> usize {
        let interval = self.config.load_poll_interval();
        let mut completed = 0;
        for tile in self.registry.iter_mut() {
            if tile.next_update.is_some_and(|at| at > now) {
                continue;
            }
            let mut still_loading = false;
            for repr in [Representation::Regular, Representation::Impostor] {
                let state = tile.representation_mut(repr);
                if state.poll(&mut self.host) {
                    tracing::debug!(tile = %tile.name, ?repr, "tile loaded");
                    completed += 1;
                } else if tile.representation(repr).state() == LoadState::Loading {
                    still_loading = true;
                }
            }
            tile.next_update = still_loading.then(|| now + interval);
        }
        completed
    }

    // --- caching -----------------------------------------------------------

    pub fn caching_allowed(&self) -> bool {
        self.cache.caching_allowed(self.execution)
    }

    /// Evict cached tiles whose keep-alive elapsed. Returns how many were
    /// evicted.
    pub fn update_caching(&mut self) -> usize {
        let now = self.clock.now();
        self.cache
            .update_caching(&mut self.registry, &mut self.host, now, self.execution)
            .len()
    }

    pub fn cache_policy(&self) -> &CachePolicy {
        &self.cache
    }

    // --- progress ----------------------------------------------------------

    /// Begin tracking load progress. Returns false when the capability is
    /// not available.
    pub fn start_tracking_progress(&mut self) -> bool {
        let now = self.clock.now();
        match self.progress.as_mut() {
            Some(tracker) => {
                tracker.start(now);
                true
            }
            None => {
                tracing::warn!("progress tracking is not available");
                false
            }
        }
    }

    pub fn subscribe_progress(
        &mut self,
        listener: impl FnMut(&ProgressEvent) + 'static,
    ) -> Option<ListenerId> {
        self.progress.as_mut().map(|t| t.subscribe(listener))
    }

    pub fn unsubscribe_progress(&mut self, id: ListenerId) -> bool {
        self.progress.as_mut().is_some_and(|t| t.unsubscribe(id))
    }

    pub fn progress(&self) -> Option<&ProgressTracker> {
        self.progress.as_ref()
    }

    // --- origin shifting -----------------------------------------------------

    pub fn world_origin(&self) -> DVec3 {
        self.world_origin
    }

    /// Track an object that must stay put in world space across origin
    /// shifts. `position` is relative to the current origin.
    pub fn track_origin_member(&mut self, position: DVec3) -> OriginMemberId {
        let id = OriginMemberId(self.next_member);
        self.next_member += 1;
        self.origin_members.insert(id, position);
        id
    }

    pub fn untrack_origin_member(&mut self, id: OriginMemberId) -> Option<DVec3> {
        self.origin_members.remove(&id)
    }

    pub fn origin_member(&self, id: OriginMemberId) -> Option<DVec3> {
        self.origin_members.get(&id).copied()
    }

    /// Relocate the world origin on the XZ plane. Resident large-world-fix
    /// tiles and tracked members move by the negated delta; Y is never
    /// shifted. Returns the applied delta.
    pub fn shift_origin(&mut self, new_origin: DVec3) -> DVec3 {
        let delta = DVec3::new(
            new_origin.x - self.world_origin.x,
            0.0,
            new_origin.z - self.world_origin.z,
        );
        if delta == DVec3::ZERO {
            return delta;
        }
        self.world_origin += delta;
        for tile in self.registry.iter_mut() {
            if tile.large_world_fix && tile.is_resident() {
                tile.origin_offset -= delta;
            }
        }
        for position in self.origin_members.values_mut() {
            *position -= delta;
        }
        tracing::info!(?delta, origin = ?self.world_origin, "shifted world origin");
        delta
    }

    // --- accessors -----------------------------------------------------------

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Durations of recent ticks.
    pub fn frame_timer(&self) -> &FrameTimer {
        &self.frame_timer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::config::CacheMemoryPreset;
    use crate::host::{ADDRESSABLES_DEPENDENCY, ManualClock, MemoryHost, PROGRESS_TRACKING_DEPENDENCY};

    type TestContext = StreamingContext<MemoryHost, ManualClock>;

    const CENTER: DVec3 = DVec3::new(250.0, 0.0, 250.0);
    const DT: Duration = Duration::from_millis(16);

    fn layout() -> GridLayout {
        GridLayout::new(100.0, DVec3::ZERO)
    }

    /// Regular volume covering the 3x3 tiles around [`CENTER`], no impostors.
    fn config() -> StreamConfig {
        StreamConfig {
            regular_range: DVec3::splat(60.0),
            impostor_range: DVec3::ZERO,
            ..StreamConfig::default()
        }
    }

    fn context_with(config: StreamConfig, host: MemoryHost, large_world_fix: bool) -> (TestContext, ManualClock) {
        let clock = ManualClock::new();
        let mut ctx = StreamingContext::new(config, host, clock.clone()).with_layout(layout());
        for x in 0..5 {
            for z in 0..5 {
                let mut record = TileRecord::on_grid(
                    format!("terrain_{x}_{z}"),
                    &layout(),
                    GridCoord::new(x, z),
                    1.0,
                    format!("terrain_{x}_{z}"),
                )
                .with_impostor(format!("impostor_{x}_{z}"));
                record.large_world_fix = large_world_fix;
                ctx.register_tile(record).unwrap();
            }
        }
        (ctx, clock)
    }

    fn context(config: StreamConfig, host: MemoryHost) -> (TestContext, ManualClock) {
        context_with(config, host, false)
    }

    fn playing(ctx: &mut TestContext) {
        ctx.set_execution_context(ExecutionContext::Playing);
        ctx.initialize_runtime();
    }

    fn id_at(ctx: &TestContext, x: i32, z: i32) -> TileId {
        ctx.registry().find_by_coord(GridCoord::new(x, z)).unwrap()
    }

    #[test]
    fn editing_mode_drains_immediately_and_loads_once() {
        let (mut ctx, _) = context(config(), MemoryHost::immediate());
        assert!(ctx.set_loading_center(CENTER));
        assert!(ctx.queue().is_empty());

        let owner = ctx.origin_loader();
        assert_eq!(ctx.referenced_tiles(owner, Representation::Regular).len(), 9);
        assert!(ctx.referenced_tiles(owner, Representation::Impostor).is_empty());
        assert_eq!(ctx.host().resource_count(), 9);

        assert!(ctx.set_loading_center(CENTER));
        assert!(ctx.queue().is_empty());
        assert_eq!(ctx.host().load_count("terrain_2_2"), 1);
        assert_eq!(ctx.host().load_calls().len(), 9);
    }

    #[test]
    fn impostor_volume_is_independent() {
        let cfg = StreamConfig {
            impostor_range: DVec3::splat(160.0),
            ..config()
        };
        let (mut ctx, _) = context(cfg, MemoryHost::immediate());
        ctx.set_loading_center(CENTER);
        let owner = ctx.origin_loader();
        assert_eq!(ctx.referenced_tiles(owner, Representation::Regular).len(), 9);
        assert_eq!(ctx.referenced_tiles(owner, Representation::Impostor).len(), 25);
        assert_eq!(ctx.host().resource_count(), 34);
    }

    #[test]
    fn zero_range_releases_everything() {
        let cfg = StreamConfig {
            impostor_range: DVec3::splat(160.0),
            ..config()
        };
        let (mut ctx, _) = context(cfg, MemoryHost::immediate());
        ctx.set_loading_center(CENTER);
        ctx.set_loading_range(DVec3::ZERO, DVec3::ZERO);

        let owner = ctx.origin_loader();
        assert!(ctx.referenced_tiles(owner, Representation::Regular).is_empty());
        assert!(ctx.referenced_tiles(owner, Representation::Impostor).is_empty());
        assert_eq!(ctx.host().resource_count(), 0);
    }

    #[test]
    fn cached_tiles_expire_after_keep_alive() {
        let cfg = StreamConfig {
            cache_in_editor: true,
            cache_keep_alive_ms: 1000,
            ..config()
        };
        let (mut ctx, clock) = context(cfg, MemoryHost::immediate());
        ctx.set_loading_center(CENTER);
        ctx.set_loading_range(DVec3::ZERO, DVec3::ZERO);

        let tile = id_at(&ctx, 2, 2);
        assert_eq!(ctx.tile(tile).unwrap().regular.state(), LoadState::Cached);
        assert_eq!(ctx.host().resource_count(), 9);

        clock.advance(Duration::from_millis(999));
        assert_eq!(ctx.tick(DT).tiles_evicted, 0);
        assert_eq!(ctx.tile(tile).unwrap().regular.state(), LoadState::Cached);

        clock.advance(Duration::from_millis(1));
        assert_eq!(ctx.tick(DT).tiles_evicted, 9);
        assert_eq!(ctx.tile(tile).unwrap().regular.state(), LoadState::Unloaded);
        assert_eq!(ctx.host().resource_count(), 0);
    }

    #[test]
    fn cached_tiles_come_back_without_reloading() {
        let cfg = StreamConfig {
            cache_in_editor: true,
            ..config()
        };
        let (mut ctx, _) = context(cfg, MemoryHost::immediate());
        ctx.set_loading_center(CENTER);
        ctx.set_loading_range(DVec3::ZERO, DVec3::ZERO);
        ctx.set_loading_range(DVec3::splat(60.0), DVec3::ZERO);

        let tile = ctx.tile(id_at(&ctx, 2, 2)).unwrap();
        assert_eq!(tile.regular.state(), LoadState::Loaded);
        assert_eq!(tile.regular.load_count(), 1);
        assert_eq!(ctx.host().load_calls().len(), 9);
    }

    #[test]
    fn requesters_share_tiles() {
        let (mut ctx, _) = context(config(), MemoryHost::immediate());
        let a = OwnerId::new();
        let b = OwnerId::new();
        let request = LoaderRequest::around(CENTER, DVec3::splat(60.0), DVec3::ZERO);
        ctx.update_terrain_load_state(a, request.clone());
        ctx.update_terrain_load_state(b, request);

        let tile = id_at(&ctx, 2, 2);
        assert_eq!(ctx.tile(tile).unwrap().regular.reference_count(), 2);
        assert_eq!(ctx.host().load_count("terrain_2_2"), 1);

        ctx.remove_loader(a);
        let regular = &ctx.tile(tile).unwrap().regular;
        assert_eq!(regular.state(), LoadState::Loaded);
        assert!(regular.has_reference(b));
        assert!(!regular.has_reference(a));

        ctx.remove_loader(b);
        assert_eq!(ctx.tile(tile).unwrap().regular.state(), LoadState::Unloaded);
        assert_eq!(ctx.host().resource_count(), 0);
        assert_eq!(ctx.loaders().count(), 0);
    }

    #[test]
    fn live_batches_are_throttled() {
        let cfg = StreamConfig {
            terrain_loading_threshold_ms: 100,
            max_actions_per_batch: 1,
            ..config()
        };
        let (mut ctx, clock) = context(cfg, MemoryHost::immediate());
        playing(&mut ctx);
        assert!(ctx.set_loading_center(CENTER));
        assert_eq!(ctx.queue().len(), 9);

        assert_eq!(ctx.tick(DT).actions_executed, 1);
        assert_eq!(ctx.tick(DT).actions_executed, 0);
        clock.advance(Duration::from_millis(100));
        assert_eq!(ctx.tick(DT).actions_executed, 0);
        clock.advance(Duration::from_millis(1));
        assert_eq!(ctx.tick(DT).actions_executed, 1);

        assert_eq!(ctx.queue().len(), 7);
        assert_eq!(ctx.stats().queue_len, 7);
        let center = id_at(&ctx, 2, 2);
        assert_eq!(ctx.tile(center).unwrap().regular.state(), LoadState::Loaded);
    }

    #[test]
    fn live_mode_waits_for_runtime_initialization() {
        let (mut ctx, _) = context(config(), MemoryHost::immediate());
        ctx.set_execution_context(ExecutionContext::Playing);
        assert!(!ctx.set_loading_center(CENTER));
        assert!(ctx.queue().is_empty());

        ctx.initialize_runtime();
        ctx.clear_action_queue(true);
        assert_eq!(ctx.queue().len(), 9);

        ctx.clear_action_queue(false);
        assert!(ctx.queue().is_empty());
        assert_eq!(ctx.host().resource_count(), 0);
    }

    #[test]
    fn visible_tiles_are_queued_first() {
        let (mut ctx, _) = context(config(), MemoryHost::immediate());
        playing(&mut ctx);
        let camera = FrustumCamera::look_to(
            DVec3::new(250.0, 0.5, 250.0),
            DVec3::X,
            90.0_f64.to_radians(),
            1.0,
            0.1,
            1000.0,
        );
        let request =
            LoaderRequest::around(CENTER, DVec3::splat(60.0), DVec3::ZERO).with_frustum(camera);
        ctx.update_terrain_load_state(OwnerId::new(), request);

        let entries: Vec<&QueueEntry> = ctx.queue().iter().collect();
        assert_eq!(entries.len(), 9);
        let first_hidden = entries.iter().position(|e| !e.in_frustum).unwrap();
        assert!(entries[..first_hidden].iter().all(|e| e.in_frustum));
        assert!(entries[first_hidden..].iter().all(|e| !e.in_frustum));

        // Equal distance, opposite sides of the camera.
        let pos = |x, z| {
            let id = id_at(&ctx, x, z);
            entries.iter().position(|e| e.tile == id).unwrap()
        };
        assert!(!entries[pos(1, 2)].in_frustum);
        assert!(pos(3, 2) < pos(1, 2));
        assert_eq!(entries[0].tile, id_at(&ctx, 2, 2));
    }

    #[test]
    fn moving_away_before_execution_cancels_pending_loads() {
        let (mut ctx, _) = context(config(), MemoryHost::immediate());
        playing(&mut ctx);
        ctx.set_loading_center(CENTER);
        assert_eq!(ctx.queue().len(), 9);

        ctx.set_loading_center(DVec3::new(-10_000.0, 0.0, -10_000.0));
        assert!(ctx.queue().is_empty());
        ctx.tick(DT);
        assert!(ctx.host().load_calls().is_empty());
    }

    #[test]
    fn removed_tile_is_unloaded_and_dequeued() {
        let (mut ctx, _) = context(config(), MemoryHost::immediate());
        ctx.set_loading_center(CENTER);
        let tile = id_at(&ctx, 2, 2);
        let record = ctx.remove_tile(tile).unwrap();
        assert_eq!(record.name, "terrain_2_2");
        assert!(!ctx.host().is_loaded("terrain_2_2"));
        assert!(matches!(ctx.remove_tile(tile), Err(StreamError::UnknownTile(_))));

        let (mut ctx, _) = context(config(), MemoryHost::immediate());
        playing(&mut ctx);
        ctx.set_loading_center(CENTER);
        let tile = id_at(&ctx, 2, 2);
        ctx.remove_tile(tile).unwrap();
        assert_eq!(ctx.queue().len(), 8);
        assert!(ctx.queue().iter().all(|e| e.tile != tile));
    }

    #[test]
    fn host_failure_leaves_tile_unreferenced() {
        let mut host = MemoryHost::immediate();
        host.fail_locator("terrain_2_2");
        let (mut ctx, _) = context(config(), host);
        ctx.set_loading_center(CENTER);

        let owner = ctx.origin_loader();
        assert_eq!(ctx.referenced_tiles(owner, Representation::Regular).len(), 8);
        let regular = &ctx.tile(id_at(&ctx, 2, 2)).unwrap().regular;
        assert_eq!(regular.state(), LoadState::Unloaded);
        assert_eq!(regular.reference_count(), 0);

        // A failed tile is retried on the next recomputation.
        ctx.set_loading_center(CENTER);
        assert_eq!(ctx.host().load_count("terrain_2_2"), 2);
    }

    #[test]
    fn assembly_reload_suppresses_until_timeout() {
        let (mut ctx, clock) = context(config(), MemoryHost::immediate());
        ctx.begin_assembly_reload();
        assert!(!ctx.set_loading_center(CENTER));
        assert_eq!(ctx.host().resource_count(), 0);

        clock.advance(Duration::from_millis(10_000));
        assert!(ctx.set_loading_center(CENTER));
        assert!(!ctx.is_reload_suppressed());
        assert_eq!(ctx.host().resource_count(), 9);

        ctx.begin_assembly_reload();
        assert!(!ctx.set_loading_range(DVec3::ZERO, DVec3::ZERO));
        ctx.end_assembly_reload();
        assert!(ctx.set_loading_range(DVec3::ZERO, DVec3::ZERO));
        assert_eq!(ctx.host().resource_count(), 0);
    }

    #[test]
    fn disabled_loading_is_a_noop() {
        let cfg = StreamConfig {
            terrain_loading_enabled: false,
            ..config()
        };
        let (mut ctx, _) = context(cfg, MemoryHost::immediate());
        assert!(!ctx.set_loading_center(CENTER));
        ctx.set_terrain_loading_enabled(true);
        ctx.clear_action_queue(true);
        assert_eq!(ctx.host().resource_count(), 9);
    }

    #[test]
    fn grid_math_requires_grid_layout() {
        let (ctx, _) = context(config(), MemoryHost::immediate());
        assert_eq!(
            ctx.grid_coord_of(DVec3::new(250.0, 0.0, -1.0)).unwrap(),
            GridCoord::new(2, -1)
        );

        let cfg = StreamConfig {
            assume_grid_layout: false,
            ..config()
        };
        let (mut ctx, _) = context(cfg, MemoryHost::immediate());
        assert!(matches!(
            ctx.grid_coord_of(DVec3::ZERO),
            Err(StreamError::GridLayoutDisabled)
        ));
        // Irregular queries still resolve the same tiles.
        ctx.set_loading_center(CENTER);
        assert_eq!(ctx.host().resource_count(), 9);
    }

    #[test]
    fn neighbors_follow_grid_coordinates() {
        let (ctx, _) = context(config(), MemoryHost::immediate());
        let center = id_at(&ctx, 2, 2);
        assert_eq!(ctx.try_get_neighbor(center, Direction::North), Some(id_at(&ctx, 2, 3)));
        assert_eq!(ctx.try_get_neighbor(center, Direction::East), Some(id_at(&ctx, 3, 2)));
        assert_eq!(ctx.try_get_neighbor(id_at(&ctx, 0, 0), Direction::West), None);
    }

    #[test]
    fn origin_shift_moves_resident_tiles_and_members() {
        let (mut ctx, _) = context_with(config(), MemoryHost::immediate(), true);
        ctx.set_loading_center(CENTER);
        let member = ctx.track_origin_member(DVec3::new(10.0, 5.0, 10.0));

        let delta = ctx.shift_origin(DVec3::new(1000.0, 300.0, 0.0));
        assert_eq!(delta, DVec3::new(1000.0, 0.0, 0.0));
        assert_eq!(
            ctx.tile(id_at(&ctx, 2, 2)).unwrap().effective_position(),
            DVec3::new(-800.0, 0.0, 200.0)
        );
        assert_eq!(ctx.tile(id_at(&ctx, 0, 0)).unwrap().effective_position(), DVec3::ZERO);
        assert_eq!(ctx.origin_member(member), Some(DVec3::new(-990.0, 5.0, 10.0)));

        // Tiles loaded after the shift are placed relative to the new origin.
        ctx.set_loading_center(DVec3::new(50.0, 0.0, 50.0));
        assert_eq!(
            ctx.tile(id_at(&ctx, 0, 0)).unwrap().effective_position(),
            DVec3::new(-1000.0, 0.0, 0.0)
        );
    }

    #[test]
    fn progress_follows_deferred_loads() {
        let (mut ctx, _) = context(config(), MemoryHost::deferred());
        let events = Rc::new(RefCell::new(Vec::new()));
        {
            let events = events.clone();
            ctx.subscribe_progress(move |e| events.borrow_mut().push(e.clone()))
                .unwrap();
        }
        assert!(ctx.start_tracking_progress());
        ctx.set_loading_center(CENTER);
        ctx.tick(DT);
        ctx.host_mut().finish_loads();
        assert_eq!(ctx.tick(DT).loads_completed, 9);

        assert_eq!(
            *events.borrow(),
            vec![
                ProgressEvent::Started,
                ProgressEvent::Updated(0.0),
                ProgressEvent::Updated(1.0),
                ProgressEvent::Ended
            ]
        );
    }

    struct Without(&'static str);

    impl DependencyProbe for Without {
        fn is_available(&self, name: &str) -> bool {
            name != self.0
        }
    }

    #[test]
    fn missing_capabilities_degrade() {
        let mut ctx = StreamingContext::new(config(), MemoryHost::immediate(), ManualClock::new())
            .with_probe(&Without(PROGRESS_TRACKING_DEPENDENCY));
        assert!(!ctx.start_tracking_progress());
        assert!(ctx.subscribe_progress(|_| {}).is_none());

        let mut ctx = StreamingContext::new(config(), MemoryHost::immediate(), ManualClock::new())
            .with_probe(&Without(ADDRESSABLES_DEPENDENCY));
        let addressable = TileRecord::on_grid(
            "terrain_0_0",
            &layout(),
            GridCoord::new(0, 0),
            1.0,
            "addressable:terrain_0_0",
        );
        assert!(matches!(
            ctx.register_tile(addressable),
            Err(StreamError::CapabilityMissing(_))
        ));
        let plain = TileRecord::on_grid("terrain_0_0", &layout(), GridCoord::new(0, 0), 1.0, "terrain_0_0");
        assert!(ctx.register_tile(plain).is_ok());
    }

    #[test]
    fn memory_pressure_trims_cache_on_tick() {
        let cfg = StreamConfig {
            cache_in_editor: true,
            cache_memory_preset: CacheMemoryPreset::Custom,
            cache_memory_custom_bytes: 300,
            ..config()
        };
        let (mut ctx, _) = context(cfg, MemoryHost::immediate().with_bytes_per_resource(100));
        ctx.set_loading_center(CENTER);
        assert_eq!(ctx.tick(DT).tiles_evicted, 0);

        ctx.set_loading_range(DVec3::ZERO, DVec3::ZERO);
        assert_eq!(ctx.tick(DT).tiles_evicted, 6);
        assert_eq!(ctx.host().resident_memory_bytes(), Some(300));
    }

    #[test]
    fn unload_all_respects_forced() {
        let cfg = StreamConfig {
            cache_in_editor: true,
            ..config()
        };
        let (mut ctx, _) = context(cfg, MemoryHost::immediate());
        ctx.set_loading_center(CENTER);

        ctx.unload_all(false);
        assert_eq!(ctx.host().resource_count(), 9);
        assert_eq!(
            ctx.tile(id_at(&ctx, 2, 2)).unwrap().regular.state(),
            LoadState::Cached
        );

        ctx.unload_all(true);
        assert_eq!(ctx.host().resource_count(), 0);
    }
}
