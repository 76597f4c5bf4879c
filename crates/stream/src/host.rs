//! Seams to the host environment: scene loading, time, dependency detection.
//!
//! The streaming core never blocks on the host. Loads are started with
//! [`SceneHost::begin_load`] and their completion is observed by polling
//! [`SceneHost::is_resident`] from the context's tick.

use std::cell::Cell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::HostError;
use crate::tile::Representation;

/// Opaque handle the host hands out for a started load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadHandle(pub u64);

/// Host scene/resource loading API.
pub trait SceneHost {
    /// Start loading a resource. The load may complete synchronously.
    fn begin_load(
        &mut self,
        locator: &str,
        representation: Representation,
    ) -> Result<LoadHandle, HostError>;

    /// Start unloading a previously loaded (or loading) resource.
    fn begin_unload(&mut self, handle: LoadHandle);

    /// Whether the resource behind `handle` has finished loading.
    fn is_resident(&mut self, handle: LoadHandle) -> bool;

    /// Memory currently used by resident resources, if the host can tell.
    fn resident_memory_bytes(&self) -> Option<u64> {
        None
    }
}

/// Wall-clock source. All timeouts in the core are wall-clock based.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

/// Answers whether an optional dependency is present in the host.
pub trait DependencyProbe {
    fn is_available(&self, name: &str) -> bool;
}

/// Probe that reports every dependency as present.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllAvailable;

impl DependencyProbe for AllAvailable {
    fn is_available(&self, _name: &str) -> bool {
        true
    }
}

/// Name probed for progress tracking support.
pub const PROGRESS_TRACKING_DEPENDENCY: &str = "progress-tracking";
/// Name probed for addressable resource loading.
pub const ADDRESSABLES_DEPENDENCY: &str = "addressables";
/// Locator scheme that requires addressable loading.
pub const ADDRESSABLE_SCHEME: &str = "addressable:";

/// Optional feature sets, detected once when the context is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub progress_tracking: bool,
    pub addressables: bool,
}

impl Capabilities {
    pub fn detect(probe: &dyn DependencyProbe) -> Self {
        let caps = Self {
            progress_tracking: probe.is_available(PROGRESS_TRACKING_DEPENDENCY),
            addressables: probe.is_available(ADDRESSABLES_DEPENDENCY),
        };
        tracing::debug!(?caps, "detected streaming capabilities");
        caps
    }

    pub fn all() -> Self {
        Self {
            progress_tracking: true,
            addressables: true,
        }
    }

    /// Whether `locator` can be loaded with these capabilities.
    pub fn supports_locator(&self, locator: &str) -> bool {
        self.addressables || !locator.starts_with(ADDRESSABLE_SCHEME)
    }
}

/// How an in-memory host completes loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Resident as soon as `begin_load` returns.
    Immediate,
    /// Resident only after [`MemoryHost::finish_loads`].
    Deferred,
}

#[derive(Debug, Clone)]
struct Resource {
    locator: String,
    resident: bool,
}

/// In-memory scene host used by the simulator and by tests. Every resident
/// resource accounts for a fixed number of bytes.
#[derive(Debug)]
pub struct MemoryHost {
    completion: Completion,
    bytes_per_resource: u64,
    next_handle: u64,
    resources: BTreeMap<LoadHandle, Resource>,
    failing: HashSet<String>,
    load_calls: Vec<String>,
    unload_calls: usize,
}

impl MemoryHost {
    pub fn new(completion: Completion) -> Self {
        Self {
            completion,
            bytes_per_resource: 64 * 1024 * 1024,
            next_handle: 1,
            resources: BTreeMap::new(),
            failing: HashSet::new(),
            load_calls: Vec::new(),
            unload_calls: 0,
        }
    }

    pub fn immediate() -> Self {
        Self::new(Completion::Immediate)
    }

    pub fn deferred() -> Self {
        Self::new(Completion::Deferred)
    }

    pub fn with_bytes_per_resource(mut self, bytes: u64) -> Self {
        self.bytes_per_resource = bytes;
        self
    }

    /// Make every future load of `locator` fail.
    pub fn fail_locator(&mut self, locator: impl Into<String>) {
        self.failing.insert(locator.into());
    }

    /// Complete every pending load. Returns how many completed.
    pub fn finish_loads(&mut self) -> usize {
        let mut finished = 0;
        for res in self.resources.values_mut().filter(|r| !r.resident) {
            res.resident = true;
            finished += 1;
        }
        finished
    }

    /// Complete pending loads whose locator satisfies `pred`.
    pub fn finish_loads_where(&mut self, pred: impl Fn(&str) -> bool) -> usize {
        let mut finished = 0;
        for res in self
            .resources
            .values_mut()
            .filter(|r| !r.resident && pred(&r.locator))
        {
            res.resident = true;
            finished += 1;
        }
        finished
    }

    /// Every locator passed to `begin_load`, in call order.
    pub fn load_calls(&self) -> &[String] {
        &self.load_calls
    }

    pub fn load_count(&self, locator: &str) -> usize {
        self.load_calls.iter().filter(|l| *l == locator).count()
    }

    pub fn unload_count(&self) -> usize {
        self.unload_calls
    }

    pub fn is_loaded(&self, locator: &str) -> bool {
        self.resources.values().any(|r| r.locator == locator)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}

impl SceneHost for MemoryHost {
    fn begin_load(
        &mut self,
        locator: &str,
        _representation: Representation,
    ) -> Result<LoadHandle, HostError> {
        self.load_calls.push(locator.to_string());
        if self.failing.contains(locator) {
            return Err(HostError::NotFound(locator.to_string()));
        }
        let handle = LoadHandle(self.next_handle);
        self.next_handle += 1;
        self.resources.insert(
            handle,
            Resource {
                locator: locator.to_string(),
                resident: self.completion == Completion::Immediate,
            },
        );
        Ok(handle)
    }

    fn begin_unload(&mut self, handle: LoadHandle) {
        self.unload_calls += 1;
        self.resources.remove(&handle);
    }

    fn is_resident(&mut self, handle: LoadHandle) -> bool {
        self.resources.get(&handle).is_some_and(|r| r.resident)
    }

    fn resident_memory_bytes(&self) -> Option<u64> {
        let resident = self.resources.values().filter(|r| r.resident).count() as u64;
        Some(resident * self.bytes_per_resource)
    }
}
