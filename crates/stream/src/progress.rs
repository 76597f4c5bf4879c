//! Load progress tracking with stall detection.
//!
//! Progress is `loaded / referenced` over regular tiles plus impostor-only
//! tiles (tiles that no owner references as regular but some owner
//! references as impostor).

use std::fmt;
use std::time::{Duration, Instant};

use terrastream_common::TileId;

use crate::registry::TileRegistry;
use crate::tile::LoadState;

/// Signals raised while progress is being tracked.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started,
    Updated(f32),
    Ended,
    /// Progress stalled; carries the referenced tiles that are not loaded.
    TimedOut(Vec<TileId>),
}

/// Point-in-time load counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    pub loaded: usize,
    pub referenced: usize,
    pub missing: Vec<TileId>,
}

impl ProgressSnapshot {
    pub fn measure(registry: &TileRegistry) -> Self {
        let mut snap = Self::default();
        for tile in registry.iter() {
            let counted = if tile.regular.is_referenced() {
                Some(tile.regular.state())
            } else if tile.impostor.is_referenced() {
                Some(tile.impostor.state())
            } else {
                None
            };
            let Some(state) = counted else {
                continue;
            };
            snap.referenced += 1;
            if state == LoadState::Loaded {
                snap.loaded += 1;
            } else {
                snap.missing.push(tile.id());
            }
        }
        snap
    }

    /// Fraction loaded, or `None` when nothing is referenced.
    pub fn fraction(&self) -> Option<f32> {
        (self.referenced > 0).then(|| self.loaded as f32 / self.referenced as f32)
    }
}

/// Handle returned by [`ProgressTracker::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&ProgressEvent)>;

pub struct ProgressTracker {
    timeout: Duration,
    active: bool,
    last_value: Option<f32>,
    last_change: Option<Instant>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("timeout", &self.timeout)
            .field("active", &self.active)
            .field("last_value", &self.last_value)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ProgressTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            active: false,
            last_value: None,
            last_change: None,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&ProgressEvent) + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false if the listener was not subscribed.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        self.listeners.len() != before
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn last_value(&self) -> Option<f32> {
        self.last_value
    }

    /// Reset the baseline and emit `Started`.
    pub fn start(&mut self, now: Instant) -> Vec<ProgressEvent> {
        self.active = true;
        self.last_value = None;
        self.last_change = Some(now);
        tracing::debug!("load progress tracking started");
        self.emit(vec![ProgressEvent::Started])
    }

    /// Advance tracking by one tick. Returns the events raised.
    pub fn tick(&mut self, registry: &TileRegistry, now: Instant) -> Vec<ProgressEvent> {
        if !self.active {
            return Vec::new();
        }
        let snap = ProgressSnapshot::measure(registry);
        let Some(value) = snap.fraction() else {
            self.finish();
            return self.emit(vec![ProgressEvent::Updated(1.0), ProgressEvent::Ended]);
        };

        let mut events = vec![ProgressEvent::Updated(value)];
        if value >= 1.0 {
            self.finish();
            events.push(ProgressEvent::Ended);
        } else if self.last_value != Some(value) {
            self.last_change = Some(now);
        } else if self
            .last_change
            .is_some_and(|since| now.duration_since(since) > self.timeout)
        {
            tracing::warn!(
                loaded = snap.loaded,
                referenced = snap.referenced,
                missing = snap.missing.len(),
                "terrain loading progress timed out"
            );
            self.finish();
            events.push(ProgressEvent::TimedOut(snap.missing));
            events.push(ProgressEvent::Ended);
        }
        self.last_value = Some(value);
        tracing::trace!(value, "load progress");
        self.emit(events)
    }

    fn finish(&mut self) {
        self.active = false;
        self.last_change = None;
    }

    fn emit(&mut self, events: Vec<ProgressEvent>) -> Vec<ProgressEvent> {
        for event in &events {
            for (_, listener) in self.listeners.iter_mut() {
                listener(event);
            }
        }
        events
    }
}
