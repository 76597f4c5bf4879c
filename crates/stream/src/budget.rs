use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Throttle for executing queued actions.
///
/// Outside of play mode every pending action runs at once. While playing, at
/// most `max_per_batch` actions run, and only once `threshold` has passed
/// since the previous batch.
#[derive(Debug, Clone)]
pub struct ActionBudget {
    threshold: Duration,
    max_per_batch: usize,
    last_batch: Option<Instant>,
}

impl ActionBudget {
    pub fn new(threshold: Duration, max_per_batch: usize) -> Self {
        Self {
            threshold,
            max_per_batch: max_per_batch.max(1),
            last_batch: None,
        }
    }

    /// How many of `pending` actions may run now. Stamps the batch time when
    /// a live batch is granted.
    pub fn grant(&mut self, now: Instant, live: bool, pending: usize) -> usize {
        if pending == 0 {
            return 0;
        }
        if !live {
            return pending;
        }
        if let Some(last) = self.last_batch {
            if last + self.threshold >= now {
                return 0;
            }
        }
        self.last_batch = Some(now);
        self.max_per_batch.min(pending)
    }

    pub fn reset(&mut self) {
        self.last_batch = None;
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

/// Per-tick streaming statistics for instrumentation.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub actions_executed: usize,
    pub tiles_evicted: usize,
    pub loads_completed: usize,
    pub regular_loaded: usize,
    pub impostor_loaded: usize,
    pub queue_len: usize,
    pub tick_time: Duration,
}

/// Rolling window over the most recent tick durations.
#[derive(Debug)]
pub struct FrameTimer {
    window: VecDeque<Duration>,
    capacity: usize,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, sample: Duration) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(sample);
    }

    pub fn latest(&self) -> Option<Duration> {
        self.window.back().copied()
    }

    pub fn average(&self) -> Duration {
        match self.window.len() {
            0 => Duration::ZERO,
            n => self.window.iter().sum::<Duration>() / n as u32,
        }
    }

    pub fn max(&self) -> Duration {
        self.window.iter().copied().max().unwrap_or_default()
    }

    pub fn min(&self) -> Duration {
        self.window.iter().copied().min().unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.window.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn editing_grants_everything() {
        let mut budget = ActionBudget::new(Duration::from_millis(100), 1);
        let now = Instant::now();
        assert_eq!(budget.grant(now, false, 17), 17);
        assert_eq!(budget.grant(now, false, 3), 3);
    }

    #[test]
    fn live_batches_wait_for_threshold() {
        let mut budget = ActionBudget::new(Duration::from_millis(100), 2);
        let t0 = Instant::now();
        assert_eq!(budget.grant(t0, true, 5), 2);
        assert_eq!(budget.grant(t0 + Duration::from_millis(50), true, 3), 0);
        // Exactly at the threshold is still too early.
        assert_eq!(budget.grant(t0 + Duration::from_millis(100), true, 3), 0);
        assert_eq!(budget.grant(t0 + Duration::from_millis(101), true, 3), 2);
    }

    #[test]
    fn idle_ticks_do_not_consume_the_budget() {
        let mut budget = ActionBudget::new(Duration::from_millis(100), 1);
        let t0 = Instant::now();
        assert_eq!(budget.grant(t0, true, 0), 0);
        assert_eq!(budget.grant(t0, true, 1), 1);
    }

    #[test]
    fn frame_timer_summarizes_window() {
        let mut timer = FrameTimer::new(4);
        assert_eq!(timer.average(), Duration::ZERO);
        assert_eq!(timer.latest(), None);
        for ms in [4, 12, 8] {
            timer.record(Duration::from_millis(ms));
        }
        assert_eq!(timer.count(), 3);
        assert_eq!(timer.average(), Duration::from_millis(8));
        assert_eq!(timer.min(), Duration::from_millis(4));
        assert_eq!(timer.max(), Duration::from_millis(12));
        assert_eq!(timer.latest(), Some(Duration::from_millis(8)));
    }

    #[test]
    fn frame_timer_drops_oldest_sample() {
        let mut timer = FrameTimer::new(2);
        for ms in [40, 2, 6] {
            timer.record(Duration::from_millis(ms));
        }
        assert_eq!(timer.count(), 2);
        assert_eq!(timer.max(), Duration::from_millis(6));
        assert_eq!(timer.average(), Duration::from_millis(4));
    }
}
