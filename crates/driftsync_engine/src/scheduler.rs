//! Adaptive sync interval.
//!
//! The scheduler is a pure state machine: every transition takes the
//! current instant explicitly and returns what changed, so the coordinator
//! owns the actual timer and tests can drive time by hand.

use crate::config::SchedulerConfig;
use std::time::{Duration, Instant};
use tracing::debug;

/// Mutable scheduler state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    /// Period of the recurring timer.
    pub current_interval: Duration,
    /// Failed sync attempts since the last success.
    pub consecutive_failures: u32,
    /// Most recent accepted activity event.
    pub last_activity_at: Option<Instant>,
}

/// Inputs a tick is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickInputs {
    /// Network reachable.
    pub online: bool,
    /// Remote credentials present.
    pub authenticated: bool,
    /// Unsynced local changes exist.
    pub pending_changes: bool,
}

impl TickInputs {
    /// True if a tick with these inputs should start a sync.
    pub fn should_sync(&self) -> bool {
        self.online && self.authenticated && self.pending_changes
    }
}

/// Owns the interval of the single recurring sync timer.
#[derive(Debug)]
pub struct AdaptiveScheduler {
    config: SchedulerConfig,
    state: SchedulerState,
    next_tick: Instant,
}

impl AdaptiveScheduler {
    /// Creates a scheduler whose first tick is one minimum interval away.
    pub fn new(config: SchedulerConfig, now: Instant) -> Self {
        let interval = config.min_interval.clamp(config.floor(), config.max_interval);
        Self {
            state: SchedulerState {
                current_interval: interval,
                consecutive_failures: 0,
                last_activity_at: None,
            },
            next_tick: now + interval,
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Returns the current state.
    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Current timer period.
    pub fn interval(&self) -> Duration {
        self.state.current_interval
    }

    /// Instant the timer fires next.
    pub fn next_tick(&self) -> Instant {
        self.next_tick
    }

    /// Pulls the next tick forward to `at` if it is earlier.
    pub fn tick_at(&mut self, at: Instant) {
        if at < self.next_tick {
            self.next_tick = at;
        }
    }

    /// Consumes a timer firing and re-arms for one period later.
    pub fn on_tick(&mut self, now: Instant) {
        self.next_tick = now + self.state.current_interval;
    }

    /// Backoff interval for a number of consecutive failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.min(16));
        self.config
            .min_interval
            .saturating_mul(factor)
            .min(self.config.max_interval)
    }

    /// The interval the scheduler wants, ignoring hysteresis.
    pub fn target_interval(&self, pending_changes: bool, now: Instant) -> Duration {
        let target = if self.state.consecutive_failures > 0 {
            self.backoff(self.state.consecutive_failures)
        } else if pending_changes && self.recently_active(now) {
            self.config.active_interval
        } else if pending_changes {
            self.config.min_interval
        } else {
            self.backoff(0)
        };
        target.clamp(self.config.floor(), self.config.max_interval)
    }

    /// Records a user-activity event.
    ///
    /// Events closer together than the rate limit are dropped. Returns true
    /// if the timer was re-armed.
    pub fn record_activity(&mut self, pending_changes: bool, now: Instant) -> bool {
        if let Some(last) = self.state.last_activity_at {
            if now.saturating_duration_since(last) < self.config.activity_rate_limit {
                return false;
            }
        }
        self.state.last_activity_at = Some(now);
        self.recompute(pending_changes, now)
    }

    /// Records a successful sync. Returns true if the timer was re-armed.
    pub fn record_success(&mut self, pending_changes: bool, now: Instant) -> bool {
        self.state.consecutive_failures = 0;
        self.recompute(pending_changes, now)
    }

    /// Records a failed sync. Returns true if the timer was re-armed.
    pub fn record_failure(&mut self, pending_changes: bool, now: Instant) -> bool {
        self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        self.recompute(pending_changes, now)
    }

    /// Re-evaluates the interval, re-arming the timer only when the target
    /// moved by more than the hysteresis band.
    pub fn recompute(&mut self, pending_changes: bool, now: Instant) -> bool {
        let target = self.target_interval(pending_changes, now);
        let current = self.state.current_interval;
        let delta = if target > current {
            target - current
        } else {
            current - target
        };
        if delta <= self.config.hysteresis {
            return false;
        }

        debug!(
            from_secs = current.as_secs(),
            to_secs = target.as_secs(),
            failures = self.state.consecutive_failures,
            "sync interval changed"
        );
        self.state.current_interval = target;
        self.next_tick = now + target;
        true
    }

    fn recently_active(&self, now: Instant) -> bool {
        self.state
            .last_activity_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.config.activity_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MIN: Duration = Duration::from_secs(120);
    const ACTIVE: Duration = Duration::from_secs(60);
    const MAX: Duration = Duration::from_secs(600);

    fn scheduler() -> (AdaptiveScheduler, Instant) {
        let now = Instant::now();
        (AdaptiveScheduler::new(SchedulerConfig::default(), now), now)
    }

    #[test]
    fn starts_at_min_interval() {
        let (scheduler, now) = scheduler();
        assert_eq!(scheduler.interval(), MIN);
        assert_eq!(scheduler.next_tick(), now + MIN);
        assert_eq!(scheduler.state().consecutive_failures, 0);
    }

    #[test]
    fn tick_requires_all_inputs() {
        let all = TickInputs {
            online: true,
            authenticated: true,
            pending_changes: true,
        };
        assert!(all.should_sync());
        assert!(!TickInputs { online: false, ..all }.should_sync());
        assert!(!TickInputs { authenticated: false, ..all }.should_sync());
        assert!(!TickInputs { pending_changes: false, ..all }.should_sync());
    }

    #[test]
    fn failures_back_off_exponentially() {
        let (mut scheduler, now) = scheduler();

        assert!(scheduler.record_failure(true, now));
        assert_eq!(scheduler.interval(), MIN * 2);
        assert!(scheduler.record_failure(true, now));
        assert_eq!(scheduler.interval(), MIN * 4);
        assert!(scheduler.record_failure(true, now));
        assert_eq!(scheduler.interval(), MAX);
        assert!(!scheduler.record_failure(true, now));
        assert_eq!(scheduler.interval(), MAX);
        assert_eq!(scheduler.state().consecutive_failures, 4);
    }

    #[test]
    fn success_resets_backoff() {
        let (mut scheduler, now) = scheduler();
        scheduler.record_failure(true, now);
        scheduler.record_failure(true, now);

        assert!(scheduler.record_success(false, now));
        assert_eq!(scheduler.state().consecutive_failures, 0);
        assert_eq!(scheduler.interval(), MIN);
        assert_eq!(scheduler.next_tick(), now + MIN);
    }

    #[test]
    fn activity_with_pending_shortens_interval() {
        let (mut scheduler, now) = scheduler();
        assert!(scheduler.record_activity(true, now));
        assert_eq!(scheduler.interval(), ACTIVE);

        // Five minutes later without activity the idle interval applies.
        let later = now + Duration::from_secs(301);
        assert!(scheduler.recompute(true, later));
        assert_eq!(scheduler.interval(), MIN);
    }

    #[test]
    fn activity_without_pending_keeps_interval() {
        let (mut scheduler, now) = scheduler();
        assert!(!scheduler.record_activity(false, now));
        assert_eq!(scheduler.interval(), MIN);
        assert_eq!(scheduler.state().last_activity_at, Some(now));
    }

    #[test]
    fn activity_is_rate_limited() {
        let (mut scheduler, now) = scheduler();
        scheduler.record_activity(false, now);
        scheduler.record_activity(false, now + Duration::from_secs(2));
        assert_eq!(scheduler.state().last_activity_at, Some(now));

        scheduler.record_activity(false, now + Duration::from_secs(5));
        assert_eq!(
            scheduler.state().last_activity_at,
            Some(now + Duration::from_secs(5))
        );
    }

    #[test]
    fn small_changes_fall_inside_hysteresis() {
        let config = SchedulerConfig::default().with_active_interval(Duration::from_secs(100));
        let now = Instant::now();
        let mut scheduler = AdaptiveScheduler::new(config, now);

        assert!(!scheduler.record_activity(true, now));
        assert_eq!(scheduler.interval(), MIN);
        assert_eq!(scheduler.next_tick(), now + MIN);
    }

    #[test]
    fn tick_at_only_moves_earlier() {
        let (mut scheduler, now) = scheduler();
        scheduler.tick_at(now + MAX);
        assert_eq!(scheduler.next_tick(), now + MIN);
        scheduler.tick_at(now);
        assert_eq!(scheduler.next_tick(), now);
        scheduler.on_tick(now);
        assert_eq!(scheduler.next_tick(), now + MIN);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn interval_stays_in_bounds(events in proptest::collection::vec((0u8..4, any::<bool>(), 0u64..900), 1..40)) {
            let (mut scheduler, start) = scheduler();
            let mut now = start;
            for (kind, pending, advance) in events {
                now += Duration::from_secs(advance);
                match kind {
                    0 => { scheduler.record_failure(pending, now); }
                    1 => { scheduler.record_success(pending, now); }
                    2 => { scheduler.record_activity(pending, now); }
                    _ => { scheduler.recompute(pending, now); }
                }
                let interval = scheduler.interval();
                prop_assert!(interval >= ACTIVE);
                prop_assert!(interval <= MAX);
            }
        }

        #[test]
        fn backoff_is_monotonic(failures in 0u32..40) {
            let (scheduler, _) = scheduler();
            prop_assert!(scheduler.backoff(failures) <= scheduler.backoff(failures + 1));
            prop_assert!(scheduler.backoff(failures) <= MAX);
        }
    }
}
