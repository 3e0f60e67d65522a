//! Backoff Scheduler
//!
//! Computes growing retry delays per named action, capped at a maximum.
//! Actions (e.g. `"handshake"`, `"websocket"`, `"reauth"`) are tracked
//! independently so a storming handshake does not inflate the delay of
//! an unrelated re-auth retry.
//!
//! The first call for an action records the attempt and returns zero.
//! While follow-up calls land inside the hot window (five times the
//! maximum backoff), the delay is `min(2 x elapsed + floor, max)`, which
//! doubles in effect as elapsed time accumulates between attempts; the
//! recorded timestamp is only refreshed once the cap is reached, so
//! growth is monotone up to the cap. A quiet period longer than the hot
//! window resets the action to zero. Nothing persists across restarts.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Hot-window width as a multiple of the maximum backoff.
const HOT_WINDOW_FACTOR: u32 = 5;

/// Configuration for backoff behavior.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Maximum delay returned for any action.
    pub max_backoff: Duration,
    /// Fixed floor added to every non-zero delay.
    pub jitter_floor: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_backoff: Duration::from_secs(20),
            jitter_floor: Duration::from_millis(500),
        }
    }
}

impl BackoffConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(max_backoff: Duration, jitter_floor: Duration) -> Self {
        Self {
            max_backoff,
            jitter_floor,
        }
    }

    /// Width of the hot window.
    #[must_use]
    pub fn hot_window(&self) -> Duration {
        self.max_backoff * HOT_WINDOW_FACTOR
    }
}

/// Per-action retry delay scheduler.
#[derive(Debug, Default)]
pub struct BackoffScheduler {
    config: BackoffConfig,
    last_attempt: Mutex<HashMap<String, Instant>>,
}

impl BackoffScheduler {
    /// Create a scheduler with the given configuration.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            last_attempt: Mutex::new(HashMap::new()),
        }
    }

    /// Delay to wait before retrying `action` now.
    #[must_use]
    pub fn delay_for(&self, action: &str) -> Duration {
        self.delay_for_at(action, Instant::now())
    }

    /// Delay computation against an explicit clock, for deterministic
    /// tests.
    #[must_use]
    pub fn delay_for_at(&self, action: &str, now: Instant) -> Duration {
        let mut attempts = self.last_attempt.lock();

        let Some(&last) = attempts.get(action) else {
            attempts.insert(action.to_string(), now);
            return Duration::ZERO;
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed >= self.config.hot_window() {
            // Long quiet period: the action has healed, start over.
            attempts.insert(action.to_string(), now);
            return Duration::ZERO;
        }

        let delay = (elapsed * 2 + self.config.jitter_floor).min(self.config.max_backoff);
        if delay >= self.config.max_backoff {
            attempts.insert(action.to_string(), now);
        }
        delay
    }

    /// Forget an action's record so its next delay is zero.
    ///
    /// The transport clears `"handshake"` on every restart so a fresh
    /// socket does not inherit stale backoff accounting.
    pub fn clear(&self, action: &str) {
        self.last_attempt.lock().remove(action);
    }

    /// Whether an action currently has a record.
    #[must_use]
    pub fn is_tracking(&self, action: &str) -> bool {
        self.last_attempt.lock().contains_key(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config() -> BackoffConfig {
        BackoffConfig::new(Duration::from_secs(20), Duration::from_millis(500))
    }

    #[test]
    fn first_call_returns_zero() {
        let scheduler = BackoffScheduler::new(config());
        assert_eq!(scheduler.delay_for("handshake"), Duration::ZERO);
        assert!(scheduler.is_tracking("handshake"));
    }

    #[test]
    fn delay_grows_with_elapsed_time() {
        let scheduler = BackoffScheduler::new(config());
        let start = Instant::now();

        assert_eq!(scheduler.delay_for_at("a", start), Duration::ZERO);

        let d1 = scheduler.delay_for_at("a", start + Duration::from_millis(100));
        assert_eq!(d1, Duration::from_millis(700)); // 2*100 + 500

        let d2 = scheduler.delay_for_at("a", start + Duration::from_millis(800));
        assert_eq!(d2, Duration::from_millis(2100)); // 2*800 + 500
    }

    #[test]
    fn delay_caps_at_max() {
        let scheduler = BackoffScheduler::new(config());
        let start = Instant::now();

        let _ = scheduler.delay_for_at("a", start);
        let d = scheduler.delay_for_at("a", start + Duration::from_secs(15));
        assert_eq!(d, Duration::from_secs(20));
    }

    #[test]
    fn cap_refreshes_recorded_timestamp() {
        let scheduler = BackoffScheduler::new(config());
        let start = Instant::now();

        let _ = scheduler.delay_for_at("a", start);
        // Hits the cap, refreshing the record to start + 30s.
        let _ = scheduler.delay_for_at("a", start + Duration::from_secs(30));

        // Next attempt is measured from the refreshed timestamp, not the
        // original one (which would be outside the hot window).
        let d = scheduler.delay_for_at("a", start + Duration::from_secs(31));
        assert_eq!(d, Duration::from_millis(2500)); // 2*1000 + 500
    }

    #[test]
    fn quiet_period_resets_action() {
        let scheduler = BackoffScheduler::new(config());
        let start = Instant::now();

        let _ = scheduler.delay_for_at("a", start);
        // 5 * 20s hot window; 101s later the action has healed.
        let d = scheduler.delay_for_at("a", start + Duration::from_secs(101));
        assert_eq!(d, Duration::ZERO);
    }

    #[test]
    fn actions_are_independent() {
        let scheduler = BackoffScheduler::new(config());
        let start = Instant::now();

        let _ = scheduler.delay_for_at("handshake", start);
        let d = scheduler.delay_for_at("handshake", start + Duration::from_millis(200));
        assert!(d > Duration::ZERO);

        // A different action starts fresh.
        assert_eq!(
            scheduler.delay_for_at("websocket", start + Duration::from_millis(200)),
            Duration::ZERO
        );
    }

    #[test]
    fn clear_forgets_the_action() {
        let scheduler = BackoffScheduler::new(config());
        let start = Instant::now();

        let _ = scheduler.delay_for_at("handshake", start);
        scheduler.clear("handshake");
        assert!(!scheduler.is_tracking("handshake"));
        assert_eq!(
            scheduler.delay_for_at("handshake", start + Duration::from_millis(100)),
            Duration::ZERO
        );
    }

    proptest! {
        /// Within the hot window, delays never shrink before the cap is
        /// reached: elapsed time since the recorded attempt only grows,
        /// and the delay is monotone in it.
        #[test]
        fn monotone_up_to_the_cap(offsets in proptest::collection::vec(1u64..=4000, 1..20)) {
            let scheduler = BackoffScheduler::new(config());
            let start = Instant::now();
            let _ = scheduler.delay_for_at("a", start);

            let mut at = start;
            let mut previous = Duration::ZERO;
            for offset in offsets {
                at += Duration::from_millis(offset);
                let delay = scheduler.delay_for_at("a", at);
                prop_assert!(delay >= previous);
                if delay >= Duration::from_secs(20) {
                    // Cap reached; the record refreshes and the series
                    // restarts, so stop checking monotonicity here.
                    break;
                }
                previous = delay;
            }
        }
    }
}
