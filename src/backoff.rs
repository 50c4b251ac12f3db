//! `BackoffSchedule` (§4.3, C3): startup fixed-window delays, post-window
//! exponential-with-jitter delays, and per-replica cooldowns sharing the same
//! exponential-with-jitter shape. The jitter source is injected (a `rand::Rng`
//! passed in at the call site) rather than read from a process global, per
//! Design Note "replacement for global/static state". This is what makes
//! `refresh_engine` tests deterministic under a seeded RNG.

use rand::Rng;
use std::time::Duration;

/// Staircase of fixed delays during the startup grace period, then "leave the
/// window" and switch to exponential-with-jitter. Mirrors the shape of the
/// corpus's watch-restart backoff in `k8s/cache/watch_manager.rs`
/// (`INITIAL_BACKOFF_SECONDS`/`MAX_BACKOFF_SECONDS`) but as a pure, injectable
/// schedule rather than mutable loop-local state.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    pub startup_grace_period: Duration,
    pub startup_steps: Vec<Duration>,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub jitter_range: std::ops::Range<f64>,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            startup_grace_period: Duration::from_secs(30),
            startup_steps: vec![
                Duration::from_millis(500),
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
            min_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(10 * 60),
            jitter_range: 0.8..1.0,
        }
    }
}

/// Result of consulting the startup schedule for elapsed time `t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupDelay {
    Fixed(Duration),
    PostWindow,
}

impl BackoffSchedule {
    /// Startup fixed-window delay for elapsed time `t` since the first
    /// attempt, or `PostWindow` once `t` has left the grace period.
    #[must_use]
    pub fn startup_delay(&self, elapsed: Duration, attempt: u32) -> StartupDelay {
        if elapsed >= self.startup_grace_period {
            return StartupDelay::PostWindow;
        }
        let idx = (attempt as usize).min(self.startup_steps.len().saturating_sub(1));
        self.startup_steps
            .get(idx)
            .copied()
            .map_or(StartupDelay::PostWindow, StartupDelay::Fixed)
    }

    /// `delay(attempt) = clamp(min * 2^(attempt-1), min, max) * jitter`.
    #[must_use]
    pub fn exponential_delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        exponential_with_jitter(self.min_delay, self.max_delay, attempt, &self.jitter_range, rng)
    }

    /// Per-replica cooldown after `consecutive_failures`, same shape as
    /// `exponential_delay`, keyed on the replica's own failure count.
    #[must_use]
    pub fn replica_cooldown(&self, consecutive_failures: u32, rng: &mut impl Rng) -> Duration {
        exponential_with_jitter(self.min_delay, self.max_delay, consecutive_failures, &self.jitter_range, rng)
    }
}

fn exponential_with_jitter(
    min: Duration,
    max: Duration,
    attempt: u32,
    jitter_range: &std::ops::Range<f64>,
    rng: &mut impl Rng,
) -> Duration {
    let attempt = attempt.max(1);
    let shift = attempt.saturating_sub(1).min(32);
    let unclamped = min.saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
    let base = unclamped.clamp(min, max);
    let jitter = rng.gen_range(jitter_range.clone());
    Duration::from_secs_f64(base.as_secs_f64() * jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn startup_window_then_post_window() {
        let schedule = BackoffSchedule::default();
        assert_eq!(
            schedule.startup_delay(Duration::from_secs(0), 0),
            StartupDelay::Fixed(Duration::from_millis(500))
        );
        assert_eq!(schedule.startup_delay(Duration::from_secs(60), 0), StartupDelay::PostWindow);
    }

    #[test]
    fn exponential_delay_is_clamped_and_jittered() {
        let schedule = BackoffSchedule::default();
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 1..20 {
            let delay = schedule.exponential_delay(attempt, &mut rng);
            assert!(delay >= Duration::from_secs_f64(schedule.min_delay.as_secs_f64() * 0.8));
            assert!(delay <= schedule.max_delay);
        }
    }

    #[test]
    fn replica_cooldown_grows_with_failures() {
        let schedule = BackoffSchedule::default();
        let mut rng = StdRng::seed_from_u64(7);
        let low = schedule.replica_cooldown(1, &mut rng);
        let high = schedule.replica_cooldown(6, &mut rng);
        assert!(high >= low);
    }
}
