//! Sliding-window rate limiter bounding calls into one external source.
//!
//! The limiter admits at most `max_events` starts within any rolling
//! `period`, with optional minimum spacing between starts, a cool-down
//! after an event finishes, and an extra delay once a full window has to
//! drain. All timing uses `tokio::time`, so tests run it under a paused
//! clock.
//!
//! State is guarded by a plain [`std::sync::Mutex`]; the critical section
//! only inspects and updates the history vector and never awaits. All
//! sleeping happens outside the lock.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Configuration of one [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Maximum number of starts within any rolling `period`
    pub max_events: usize,

    /// Length of the rolling window
    pub period: Duration,

    /// Minimum delay between successive starts
    pub min_delay: Duration,

    /// Cool-down after an event finishes before the next may start
    pub finished_delay: Duration,

    /// Extra delay once a full window has to drain
    pub period_delay: Duration,

    /// Upper bound on how long `acquire` may wait for a slot
    pub timeout: Option<Duration>,
}

impl ThrottleConfig {
    pub fn new(max_events: usize, period: Duration) -> Self {
        Self {
            max_events,
            period,
            min_delay: Duration::ZERO,
            finished_delay: Duration::ZERO,
            period_delay: Duration::ZERO,
            timeout: None,
        }
    }

    pub fn min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    pub fn finished_delay(mut self, finished_delay: Duration) -> Self {
        self.finished_delay = finished_delay;
        self
    }

    pub fn period_delay(mut self, period_delay: Duration) -> Self {
        self.period_delay = period_delay;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Throttle slot not obtained before the deadline. Retryable by the caller.
#[derive(Debug, thiserror::Error)]
#[error("no throttle slot available within {waited:?}")]
pub struct ThrottleTimeout {
    /// How long the caller waited before giving up
    pub waited: Duration,
}

/// One admitted event: when it started, and when it finished.
#[derive(Debug, Clone, Copy)]
struct ThrottleInstance {
    id: u64,
    started: Instant,
    finished: Option<Instant>,
}

#[derive(Debug, Default)]
struct ThrottleState {
    /// Start-ordered history of current (in-window) instances
    history: Vec<ThrottleInstance>,
    /// Latest finish time ever observed; survives purging
    last_finish: Option<Instant>,
    next_id: u64,
}

enum Admission {
    Admitted { id: u64, start: Instant },
    Busy { wait_until: Instant },
}

/// Sliding-window throttle for one external source.
///
/// Construct once per source and share via `Arc`; never a process global.
#[derive(Debug)]
pub struct RateLimiter {
    config: ThrottleConfig,
    state: Mutex<ThrottleState>,
}

impl RateLimiter {
    pub fn new(config: ThrottleConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(ThrottleState::default()),
        })
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Wait for a slot and claim it.
    ///
    /// The returned guard must be released exactly once when the throttled
    /// work ends; [`ThrottleGuard::release`] is the explicit form, and the
    /// guard's `Drop` covers panic and cancellation paths.
    pub async fn acquire(self: &Arc<Self>) -> Result<ThrottleGuard, ThrottleTimeout> {
        let began = Instant::now();
        if self.config.max_events == 0 {
            return Err(ThrottleTimeout {
                waited: Duration::ZERO,
            });
        }
        let deadline = self.config.timeout.map(|t| began + t);
        loop {
            match self.try_admit() {
                Admission::Admitted { id, start } => {
                    let guard = ThrottleGuard {
                        limiter: Arc::clone(self),
                        id,
                        started: start,
                        released: false,
                    };
                    if start > Instant::now() {
                        sleep_until(start).await;
                    }
                    return Ok(guard);
                }
                Admission::Busy { wait_until } => {
                    if let Some(deadline) = deadline {
                        if wait_until >= deadline {
                            return Err(ThrottleTimeout {
                                waited: Instant::now() - began,
                            });
                        }
                    }
                    sleep_until(wait_until).await;
                }
            }
        }
    }

    /// Purge stale history and either claim a start time or report how long
    /// to wait. Runs entirely under the state mutex.
    fn try_admit(&self) -> Admission {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();

        // Drop entries that have left the window. Only ever removes from the
        // front, so the start order of what remains is untouched.
        while state
            .history
            .first()
            .is_some_and(|instance| instance.started + self.config.period <= now)
        {
            state.history.remove(0);
        }

        let latest_start = state.history.last().map(|instance| instance.started);
        let last_finish = state.last_finish;

        if state.history.len() >= self.config.max_events {
            let oldest_start = state.history[0].started;
            let mut wait_until = oldest_start + self.config.period + self.config.period_delay;
            if let Some(latest_start) = latest_start {
                wait_until = wait_until.max(latest_start + self.config.min_delay);
            }
            if let Some(last_finish) = last_finish {
                wait_until = wait_until.max(last_finish + self.config.finished_delay);
            }
            return Admission::Busy { wait_until };
        }

        let mut start = now;
        if let Some(latest_start) = latest_start {
            start = start.max(latest_start + self.config.min_delay);
        }
        if let Some(last_finish) = last_finish {
            start = start.max(last_finish + self.config.finished_delay);
        }

        let id = state.next_id;
        state.next_id += 1;
        state.history.push(ThrottleInstance {
            id,
            started: start,
            finished: None,
        });

        Admission::Admitted { id, start }
    }

    fn finish(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        if let Some(instance) = state.history.iter_mut().find(|instance| instance.id == id) {
            if instance.finished.is_none() {
                instance.finished = Some(now);
            }
        }
        state.last_finish = Some(state.last_finish.map_or(now, |finish| finish.max(now)));
    }

    /// Start times currently inside the window, oldest first.
    #[cfg(test)]
    fn current_starts(&self) -> Vec<Instant> {
        let state = self.state.lock().unwrap();
        state.history.iter().map(|instance| instance.started).collect()
    }
}

/// Claim on one throttle slot.
///
/// Release it explicitly with [`release`](Self::release) when the throttled
/// work ends; if the guard is dropped instead (panic, cancelled future), the
/// release happens in `Drop` so an abandoned wait never holds its claim
/// beyond the current window.
#[derive(Debug)]
pub struct ThrottleGuard {
    limiter: Arc<RateLimiter>,
    id: u64,
    started: Instant,
    released: bool,
}

impl ThrottleGuard {
    /// When this claim's slot starts.
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Mark the throttled work finished.
    pub fn release(mut self) {
        self.finish_once();
    }

    fn finish_once(&mut self) {
        if !self.released {
            self.released = true;
            self.limiter.finish(self.id);
        }
    }
}

impl Drop for ThrottleGuard {
    fn drop(&mut self) {
        self.finish_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_window_bound_over_sequential_cycles() {
        let limiter = RateLimiter::new(ThrottleConfig::new(2, Duration::from_secs(10)));
        let period = Duration::from_secs(10);

        let mut starts = Vec::new();
        for _ in 0..5 {
            let guard = limiter.acquire().await.unwrap();
            starts.push(guard.started());
            guard.release();
        }
        starts.sort();

        // No rolling 10s window ending at a start may contain more than 2 starts.
        for &end in &starts {
            let in_window = starts
                .iter()
                .filter(|&&s| s <= end && s + period > end)
                .count();
            assert!(in_window <= 2, "{} starts within one period", in_window);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_limiter_times_out() {
        let limiter = RateLimiter::new(
            ThrottleConfig::new(1, Duration::from_secs(100)).timeout(Duration::from_secs(1)),
        );

        let held = limiter.acquire().await.unwrap();

        let began = Instant::now();
        let err = limiter.acquire().await.unwrap_err();
        assert!(Instant::now() - began <= Duration::from_secs(1));
        assert!(err.waited <= Duration::from_secs(1));

        held.release();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_capacity_always_fails() {
        let limiter = RateLimiter::new(ThrottleConfig::new(0, Duration::from_secs(10)));
        assert!(limiter.acquire().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_delay_spaces_starts() {
        let limiter = RateLimiter::new(
            ThrottleConfig::new(10, Duration::from_secs(60)).min_delay(Duration::from_secs(2)),
        );

        let a = limiter.acquire().await.unwrap();
        let b = limiter.acquire().await.unwrap();
        let starts = limiter.current_starts();
        assert!(starts[1] - starts[0] >= Duration::from_secs(2));
        a.release();
        b.release();
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_delay_applies_after_release() {
        let limiter = RateLimiter::new(
            ThrottleConfig::new(10, Duration::from_secs(60))
                .finished_delay(Duration::from_secs(3)),
        );

        let guard = limiter.acquire().await.unwrap();
        let released_at = Instant::now();
        guard.release();

        let _next = limiter.acquire().await.unwrap();
        let starts = limiter.current_starts();
        assert!(*starts.last().unwrap() >= released_at + Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_respect_bound() {
        let limiter = RateLimiter::new(ThrottleConfig::new(2, Duration::from_secs(10)));
        let period = Duration::from_secs(10);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                let guard = limiter.acquire().await.unwrap();
                let started = guard.started();
                guard.release();
                started
            }));
        }

        let mut starts = Vec::new();
        for handle in handles {
            starts.push(handle.await.unwrap());
        }
        starts.sort();
        assert_eq!(starts.len(), 6);

        for &end in &starts {
            let in_window = starts
                .iter()
                .filter(|&&s| s <= end && s + period > end)
                .count();
            assert!(in_window <= 2, "{} starts within one period", in_window);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_preserves_start_order() {
        let limiter = RateLimiter::new(ThrottleConfig::new(3, Duration::from_secs(10)));

        for _ in 0..7 {
            let guard = limiter.acquire().await.unwrap();
            guard.release();
            let starts = limiter.current_starts();
            assert!(starts.windows(2).all(|pair| pair[0] <= pair[1]));
            tokio::time::advance(Duration::from_secs(1)).await;
        }
    }
}
