use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Dispatch quota for upstream fetches, shared by every refresh cycle.
///
/// Counts fetch starts per window, independent of the worker bound.
#[derive(Clone)]
pub struct FetchThrottle {
    limiter: Arc<DirectRateLimiter>,
    per_window: u32,
    window: Duration,
}

impl FetchThrottle {
    pub fn new(window: Duration, per_window: u32) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(quota_from_window(window, per_window))),
            per_window: per_window.max(1),
            window,
        }
    }

    pub fn per_minute(per_minute: u32) -> Self {
        Self::new(Duration::from_secs(60), per_minute)
    }

    /// Wait until the quota admits one more fetch.
    pub async fn until_ready(&self) {
        self.limiter.until_ready().await;
    }

    pub fn describe(&self) -> String {
        format!("{} fetches per {:?}", self.per_window, self.window)
    }
}

impl std::fmt::Debug for FetchThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchThrottle")
            .field("per_window", &self.per_window)
            .field("window", &self.window)
            .finish()
    }
}

fn quota_from_window(window: Duration, per_window: u32) -> Quota {
    let safe_limit = per_window.max(1);
    let burst = NonZeroU32::new(safe_limit).expect("safe limit must be non-zero");

    let seconds_per_cell = (window.as_secs_f64() / f64::from(safe_limit)).max(0.001);
    Quota::with_period(Duration::from_secs_f64(seconds_per_cell))
        .expect("period is always greater than zero")
        .allow_burst(burst)
}
