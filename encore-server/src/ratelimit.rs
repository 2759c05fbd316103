use std::time::{Duration, Instant};

use dashmap::DashMap;
use encore_collab::PrimaryKey;

const WINDOW: Duration = Duration::from_secs(60);
const MAX_REQUESTS_PER_WINDOW: u32 = 120;

/// A fixed-window rate limiter keyed by caller and route.
///
/// Invoked by mutating handlers before they touch the core. State is
/// process-local and resets on restart.
#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<(PrimaryKey, &'static str), Window>,
}

struct Window {
    started_at: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts the request, returning false once the caller exhausted the
    /// current window for this route
    pub fn check(&self, caller_id: PrimaryKey, route: &'static str) -> bool {
        let mut window = self
            .windows
            .entry((caller_id, route))
            .or_insert_with(|| Window {
                started_at: Instant::now(),
                count: 0,
            });

        if window.started_at.elapsed() >= WINDOW {
            window.started_at = Instant::now();
            window.count = 0;
        }

        window.count += 1;
        window.count <= MAX_REQUESTS_PER_WINDOW
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new();

        for _ in 0..MAX_REQUESTS_PER_WINDOW {
            assert!(limiter.check(1, "cast_vote"));
        }

        assert!(!limiter.check(1, "cast_vote"));
    }

    #[test]
    fn test_routes_are_tracked_separately() {
        let limiter = RateLimiter::new();

        for _ in 0..MAX_REQUESTS_PER_WINDOW {
            limiter.check(1, "cast_vote");
        }

        assert!(limiter.check(1, "add_track"));
    }

    #[test]
    fn test_callers_are_tracked_separately() {
        let limiter = RateLimiter::new();

        for _ in 0..MAX_REQUESTS_PER_WINDOW {
            limiter.check(1, "cast_vote");
        }

        assert!(limiter.check(2, "cast_vote"));
    }
}
