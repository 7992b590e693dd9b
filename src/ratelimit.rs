//! Per-user sliding-window rate limiting.
//!
//! Counters live behind the [`KvStore`] trait so gateway replicas can share
//! a backing store. The window is the classic two-bucket approximation: the
//! previous minute's count is weighted by how much of it still overlaps the
//! sliding window, then added to the current minute's count.

use std::sync::Arc;
use std::time::Duration;

use crate::kv::KvStore;

const WINDOW_SECS: i64 = 60;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    max_per_minute: u64,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, max_per_minute: u64) -> Self {
        Self { kv, max_per_minute }
    }

    /// Check and consume one request slot for `principal`.
    pub fn check(&self, principal: &str) -> Decision {
        self.check_at(principal, chrono::Utc::now().timestamp())
    }

    fn check_at(&self, principal: &str, now: i64) -> Decision {
        let window_start = now - now.rem_euclid(WINDOW_SECS);
        let elapsed = now - window_start;

        let curr_key = format!("rl:{principal}:{window_start}");
        let prev_key = format!("rl:{principal}:{}", window_start - WINDOW_SECS);

        let curr = self.kv.get_count(&curr_key);
        let prev = self.kv.get_count(&prev_key);
        let weighted =
            (prev as f64 * ((WINDOW_SECS - elapsed) as f64 / WINDOW_SECS as f64)) + curr as f64;

        if weighted + 1.0 > self.max_per_minute as f64 {
            let retry_after = (WINDOW_SECS - elapsed).max(1) as u64;
            return Decision::Limited {
                retry_after_secs: retry_after,
            };
        }

        // Counter must outlive the window it still overlaps.
        self.kv
            .incr(&curr_key, Duration::from_secs(2 * WINDOW_SECS as u64));
        Decision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    fn limiter(max: u64) -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryKvStore::new()), max)
    }

    #[test]
    fn allows_up_to_cap_then_blocks() {
        let rl = limiter(5);
        let now = 1_700_000_000;
        for _ in 0..5 {
            assert_eq!(rl.check_at("alice", now), Decision::Allowed);
        }
        match rl.check_at("alice", now) {
            Decision::Limited { retry_after_secs } => {
                assert!(retry_after_secs >= 1 && retry_after_secs <= 60);
            }
            Decision::Allowed => panic!("sixth request should be limited"),
        }
    }

    #[test]
    fn users_are_independent() {
        let rl = limiter(1);
        let now = 1_700_000_000;
        assert_eq!(rl.check_at("alice", now), Decision::Allowed);
        assert_eq!(rl.check_at("bob", now), Decision::Allowed);
        assert!(matches!(rl.check_at("alice", now), Decision::Limited { .. }));
    }

    #[test]
    fn previous_window_bleeds_into_current() {
        let rl = limiter(10);
        // Fill the previous window completely.
        let prev = 1_700_000_000 - 1_700_000_000_i64.rem_euclid(60);
        for _ in 0..10 {
            assert_eq!(rl.check_at("carol", prev), Decision::Allowed);
        }
        // One second into the next window nearly all of the previous count
        // still overlaps, so the request is rejected.
        assert!(matches!(
            rl.check_at("carol", prev + 61),
            Decision::Limited { .. }
        ));
        // Near the end of the next window the overlap has decayed away.
        assert_eq!(rl.check_at("carol", prev + 119), Decision::Allowed);
    }

    #[test]
    fn window_reset_allows_again() {
        let rl = limiter(2);
        let now = 1_700_000_000;
        assert_eq!(rl.check_at("dave", now), Decision::Allowed);
        assert_eq!(rl.check_at("dave", now), Decision::Allowed);
        assert!(matches!(rl.check_at("dave", now), Decision::Limited { .. }));
        // Two full windows later both buckets are out of scope.
        assert_eq!(rl.check_at("dave", now + 180), Decision::Allowed);
    }
}
