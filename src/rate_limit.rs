//! Per-IP token-bucket rate limiting for the log endpoint (§4.J step 2):
//! burst equals the configured per-minute limit, refill rate is
//! `limit/60` per second.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

type PerKeyLimiter = RateLimiter<NotKeyed, InMemoryState, governor::clock::DefaultClock>;

struct Entry {
    limiter: Arc<PerKeyLimiter>,
    last_seen: Instant,
}

/// Sharded per-IP limiters, built from a single requests-per-minute budget.
#[derive(Clone)]
pub struct IpRateLimiter {
    limiters: Arc<DashMap<IpAddr, Entry>>,
    quota: Quota,
}

impl IpRateLimiter {
    pub fn new(per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute.max(1)).expect("max(1) is never zero");
        Self {
            limiters: Arc::new(DashMap::new()),
            quota: Quota::per_minute(per_minute),
        }
    }

    /// Returns `true` when `ip` is allowed to proceed right now.
    pub fn check(&self, ip: IpAddr) -> bool {
        let quota = self.quota;
        let mut entry = self.limiters.entry(ip).or_insert_with(|| Entry {
            limiter: Arc::new(RateLimiter::direct(quota)),
            last_seen: Instant::now(),
        });
        entry.last_seen = Instant::now();
        entry.limiter.check().is_ok()
    }

    /// Drop limiters idle long enough that their bucket must have fully
    /// refilled, bounding map growth under many distinct client IPs.
    pub fn sweep(&self) {
        let idle_cutoff = Duration::from_secs(120);
        let now = Instant::now();
        self.limiters
            .retain(|_, entry| now.duration_since(entry.last_seen) < idle_cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    // Scenario E from §8: burst equals the per-minute limit.
    #[test]
    fn allows_burst_up_to_limit_then_blocks() {
        let limiter = IpRateLimiter::new(3);
        let addr = ip("1.1.1.1");
        assert!(limiter.check(addr));
        assert!(limiter.check(addr));
        assert!(limiter.check(addr));
        assert!(!limiter.check(addr));
    }

    #[test]
    fn independent_ips_have_independent_budgets() {
        let limiter = IpRateLimiter::new(1);
        assert!(limiter.check(ip("1.1.1.1")));
        assert!(limiter.check(ip("2.2.2.2")));
        assert!(!limiter.check(ip("1.1.1.1")));
    }
}
