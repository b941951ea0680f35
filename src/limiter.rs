//! Failure limiter (§4.C): per-key failure counter with a block window,
//! used to throttle repeated token-validation failures from the same
//! client IP.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone)]
struct FailureEntry {
    count: u32,
    first_fail: Instant,
    blocked_until: Option<Instant>,
    last_activity: Instant,
}

impl FailureEntry {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 0,
            first_fail: now,
            blocked_until: None,
            last_activity: now,
        }
    }
}

const IDLE_EXPIRY: Duration = Duration::from_secs(600);

/// Per-key failure counter with a block window. Cloning is cheap — clones
/// share the same underlying map via `Arc`.
#[derive(Debug, Clone)]
pub struct FailureLimiter {
    entries: Arc<DashMap<String, Mutex<FailureEntry>>>,
    max_attempts: u32,
    block_duration: Duration,
}

impl FailureLimiter {
    pub fn new(max_attempts: u32, block_duration: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_attempts,
            block_duration,
        }
    }

    /// Peek at whether `key` is currently blocked, without recording an
    /// attempt. Used before spending a verification attempt (§4.J step 5):
    /// callers still record the outcome afterward via [`Self::check_and_record`].
    pub async fn is_blocked(&self, key: &str) -> bool {
        let Some(entry) = self.entries.get(key) else {
            return false;
        };
        let guard = entry.lock().await;
        guard.blocked_until.is_some_and(|until| Instant::now() < until)
    }

    /// Record a success or failure for `key`. Returns `true` if the key is
    /// (now, or still) blocked.
    pub async fn check_and_record(&self, key: &str, success: bool) -> bool {
        let now = Instant::now();
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(FailureEntry::fresh(now)));
        let mut guard = entry.lock().await;

        if let Some(until) = guard.blocked_until {
            if now < until {
                guard.last_activity = now;
                return true;
            }
            // Block window elapsed — fall through and treat this attempt fresh.
            guard.blocked_until = None;
            guard.count = 0;
        }

        if success {
            guard.count = 0;
            guard.blocked_until = None;
            guard.last_activity = now;
            return false;
        }

        if guard.count == 0 {
            guard.first_fail = now;
        }
        guard.count += 1;
        guard.last_activity = now;

        if guard.count >= self.max_attempts {
            guard.blocked_until = Some(now + self.block_duration);
            return true;
        }

        false
    }

    /// Drop entries that are not currently blocked and have been idle for
    /// at least 10 minutes.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let mut stale = Vec::new();
        for item in self.entries.iter() {
            let guard = item.value().lock().await;
            let blocked = guard.blocked_until.is_some_and(|until| now < until);
            if !blocked && now.duration_since(guard.last_activity) >= IDLE_EXPIRY {
                stale.push(item.key().clone());
            }
        }
        for key in stale {
            self.entries.remove(&key);
        }
    }

    /// Spawn a background task that sweeps on `period`, stopping when the
    /// returned handle is aborted.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick is immediate — skip it
            loop {
                interval.tick().await;
                limiter.sweep().await;
                debug!("failure limiter sweep complete");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_never_blocks() {
        let limiter = FailureLimiter::new(3, Duration::from_secs(60));
        assert!(!limiter.check_and_record("k", true).await);
    }

    #[tokio::test]
    async fn blocks_after_max_attempts() {
        let limiter = FailureLimiter::new(3, Duration::from_secs(60));
        assert!(!limiter.check_and_record("k", false).await);
        assert!(!limiter.check_and_record("k", false).await);
        assert!(limiter.check_and_record("k", false).await);
    }

    #[tokio::test]
    async fn is_blocked_peeks_without_recording() {
        let limiter = FailureLimiter::new(1, Duration::from_secs(60));
        assert!(!limiter.is_blocked("k").await);
        limiter.check_and_record("k", false).await;
        assert!(limiter.is_blocked("k").await);
        // Peeking again must not have reset or otherwise mutated the entry.
        assert!(limiter.is_blocked("k").await);
    }

    #[tokio::test]
    async fn blocked_key_stays_blocked_immediately() {
        let limiter = FailureLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check_and_record("k", false).await);
        assert!(limiter.check_and_record("k", false).await);
    }

    #[tokio::test]
    async fn success_resets_counter() {
        let limiter = FailureLimiter::new(3, Duration::from_secs(60));
        assert!(!limiter.check_and_record("k", false).await);
        assert!(!limiter.check_and_record("k", false).await);
        assert!(!limiter.check_and_record("k", true).await);
        assert!(!limiter.check_and_record("k", false).await);
        assert!(!limiter.check_and_record("k", false).await);
        assert!(limiter.check_and_record("k", false).await);
    }

    #[tokio::test]
    async fn independent_keys_do_not_interfere() {
        let limiter = FailureLimiter::new(2, Duration::from_secs(60));
        assert!(!limiter.check_and_record("a", false).await);
        assert!(limiter.check_and_record("a", false).await);
        // "b" has its own fresh counter and is not blocked by "a"'s failures.
        assert!(!limiter.check_and_record("b", false).await);
    }

    #[tokio::test]
    async fn sweep_drops_idle_unblocked_entries() {
        let limiter = FailureLimiter::new(5, Duration::from_secs(60));
        limiter.check_and_record("k", false).await;
        {
            let entry = limiter.entries.get("k").unwrap();
            let mut guard = entry.lock().await;
            guard.last_activity = Instant::now() - Duration::from_secs(601);
        }
        limiter.sweep().await;
        assert!(!limiter.entries.contains_key("k"));
    }

    #[tokio::test]
    async fn sweep_keeps_blocked_entries_even_if_idle() {
        let limiter = FailureLimiter::new(1, Duration::from_secs(3600));
        limiter.check_and_record("k", false).await;
        {
            let entry = limiter.entries.get("k").unwrap();
            let mut guard = entry.lock().await;
            guard.last_activity = Instant::now() - Duration::from_secs(601);
        }
        limiter.sweep().await;
        assert!(limiter.entries.contains_key("k"));
    }
}
