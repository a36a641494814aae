use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fixed-window rate limiter keyed by client identity.
///
/// Explicitly constructed and injected through `AppState`; nothing here is a
/// process-wide singleton. The entry map is hard-bounded at `max_entries`:
/// expired windows are evicted first, and if none have expired the oldest
/// live window is dropped to make room.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    max_entries: usize,
    windows: Mutex<HashMap<String, Window>>,
}

struct Window {
    started: Instant,
    count: u32,
}

/// Rejection with the seconds the client should wait before retrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("rate limited, retry after {retry_after}s")]
pub struct RateLimited {
    pub retry_after: u64,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration, max_entries: usize) -> Self {
        Self {
            max_requests,
            window,
            max_entries,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Records one request for `key` and decides whether it may proceed.
    pub fn check(&self, key: &str) -> Result<(), RateLimited> {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        if windows.len() >= self.max_entries && !windows.contains_key(key) {
            let window = self.window;
            windows.retain(|_, w| now.duration_since(w.started) < window);
            if windows.len() >= self.max_entries {
                // No expired windows to reclaim; drop the oldest live one.
                // That client restarts a fresh window, which is acceptable
                // next to unbounded growth.
                let oldest = windows
                    .iter()
                    .min_by_key(|(_, w)| w.started)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    windows.remove(&oldest);
                }
            }
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count >= self.max_requests {
            let elapsed = now.duration_since(entry.started);
            let remaining = self.window.saturating_sub(elapsed);
            return Err(RateLimited {
                retry_after: remaining.as_secs().max(1),
            });
        }
        entry.count += 1;
        Ok(())
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.windows.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_rejects_with_retry_after() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60), 100);
        for _ in 0..3 {
            assert!(limiter.check("1.2.3.4").is_ok());
        }
        let rejected = limiter.check("1.2.3.4").expect_err("over limit");
        assert!(rejected.retry_after >= 1);
        assert!(rejected.retry_after <= 60);
    }

    #[test]
    fn keys_are_limited_independently() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60), 100);
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("b").is_ok());
        assert!(limiter.check("a").is_err());
    }

    #[test]
    fn window_resets_after_it_elapses() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10), 100);
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_err());
        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.check("a").is_ok());
    }

    #[test]
    fn expired_entries_are_evicted_once_the_map_fills() {
        let limiter = RateLimiter::new(5, Duration::from_millis(5), 4);
        for key in ["a", "b", "c", "d"] {
            assert!(limiter.check(key).is_ok());
        }
        std::thread::sleep(Duration::from_millis(10));
        assert!(limiter.check("e").is_ok());
        assert_eq!(limiter.entry_count(), 1, "expired windows were evicted");
    }

    #[test]
    fn map_never_grows_past_max_entries_even_with_live_windows() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60), 4);
        for key in ["a", "b", "c", "d", "e", "f"] {
            assert!(limiter.check(key).is_ok());
        }
        assert!(limiter.entry_count() <= 4);
        // Existing keys still pass without evicting anyone.
        assert!(limiter.check("f").is_ok());
        assert!(limiter.entry_count() <= 4);
    }
}
