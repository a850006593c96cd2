use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Injectable time source so admission windows are deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct Window {
    started: DateTime<Utc>,
    count: u32,
}

/// Fixed-window admission control keyed by source identity (client IP).
/// Check-and-increment happens under one lock so two concurrent checks can
/// never both claim the last slot. Idle windows are garbage-collected on the
/// way through so a key with no recent activity holds no state.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        RateLimiter {
            max_requests,
            window: Duration::seconds(window_seconds as i64),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admits or rejects one request from `source_key` at `now`. On
    /// rejection returns the remaining window time as retry-after.
    pub fn admit(&self, source_key: &str, now: DateTime<Utc>) -> Result<(), std::time::Duration> {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        windows.retain(|_, w| now - w.started < self.window);

        let window = windows.entry(source_key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if window.count >= self.max_requests {
            let retry_after = self.window - (now - window.started);
            return Err(retry_after.to_std().unwrap_or_default());
        }

        window.count += 1;
        Ok(())
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.windows.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_fourth_request_in_window_rejected() {
        let limiter = RateLimiter::new(3, 3600);
        let now = t0();

        for _ in 0..3 {
            assert!(limiter.admit("10.0.0.1", now).is_ok());
        }
        let retry_after = limiter.admit("10.0.0.1", now).unwrap_err();
        assert_eq!(retry_after.as_secs(), 3600);
    }

    #[test]
    fn test_window_expiry_readmits() {
        let limiter = RateLimiter::new(3, 3600);
        let now = t0();

        for _ in 0..3 {
            assert!(limiter.admit("10.0.0.1", now).is_ok());
        }
        assert!(limiter.admit("10.0.0.1", now).is_err());

        let later = now + Duration::seconds(3601);
        assert!(limiter.admit("10.0.0.1", later).is_ok());
    }

    #[test]
    fn test_keys_do_not_contend() {
        let limiter = RateLimiter::new(1, 3600);
        let now = t0();

        assert!(limiter.admit("10.0.0.1", now).is_ok());
        assert!(limiter.admit("10.0.0.2", now).is_ok());
        assert!(limiter.admit("10.0.0.1", now).is_err());
    }

    #[test]
    fn test_retry_after_shrinks_as_window_ages() {
        let limiter = RateLimiter::new(1, 3600);
        let now = t0();

        assert!(limiter.admit("10.0.0.1", now).is_ok());
        let retry_after = limiter
            .admit("10.0.0.1", now + Duration::seconds(600))
            .unwrap_err();
        assert_eq!(retry_after.as_secs(), 3000);
    }

    #[test]
    fn test_idle_windows_garbage_collected() {
        let limiter = RateLimiter::new(3, 3600);
        let now = t0();

        for i in 0..50 {
            let _ = limiter.admit(&format!("10.0.0.{i}"), now);
        }
        assert_eq!(limiter.tracked_keys(), 50);

        let later = now + Duration::seconds(3601);
        let _ = limiter.admit("10.0.1.1", later);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_quota() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(3, 3600));
        let now = t0();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || limiter.admit("10.0.0.1", now).is_ok())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 3);
    }
}
