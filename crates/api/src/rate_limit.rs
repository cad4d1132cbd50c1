use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Sliding-window request counter keyed by client address.
#[derive(Debug, Clone)]
pub struct IpRateLimiter {
    hits: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    window: Duration,
    max_requests: usize,
}

impl IpRateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            hits: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_requests: max_requests.max(1),
        }
    }

    pub fn allow(&self, client: &str) -> bool {
        self.allow_at(client, Instant::now())
    }

    fn allow_at(&self, client: &str, now: Instant) -> bool {
        let mut hits = self.hits.lock();
        let queue = hits.entry(client.to_string()).or_default();

        while queue
            .front()
            .is_some_and(|first| now.duration_since(*first) > self.window)
        {
            queue.pop_front();
        }

        if queue.len() >= self.max_requests {
            return false;
        }

        queue.push_back(now);
        true
    }

    /// Drops clients with no request inside the window.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut hits = self.hits.lock();
        let before = hits.len();
        hits.retain(|_, queue| {
            queue
                .back()
                .is_some_and(|last| now.duration_since(*last) <= self.window)
        });
        before - hits.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.hits.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_max_requests_per_client() {
        let limiter = IpRateLimiter::new(Duration::from_secs(60), 2);
        let now = Instant::now();

        assert!(limiter.allow_at("10.0.0.1", now));
        assert!(limiter.allow_at("10.0.0.1", now));
        assert!(!limiter.allow_at("10.0.0.1", now));
        assert!(limiter.allow_at("10.0.0.2", now));
    }

    #[test]
    fn window_slides() {
        let limiter = IpRateLimiter::new(Duration::from_millis(100), 1);
        let start = Instant::now();

        assert!(limiter.allow_at("local", start));
        assert!(!limiter.allow_at("local", start + Duration::from_millis(50)));
        assert!(limiter.allow_at("local", start + Duration::from_millis(200)));
    }

    #[test]
    fn prune_keeps_recent_clients() {
        let limiter = IpRateLimiter::new(Duration::from_secs(60), 5);
        assert!(limiter.allow("a"));
        assert_eq!(limiter.prune(), 0);
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
