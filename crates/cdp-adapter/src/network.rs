//! In-flight request bookkeeping used to decide when a page has gone quiet.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

/// Tracks requests between `Network.requestWillBeSent` and
/// `Network.loadingFinished`/`loadingFailed`, keyed by request id so
/// redirects (which reuse the id) are not double counted.
#[derive(Debug)]
pub struct NetworkQuietTracker {
    inflight: HashSet<String>,
    last_activity: Instant,
}

impl NetworkQuietTracker {
    pub fn new(now: Instant) -> Self {
        Self {
            inflight: HashSet::new(),
            last_activity: now,
        }
    }

    /// Forget everything; called right before a navigation starts.
    pub fn reset(&mut self, now: Instant) {
        self.inflight.clear();
        self.last_activity = now;
    }

    pub fn request_started(&mut self, request_id: &str, now: Instant) {
        self.inflight.insert(request_id.to_string());
        self.last_activity = now;
    }

    pub fn request_finished(&mut self, request_id: &str, now: Instant) {
        if self.inflight.remove(request_id) {
            self.last_activity = now;
        }
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    pub fn since_last_activity(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn is_quiet(&self, now: Instant, window: Duration, max_inflight: usize) -> bool {
        self.inflight.len() <= max_inflight && self.since_last_activity(now) >= window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn quiet_only_after_window_without_inflight_requests() {
        let window = Duration::from_millis(500);
        let mut tracker = NetworkQuietTracker::new(Instant::now());
        assert!(!tracker.is_quiet(Instant::now(), window, 0));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(tracker.is_quiet(Instant::now(), window, 0));

        tracker.request_started("1", Instant::now());
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!tracker.is_quiet(Instant::now(), window, 0));
        assert!(tracker.is_quiet(Instant::now(), window, 1));

        tracker.request_finished("1", Instant::now());
        assert_eq!(tracker.inflight(), 0);
        assert!(!tracker.is_quiet(Instant::now(), window, 0));

        tokio::time::advance(window).await;
        assert!(tracker.is_quiet(Instant::now(), window, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn redirects_and_unknown_ids_do_not_skew_the_count() {
        let mut tracker = NetworkQuietTracker::new(Instant::now());
        tracker.request_started("7", Instant::now());
        tracker.request_started("7", Instant::now());
        assert_eq!(tracker.inflight(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        tracker.request_finished("unknown", Instant::now());
        assert_eq!(tracker.since_last_activity(Instant::now()), Duration::from_secs(1));

        tracker.reset(Instant::now());
        assert_eq!(tracker.inflight(), 0);
    }
}
