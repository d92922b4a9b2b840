//! Bounded polling for asynchronous UI completion.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

/// Re-evaluates `predicate` every `interval` until it returns `true` or
/// `deadline` (measured from the call) has elapsed.
///
/// The predicate is checked before the first sleep, so a condition that
/// already holds returns immediately. The final sleep is clipped to the
/// remaining time and the predicate gets one last look at the deadline.
/// Returns whether the condition was met; never fails.
pub async fn await_condition<F, Fut>(mut predicate: F, interval: Duration, deadline: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = Instant::now();
    let deadline_at = started + deadline;
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        if predicate().await {
            debug!(attempts, elapsed_ms = started.elapsed().as_millis() as u64, "condition met");
            return true;
        }
        let now = Instant::now();
        if now >= deadline_at {
            debug!(attempts, "condition not met before deadline");
            return false;
        }
        let pause = interval.min(deadline_at - now);
        trace!(attempts, pause_ms = pause.as_millis() as u64, "condition pending");
        sleep(pause).await;
    }
}
