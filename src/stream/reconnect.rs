//! Reconnection backoff and retry timer

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;

/// Computes backoff delays and owns the single retry timer
///
/// The scheduler only decides *when* the retry future runs; whether the
/// retry still applies (the reconnecting flag may have been cleared after
/// scheduling) is checked by the future itself at fire time.
pub(crate) struct ReconnectScheduler {
    interval: Duration,
    max_interval: Duration,
    factor: f64,
    spreader: Duration,
    attempts: AtomicU32,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectScheduler {
    pub(crate) fn new(
        interval: Duration,
        max_interval: Duration,
        factor: f64,
        spreader: Duration,
    ) -> Self {
        Self {
            interval,
            max_interval,
            factor,
            spreader,
            attempts: AtomicU32::new(0),
            timer: Mutex::new(None),
        }
    }

    /// Backoff delay for a given attempt count, before jitter
    pub(crate) fn backoff(&self, attempts: u32) -> Duration {
        let grown = self.interval.as_millis() as f64 * self.factor.powi(attempts as i32);
        let capped = (grown as u64).min(self.max_interval.as_millis() as u64);
        Duration::from_millis(capped)
    }

    fn jitter(&self) -> Duration {
        let spread = self.spreader.as_millis() as u64;
        if spread == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..spread))
    }

    /// Delay for the next retry; a fast retry is the base interval with no
    /// growth or jitter, otherwise the jittered backoff for the current
    /// attempt count. Non-fast scheduling increments the attempt count.
    fn next_delay(&self, fast: bool) -> Duration {
        if fast {
            return self.interval;
        }
        let attempts = self.attempts.fetch_add(1, Ordering::Relaxed);
        self.backoff(attempts) + self.jitter()
    }

    /// Arm the retry timer, replacing any previously scheduled one
    pub(crate) fn schedule<F>(&self, fast: bool, retry: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.next_delay(fast);
        tracing::debug!(delay_ms = delay.as_millis() as u64, fast, "scheduling reconnect");

        // the timer task ends at fire time; the retry itself runs in its
        // own task so cancel() never aborts an attempt already in flight
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(retry);
        });

        let mut timer = self.timer.lock().expect("timer lock poisoned");
        if let Some(previous) = timer.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel any scheduled retry; safe to call with no timer armed
    pub(crate) fn cancel(&self) {
        let mut timer = self.timer.lock().expect("timer lock poisoned");
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }

    /// Whether a retry timer is armed and has not fired yet
    pub(crate) fn has_pending_timer(&self) -> bool {
        let timer = self.timer.lock().expect("timer lock poisoned");
        timer.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Reset the attempt count after a successful open
    pub(crate) fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::Relaxed);
    }

    /// Force the attempt count to at least one, so a server-initiated close
    /// never leads back to the ungrown base delay
    pub(crate) fn ensure_min_attempt(&self) {
        self.attempts.fetch_max(1, Ordering::Relaxed);
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn scheduler(factor: f64) -> ReconnectScheduler {
        ReconnectScheduler::new(
            Duration::from_millis(1000),
            Duration::from_millis(30000),
            factor,
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_backoff_growth() {
        let s = scheduler(2.0);
        assert_eq!(s.backoff(0), Duration::from_millis(1000));
        assert_eq!(s.backoff(1), Duration::from_millis(2000));
        assert_eq!(s.backoff(3), Duration::from_millis(8000));
    }

    #[test]
    fn test_backoff_cap() {
        let s = scheduler(2.0);
        assert_eq!(s.backoff(5), Duration::from_millis(30000));
        assert_eq!(s.backoff(20), Duration::from_millis(30000));
    }

    #[test]
    fn test_jittered_delay_window_at_three_attempts() {
        let s = scheduler(2.0);
        s.attempts.store(3, Ordering::Relaxed);
        for _ in 0..50 {
            s.attempts.store(3, Ordering::Relaxed);
            let delay = s.next_delay(false);
            assert!(delay >= Duration::from_millis(8000), "delay {delay:?}");
            assert!(delay < Duration::from_millis(8500), "delay {delay:?}");
        }
    }

    #[test]
    fn test_jittered_delay_window_at_cap() {
        let s = scheduler(2.0);
        for _ in 0..50 {
            s.attempts.store(30, Ordering::Relaxed);
            let delay = s.next_delay(false);
            assert!(delay >= Duration::from_millis(30000), "delay {delay:?}");
            assert!(delay < Duration::from_millis(30500), "delay {delay:?}");
        }
    }

    #[test]
    fn test_fast_delay_is_base_without_jitter_or_growth() {
        let s = scheduler(2.0);
        s.attempts.store(7, Ordering::Relaxed);
        assert_eq!(s.next_delay(true), Duration::from_millis(1000));
        // fast scheduling must not touch the attempt count
        assert_eq!(s.attempts(), 7);
    }

    #[test]
    fn test_attempts_increment_only_on_slow_path() {
        let s = scheduler(1.5);
        assert_eq!(s.attempts(), 0);
        let _ = s.next_delay(false);
        let _ = s.next_delay(false);
        assert_eq!(s.attempts(), 2);
        let _ = s.next_delay(true);
        assert_eq!(s.attempts(), 2);
    }

    #[test]
    fn test_ensure_min_attempt() {
        let s = scheduler(1.5);
        s.ensure_min_attempt();
        assert_eq!(s.attempts(), 1);
        s.attempts.store(4, Ordering::Relaxed);
        s.ensure_min_attempt();
        assert_eq!(s.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_replaces_previous_timer() {
        let s = Arc::new(scheduler(1.5));
        let first_fired = Arc::new(AtomicBool::new(false));
        let second_fired = Arc::new(AtomicBool::new(false));

        let flag = first_fired.clone();
        s.schedule(true, async move {
            flag.store(true, Ordering::SeqCst);
        });
        let flag = second_fired.clone();
        s.schedule(true, async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(!first_fired.load(Ordering::SeqCst));
        assert!(second_fired.load(Ordering::SeqCst));
        assert!(!s.has_pending_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let s = scheduler(1.5);
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        s.schedule(true, async move {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(s.has_pending_timer());
        s.cancel();
        assert!(!s.has_pending_timer());

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
