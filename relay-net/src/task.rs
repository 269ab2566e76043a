//! Periodic background tasks with explicit start/stop.
//!
//! Each task runs its tick on a tokio interval until `stop()` is called or
//! the handle is dropped. A stop never interrupts a tick in progress.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Shortest period accepted; `tokio::time::interval` rejects zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

pub struct PeriodicTask {
    name: &'static str,
    period: Duration,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `tick` to run immediately and then every `period`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    // Fires on stop() and when the handle is dropped.
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => tick(),
                }
            }
            tracing::debug!(task = name, "periodic task stopped");
        });

        tracing::debug!(task = name, period_ms = period.as_millis() as u64, "periodic task started");
        PeriodicTask {
            name,
            period,
            stop_tx,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the task and wait for its current tick to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let task = PeriodicTask::start("count", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(task.name(), "count");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(task.is_running());
        task.stop().await;

        let stopped_at = count.load(Ordering::SeqCst);
        assert!(stopped_at >= 2, "expected several ticks, got {stopped_at}");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
    }

    #[tokio::test]
    async fn test_first_tick_is_immediate() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let task = PeriodicTask::start("slow", Duration::from_secs(3600), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        task.stop().await;
    }

    #[tokio::test]
    async fn test_zero_period_is_clamped() {
        let task = PeriodicTask::start("zero", Duration::ZERO, || {});
        assert_eq!(task.period(), MIN_PERIOD);
        task.stop().await;
    }
}
