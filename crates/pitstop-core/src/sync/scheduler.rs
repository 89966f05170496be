//! Delayed task scheduling
//!
//! Retry timers go through [`Scheduler`] so backoff can be observed in
//! tests without waiting on the wall clock.

use std::time::Duration;

use futures_util::future::BoxFuture;

/// Work to run once a delay has elapsed
pub type ScheduledTask = BoxFuture<'static, ()>;

/// Runs a task after a delay
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> TaskHandle;
}

/// Handle to a scheduled task
///
/// Dropping the handle does not cancel the task.
pub struct TaskHandle {
    cancel: Box<dyn Fn() + Send + Sync>,
}

impl TaskHandle {
    pub fn new(cancel: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Box::new(cancel),
        }
    }

    /// Stop the task if it has not run yet
    pub fn cancel(&self) {
        (self.cancel)();
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").finish_non_exhaustive()
    }
}

/// Schedules tasks on the tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> TaskHandle {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        let abort = handle.abort_handle();
        TaskHandle::new(move || abort.abort())
    }
}

/// Exponential backoff: `base * 2^attempt`, capped at `max`
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const BASE: Duration = Duration::from_millis(2000);
    const MAX: Duration = Duration::from_millis(30000);

    #[test]
    fn test_backoff_delay() {
        let delays: Vec<u128> = (0..7)
            .map(|n| backoff_delay(n, BASE, MAX).as_millis())
            .collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000, 30000, 30000]);
    }

    #[test]
    fn test_backoff_delay_saturates() {
        assert_eq!(backoff_delay(40, BASE, MAX), MAX);
        assert_eq!(backoff_delay(u32::MAX, BASE, MAX), MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_runs_after_delay() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        TokioScheduler.schedule(
            Duration::from_secs(2),
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_task_never_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let handle = TokioScheduler.schedule(
            Duration::from_secs(2),
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
