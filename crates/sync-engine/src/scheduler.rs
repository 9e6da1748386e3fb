// crates/sync-engine/src/scheduler.rs
//! Cancellable delayed task

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Runs at most one delayed future at a time
///
/// Scheduling again replaces (aborts) the pending task, which is what a
/// debounce needs: only the last call in a burst fires.
#[derive(Debug, Default)]
pub struct DelayedTask {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DelayedTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` after `delay`, replacing any pending task
    ///
    /// Returns false when called outside a tokio runtime; nothing is
    /// scheduled in that case.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            log::warn!("No async runtime; delayed task dropped");
            return false;
        };

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        match self.handle.lock() {
            Ok(mut slot) => {
                if let Some(previous) = slot.replace(handle) {
                    previous.abort();
                }
                true
            }
            Err(_) => {
                handle.abort();
                false
            }
        }
    }

    /// Cancels the pending task; returns true if one was pending
    pub fn cancel(&self) -> bool {
        let pending = self.handle.lock().ok().and_then(|mut slot| slot.take());
        match pending {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.handle
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for DelayedTask {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.handle.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let task = DelayedTask::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        assert!(task.schedule(Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(task.is_pending());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!task.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_coalesces() {
        let task = DelayedTask::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = fired.clone();
            task.schedule(Duration::from_millis(100), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let task = DelayedTask::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        task.schedule(Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(task.cancel());
        assert!(!task.cancel());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_schedule_without_runtime() {
        let task = DelayedTask::new();
        assert!(!task.schedule(Duration::from_millis(1), async {}));
        assert!(!task.is_pending());
    }
}
