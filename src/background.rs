//! Detached work that outlives the request that scheduled it.
//!
//! A [`TaskBarrier`] is created at startup, handed to whatever schedules
//! detached work, and drained at shutdown with a bounded wait. Tasks never
//! propagate panics: a panic is caught, logged and counted, and the task is
//! marked finished like any other.

use crate::telemetry::spans;
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, error, info, warn};

/// Tracks in-flight detached tasks so shutdown can wait for them.
#[derive(Clone, Default)]
pub struct TaskBarrier {
    tracker: TaskTracker,
}

impl TaskBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` detached. Completion is recorded whether it returns or panics.
    ///
    /// The future must own everything it touches; copy request data in
    /// before calling.
    pub fn run<F>(&self, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        crate::metrics::background_task_started();

        self.tracker.spawn(
            async move {
                if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
                    crate::metrics::record_background_panic();
                    error!(task = name, panic = %panic_message(panic.as_ref()), "Background task panicked");
                }
                crate::metrics::background_task_finished();
            }
            .instrument(spans::background(name)),
        )
    }

    /// Tasks registered and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait up to `timeout` for every registered task.
    ///
    /// Returns `true` if all finished. Stragglers are left running and the
    /// caller proceeds regardless.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, timeout_ms = timeout.as_millis() as u64, "Draining background tasks");
        }

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(remaining = self.tracker.len(), "Background tasks still running after drain timeout");
                false
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_drain_waits_for_tasks() {
        let barrier = TaskBarrier::new();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let done = Arc::clone(&done);
            barrier.run("counter", async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert!(barrier.drain(Duration::from_secs(2)).await);
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(barrier.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let barrier = TaskBarrier::new();
        let handle = barrier.run("explodes", async {
            panic!("template exploded");
        });

        // The join handle sees a normal completion, not a panic.
        assert!(handle.await.is_ok());
        assert!(barrier.drain(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_drain_is_bounded() {
        let barrier = TaskBarrier::new();
        barrier.run("slow", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let started = std::time::Instant::now();
        assert!(!barrier.drain(Duration::from_millis(50)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(barrier.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_drain_with_nothing_registered() {
        assert!(TaskBarrier::new().drain(Duration::from_millis(10)).await);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
