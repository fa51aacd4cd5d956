use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Counting barrier over the jobs of one run.
///
/// Starts with one reference held by the dispatcher itself, released by
/// [`OutstandingJobs::seal`] once partitioning is done, so the count cannot
/// touch zero while jobs are still being handed out. Each dispatched job holds
/// a [`CompletionGuard`] that gives its reference back exactly once on drop.
#[derive(Debug, Clone)]
pub struct OutstandingJobs {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    pending: AtomicUsize,
    tracked: AtomicUsize,
    completed: AtomicUsize,
    sealed: AtomicBool,
    idle: Notify,
}

impl Default for OutstandingJobs {
    fn default() -> Self {
        Self::new()
    }
}

impl OutstandingJobs {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: AtomicUsize::new(1),
                tracked: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                sealed: AtomicBool::new(false),
                idle: Notify::new(),
            }),
        }
    }

    /// Register one more job. The returned guard must travel with the job.
    pub fn track(&self) -> CompletionGuard {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        self.inner.tracked.fetch_add(1, Ordering::Relaxed);
        CompletionGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Release the dispatcher's own reference. Idempotent.
    pub fn seal(&self) {
        if !self.inner.sealed.swap(true, Ordering::AcqRel) {
            self.inner.release();
        }
    }

    /// Resolves once the run is sealed and every tracked job has completed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// References still outstanding (including the unsealed dispatcher's).
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Jobs registered through [`track`](Self::track).
    pub fn tracked(&self) -> usize {
        self.inner.tracked.load(Ordering::Relaxed)
    }

    /// Guards dropped so far.
    pub fn completed(&self) -> usize {
        self.inner.completed.load(Ordering::Relaxed)
    }
}

impl Inner {
    fn release(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Completion signal of one job. Dropping it marks the job terminal.
#[derive(Debug)]
pub struct CompletionGuard {
    inner: Arc<Inner>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.inner.completed.fetch_add(1, Ordering::Relaxed);
        self.inner.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn idle_only_after_seal() {
        let jobs = OutstandingJobs::new();
        let guard = jobs.track();
        drop(guard);
        assert_eq!(jobs.pending(), 1);

        let waiting = tokio::time::timeout(Duration::from_millis(50), jobs.wait_idle()).await;
        assert!(waiting.is_err(), "must not be idle before seal");

        jobs.seal();
        jobs.wait_idle().await;
        assert_eq!(jobs.pending(), 0);
    }

    #[tokio::test]
    async fn seal_is_idempotent() {
        let jobs = OutstandingJobs::new();
        let guard = jobs.track();
        jobs.seal();
        jobs.seal();
        assert_eq!(jobs.pending(), 1);
        drop(guard);
        assert_eq!(jobs.pending(), 0);
    }

    #[tokio::test]
    async fn wakes_waiter_when_last_guard_drops() {
        let jobs = OutstandingJobs::new();
        let guards: Vec<_> = (0..8).map(|_| jobs.track()).collect();
        jobs.seal();

        let waiter = {
            let jobs = jobs.clone();
            tokio::spawn(async move { jobs.wait_idle().await })
        };

        for guard in guards {
            tokio::task::spawn_blocking(move || drop(guard)).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert_eq!(jobs.tracked(), 8);
        assert_eq!(jobs.completed(), 8);
    }
}
