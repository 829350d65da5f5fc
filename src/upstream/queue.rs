//! Serial fetch queue: at most one upstream request in flight, FIFO, with a
//! fixed pause between one request finishing and the next starting.
//!
//! Admission is a fair `tokio::sync::Mutex`, which hands out the lock in the
//! order callers started waiting. There is no background loop to keep alive:
//! the queue is "running" exactly while somebody holds or awaits the lock, so
//! enqueueing from an idle queue and from inside a busy one behave the same.

use crate::utils::fmt_duration;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct SerialQueue {
    inner: Arc<QueueInner>,
}

#[derive(Debug)]
struct QueueInner {
    /// Completion time of the previous task; `None` until the first one finishes.
    last_finished: Mutex<Option<Instant>>,
    delay: Duration,
    /// Tasks admitted but not yet finished, including the one running.
    pending: AtomicUsize,
}

impl SerialQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                last_finished: Mutex::new(None),
                delay,
                pending: AtomicUsize::new(0),
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Number of tasks waiting or running.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Run `task` once every task enqueued before it has finished and the
    /// inter-request delay has elapsed. The task's output, success or error,
    /// goes only to this caller; a failing task does not affect later ones.
    pub async fn enqueue<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let enqueued_at = Instant::now();
        let _pending = PendingGuard::new(&self.inner.pending);

        let mut slot = self.inner.last_finished.lock().await;
        if let Some(previous) = *slot {
            tokio::time::sleep_until(previous + self.inner.delay).await;
        }
        trace!(
            waited = fmt_duration(enqueued_at.elapsed()),
            pending = self.pending(),
            "queue slot granted"
        );

        // Stamped on drop, so a caller cancelled mid-task still spaces the next one.
        let _finished = FinishStamp(&mut slot);
        task.await
    }
}

struct FinishStamp<'a>(&'a mut Option<Instant>);

impl Drop for FinishStamp<'_> {
    fn drop(&mut self) {
        *self.0 = Some(Instant::now());
    }
}

/// Keeps `pending` accurate even when the caller's future is dropped mid-wait.
struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    const DELAY: Duration = Duration::from_millis(1000);

    #[tokio::test(start_paused = true)]
    async fn tasks_never_overlap_and_respect_spacing() {
        let queue = SerialQueue::new(DELAY);
        let spans: Arc<StdMutex<Vec<(usize, Instant, Instant)>>> = Arc::default();

        let mut handles = Vec::new();
        for i in 0..6usize {
            let queue = queue.clone();
            let spans = spans.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(async {
                        let start = Instant::now();
                        tokio::time::sleep(Duration::from_millis(100 + 50 * i as u64)).await;
                        spans.lock().unwrap().push((i, start, Instant::now()));
                    })
                    .await
            }));
            // Fix admission order.
            tokio::task::yield_now().await;
        }
        for h in handles {
            h.await.unwrap();
        }

        let spans = spans.lock().unwrap();
        assert_eq!(spans.len(), 6);
        let order: Vec<usize> = spans.iter().map(|s| s.0).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5], "FIFO completion order");
        for pair in spans.windows(2) {
            let (_, _, prev_end) = pair[0];
            let (_, next_start, _) = pair[1];
            assert!(next_start >= prev_end + DELAY, "gap shorter than delay");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_delivered_only_to_its_caller() {
        let queue = SerialQueue::new(DELAY);
        let failing = queue.enqueue(async { Err::<u32, &str>("boom") });
        let ok = queue.enqueue(async { Ok::<u32, &str>(5) });
        let (failing, ok) = tokio::join!(failing, ok);
        assert_eq!(failing, Err("boom"));
        assert_eq!(ok, Ok(5));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_queue_starts_immediately_then_spaces_next() {
        let queue = SerialQueue::new(DELAY);
        let t0 = Instant::now();
        queue.enqueue(async {}).await;
        assert_eq!(Instant::now(), t0, "first task must not wait");

        let started = queue.enqueue(async { Instant::now() }).await;
        assert!(started >= t0 + DELAY);

        // After a long idle period the spacing is already satisfied.
        tokio::time::advance(Duration::from_secs(10)).await;
        let before = Instant::now();
        let started = queue.enqueue(async { Instant::now() }).await;
        assert!(started.duration_since(before) < Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_from_running_loop_is_admitted() {
        let queue = SerialQueue::new(DELAY);
        let inner_queue = queue.clone();
        let first = queue.enqueue(async move {
            // Admitted while the slot is held; runs after this task completes.
            tokio::spawn(async move { inner_queue.enqueue(async { 2u8 }).await })
        });
        let handle = first.await;
        assert_eq!(handle.await.unwrap(), 2);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_still_spaces_the_next() {
        let queue = SerialQueue::new(DELAY);
        let slow = queue.enqueue(tokio::time::sleep(Duration::from_secs(10)));
        assert!(
            tokio::time::timeout(Duration::from_secs(1), slow)
                .await
                .is_err()
        );
        let cancelled_at = Instant::now();

        let started = queue.enqueue(async { Instant::now() }).await;
        assert!(started >= cancelled_at + DELAY);
        assert_eq!(queue.pending(), 0);
    }
}
