use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{
    DeadLetterEntry, Delivery, Job, JobQueue, QueueConnector, QueueError, processing_key,
};

#[derive(Debug, Default)]
struct QueueState {
    /// Oldest job at the front.
    ready: HashMap<String, VecDeque<String>>,
    /// Keyed by [`processing_key`], in dequeue order.
    processing: HashMap<String, Vec<String>>,
    dead: HashMap<String, Vec<DeadLetterEntry>>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
    offline: AtomicBool,
    interrupts: AtomicUsize,
}

/// In-process queue with the same delivery model as the Redis backend.
///
/// Clones share state. `set_offline(true)` makes every call fail with
/// [`QueueError::Connection`], which lets tests drive reconnects;
/// `interrupt_next_pops(n)` makes the next `n` dequeues fail with
/// [`QueueError::Interrupted`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobQueue {
    inner: Arc<Inner>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the queue service.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
        // Blocked consumers observe the change right away.
        self.inner.notify.notify_waiters();
    }

    /// Simulate the server breaking the next `count` blocking pops.
    pub fn interrupt_next_pops(&self, count: usize) {
        self.inner.interrupts.store(count, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    fn check_interrupted(&self) -> Result<(), QueueError> {
        let interrupted = self
            .inner
            .interrupts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if interrupted {
            return Err(QueueError::Interrupted("UNBLOCKED client unblocked".to_string()));
        }
        Ok(())
    }

    fn check_online(&self) -> Result<(), QueueError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(QueueError::Connection("queue service unreachable".to_string()));
        }
        Ok(())
    }

    /// Jobs waiting in `queue`.
    pub async fn pending(&self, queue: &str) -> usize {
        let state = self.inner.state.lock().await;
        state.ready.get(queue).map_or(0, VecDeque::len)
    }

    /// Jobs dequeued by `consumer` and not yet acknowledged.
    pub async fn in_flight(&self, queue: &str, consumer: &str) -> usize {
        let state = self.inner.state.lock().await;
        state
            .processing
            .get(&processing_key(queue, consumer))
            .map_or(0, Vec::len)
    }

    /// Push an already serialized job, as a foreign producer would.
    pub async fn enqueue_raw(&self, queue: &str, raw: &str) -> Result<(), QueueError> {
        self.check_online()?;
        {
            let mut state = self.inner.state.lock().await;
            state
                .ready
                .entry(queue.to_string())
                .or_default()
                .push_back(raw.to_string());
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    pub async fn dead_letters(&self, queue: &str) -> Vec<DeadLetterEntry> {
        let state = self.inner.state.lock().await;
        state.dead.get(queue).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, queue: &str, job: &Job) -> Result<(), QueueError> {
        self.enqueue_raw(queue, &job.to_json()?).await
    }

    async fn dequeue(
        &self,
        queue: &str,
        consumer: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register for wake-ups before looking, so an enqueue between the
            // check and the wait is not missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check_online()?;
            self.check_interrupted()?;
            {
                let mut state = self.inner.state.lock().await;
                if let Some(raw) = state.ready.get_mut(queue).and_then(VecDeque::pop_front) {
                    state
                        .processing
                        .entry(processing_key(queue, consumer))
                        .or_default()
                        .push(raw.clone());
                    return Ok(Some(Delivery {
                        queue: queue.to_string(),
                        consumer: consumer.to_string(),
                        raw,
                    }));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.check_online()?;
        let mut state = self.inner.state.lock().await;
        let key = processing_key(&delivery.queue, &delivery.consumer);
        if let Some(list) = state.processing.get_mut(&key) {
            if let Some(pos) = list.iter().position(|raw| *raw == delivery.raw) {
                list.remove(pos);
            }
        }
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        self.check_online()?;
        let mut state = self.inner.state.lock().await;
        let key = processing_key(&delivery.queue, &delivery.consumer);
        if let Some(list) = state.processing.get_mut(&key) {
            if let Some(pos) = list.iter().position(|raw| *raw == delivery.raw) {
                list.remove(pos);
            }
        }
        state
            .dead
            .entry(delivery.queue.clone())
            .or_default()
            .push(DeadLetterEntry::new(
                delivery.raw.clone(),
                reason,
                delivery.consumer.clone(),
            ));
        Ok(())
    }

    async fn recover(&self, queue: &str, consumer: &str) -> Result<usize, QueueError> {
        self.check_online()?;
        let moved = {
            let mut state = self.inner.state.lock().await;
            let stranded = state
                .processing
                .remove(&processing_key(queue, consumer))
                .unwrap_or_default();
            let ready = state.ready.entry(queue.to_string()).or_default();
            // Newest first onto the front leaves the oldest next in line.
            for raw in stranded.iter().rev() {
                ready.push_front(raw.clone());
            }
            stranded.len()
        };
        if moved > 0 {
            self.inner.notify.notify_waiters();
        }
        Ok(moved)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.check_online()
    }
}

#[async_trait]
impl QueueConnector for InMemoryJobQueue {
    type Queue = InMemoryJobQueue;

    async fn connect(&self) -> Result<Self::Queue, QueueError> {
        self.check_online()?;
        Ok(self.clone())
    }
}
