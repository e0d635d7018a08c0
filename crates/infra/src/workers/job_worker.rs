//! Resilient consume loop shared by every queue.
//!
//! ```text
//! Disconnected -> Connecting -> Idle -> Processing -> Idle ...
//!                                 \-> LivenessCheck -> Idle
//! ```
//!
//! - Connecting opens a queue handle and requeues this consumer's
//!   unacknowledged jobs; a failure waits `reconnect_delay` and retries.
//! - Idle runs a liveness check once `liveness_interval` has passed since the
//!   last one, otherwise blocks on the queue for up to `pop_timeout`.
//! - Processing hands the job to the [`JobHandler`]; success acknowledges it,
//!   failure dead-letters it. A job failure never stops the loop.
//! - A dropped connection, or a failed probe, returns to Disconnected.
//!
//! Shutdown is observed while connecting, polling or waiting; a job already
//! being processed runs to completion first.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::queue::{Delivery, Job, JobQueue, QueueConnector, QueueError};

use super::JobError;

/// Processing logic for one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;

    /// Health of the handler's own dependencies, run on every liveness check.
    async fn probe(&self) -> Result<(), JobError> {
        Ok(())
    }
}

#[async_trait]
impl<H: JobHandler + ?Sized> JobHandler for Arc<H> {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        (**self).handle(job).await
    }

    async fn probe(&self) -> Result<(), JobError> {
        (**self).probe().await
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name for logging.
    pub name: String,
    pub queue: String,
    /// Owner of the processing list; must be stable across restarts.
    pub consumer: String,
    pub pop_timeout: Duration,
    pub liveness_interval: Duration,
    pub reconnect_delay: Duration,
    pub interrupt_delay: Duration,
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>, queue: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            consumer: name.clone(),
            name,
            queue: queue.into(),
            pop_timeout: Duration::from_secs(5),
            liveness_interval: Duration::from_secs(1800),
            reconnect_delay: Duration::from_secs(1),
            interrupt_delay: Duration::from_millis(500),
        }
    }

    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_interrupt_delay(mut self, delay: Duration) -> Self {
        self.interrupt_delay = delay;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Disconnected,
    Connecting,
    Idle,
    Processing,
    LivenessCheck,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dead_lettered: u64,
    /// Successful connects after the first one.
    pub reconnects: u64,
    pub liveness_checks: u64,
}

/// Handle to observe and stop a running worker.
///
/// Dropping the handle also stops the worker at its next wait.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
    state: watch::Receiver<WorkerState>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the loop to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            error!(error = %err, "worker task ended abnormally");
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Follow state transitions.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }
}

pub struct JobWorker<C, H> {
    config: WorkerConfig,
    connector: C,
    handler: H,
}

impl<C, H> JobWorker<C, H>
where
    C: QueueConnector + 'static,
    H: JobHandler + 'static,
{
    pub fn new(config: WorkerConfig, connector: C, handler: H) -> Self {
        Self {
            config,
            connector,
            handler,
        }
    }

    /// Run the loop on the current tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(WorkerState::Disconnected);
        let stats = Arc::new(Mutex::new(WorkerStats::default()));

        let span = info_span!("worker", worker = %self.config.name, queue = %self.config.queue);
        let run = Run {
            worker: self,
            shutdown: shutdown_rx,
            state: state_tx,
            stats: stats.clone(),
        };
        let join = tokio::spawn(run.run().instrument(span));

        WorkerHandle {
            shutdown: shutdown_tx,
            join,
            stats,
            state: state_rx,
        }
    }
}

/// Loop state owned by the spawned task.
struct Run<C, H> {
    worker: JobWorker<C, H>,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<WorkerState>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl<C, H> Run<C, H>
where
    C: QueueConnector + 'static,
    H: JobHandler + 'static,
{
    async fn run(mut self) {
        let mut queue: Option<C::Queue> = None;
        let mut connected_once = false;
        let mut last_check = Instant::now();

        info!("worker started");

        loop {
            if self.stopping() {
                break;
            }

            if queue.is_none() {
                self.set_state(WorkerState::Connecting);
                match self.connect().await {
                    Some(Ok(q)) => {
                        if connected_once {
                            self.bump(|s| s.reconnects += 1);
                        }
                        connected_once = true;
                        last_check = Instant::now();
                        queue = Some(q);
                        self.set_state(WorkerState::Idle);
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "queue connect failed");
                        self.set_state(WorkerState::Disconnected);
                        if self.pause(self.worker.config.reconnect_delay).await {
                            break;
                        }
                    }
                    None => break,
                }
                continue;
            }
            let Some(q) = queue.as_ref() else {
                continue;
            };

            if last_check.elapsed() >= self.worker.config.liveness_interval {
                self.set_state(WorkerState::LivenessCheck);
                self.bump(|s| s.liveness_checks += 1);
                let healthy = self.check_liveness(q).await;
                last_check = Instant::now();
                if !healthy {
                    queue = None;
                    self.set_state(WorkerState::Disconnected);
                    if self.pause(self.worker.config.reconnect_delay).await {
                        break;
                    }
                    continue;
                }
                self.set_state(WorkerState::Idle);
            }

            let config = &self.worker.config;
            let popped = tokio::select! {
                biased;
                _ = self.shutdown.wait_for(|stop| *stop) => break,
                popped = q.dequeue(&config.queue, &config.consumer, config.pop_timeout) => popped,
            };

            let failure = match popped {
                Ok(None) => continue,
                Ok(Some(delivery)) => {
                    self.set_state(WorkerState::Processing);
                    let settled = self.process(q, delivery).await;
                    self.set_state(WorkerState::Idle);
                    match settled {
                        Ok(()) => continue,
                        Err(err) => err,
                    }
                }
                Err(err) => err,
            };

            let delay = match failure {
                QueueError::Interrupted(msg) => {
                    debug!(reason = %msg, "blocking pop interrupted, polling again");
                    self.worker.config.interrupt_delay
                }
                QueueError::Connection(msg) => {
                    warn!(error = %msg, "queue connection lost");
                    queue = None;
                    self.set_state(WorkerState::Disconnected);
                    self.worker.config.reconnect_delay
                }
                other => {
                    error!(error = %other, "queue command failed");
                    self.worker.config.reconnect_delay
                }
            };
            if self.pause(delay).await {
                break;
            }
        }

        self.set_state(WorkerState::Disconnected);
        info!("worker stopped");
    }

    /// `None` when shutdown was requested first.
    async fn connect(&mut self) -> Option<Result<C::Queue, QueueError>> {
        let config = &self.worker.config;
        let connected = tokio::select! {
            biased;
            _ = self.shutdown.wait_for(|stop| *stop) => return None,
            connected = self.worker.connector.connect() => connected,
        };

        let queue = match connected {
            Ok(queue) => queue,
            Err(err) => return Some(Err(err)),
        };
        match queue.recover(&config.queue, &config.consumer).await {
            Ok(0) => {}
            Ok(moved) => info!(moved, "requeued jobs left over from a previous run"),
            Err(err) => return Some(Err(err)),
        }
        info!("connected to queue");
        Some(Ok(queue))
    }

    async fn check_liveness(&self, queue: &C::Queue) -> bool {
        if let Err(err) = queue.ping().await {
            warn!(error = %err, "queue liveness probe failed");
            return false;
        }
        if let Err(err) = self.worker.handler.probe().await {
            warn!(error = %err, "dependency liveness probe failed");
            return false;
        }
        debug!("liveness check passed");
        true
    }

    /// Run one job and settle it on the queue. Errors are from settling only.
    async fn process(&self, queue: &C::Queue, delivery: Delivery) -> Result<(), QueueError> {
        self.bump(|s| s.jobs_processed += 1);

        let outcome = match delivery.job() {
            Ok(job) => {
                let span = info_span!("job", job_id = %job.id);
                self.worker
                    .handler
                    .handle(&job)
                    .instrument(span)
                    .await
                    .map_err(|err| err.to_string())
            }
            Err(err) => Err(format!("malformed job: {err}")),
        };

        match outcome {
            Ok(()) => {
                self.bump(|s| s.jobs_succeeded += 1);
                queue.ack(&delivery).await
            }
            Err(reason) => {
                self.bump(|s| s.jobs_failed += 1);
                error!(error = %reason, "job failed, dead-lettering");
                queue.dead_letter(&delivery, &reason).await?;
                self.bump(|s| s.jobs_dead_lettered += 1);
                Ok(())
            }
        }
    }

    /// Sleep unless shutdown comes first; `true` means stop.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.wait_for(|stop| *stop) => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    fn bump(&self, update: impl FnOnce(&mut WorkerStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut *stats);
    }
}
