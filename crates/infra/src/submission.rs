//! Front door of the pipeline: submit a job, get an id back, poll for the result.
//!
//! A submitted job is never dropped silently: `submit` either returns the
//! request id or the queue error. Polling reads the result cache under the
//! same id; absence simply means the worker has not answered yet (or the
//! answer has expired).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use healthcast_ai::TextGenerator;
use healthcast_ai::prompt::summary_request;
use healthcast_core::{CityId, RequestId, RetryPolicy, Role, UserId};

use crate::history::{HistoryError, HistoryLog};
use crate::pool::{ResourcePool, rotate};
use crate::queue::{ChatJob, CollectDataJob, Job, JobQueue, QueueError};
use crate::results::{CacheError, ResultCache};
use crate::store::{CityLocation, ForecastStore, StoreError};

/// What a polling caller sees for a request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollResult {
    Processing,
    Completed { data: String },
}

impl PollResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, PollResult::Completed { .. })
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Enqueue side of the queue plus read side of the result cache.
#[derive(Debug, Clone)]
pub struct Submissions<Q, C> {
    queue: Q,
    cache: C,
}

impl<Q, C> Submissions<Q, C>
where
    Q: JobQueue,
    C: ResultCache,
{
    pub fn new(queue: Q, cache: C) -> Self {
        Self { queue, cache }
    }

    /// Enqueue `payload` on `queue` under a fresh request id.
    pub async fn submit<P: Serialize + Sync>(&self, queue: &str, payload: &P) -> Result<RequestId, QueueError> {
        let job = Job::new(queue, payload)?;
        self.queue.enqueue(queue, &job).await?;
        debug!(job_id = %job.id, queue, "job submitted");
        Ok(job.id)
    }

    pub async fn poll_result(&self, id: &RequestId) -> Result<PollResult, CacheError> {
        Ok(match self.cache.get(id.as_str()).await? {
            Some(data) => PollResult::Completed { data },
            None => PollResult::Processing,
        })
    }

    /// Request forecasts for a newly followed city unless it already has them.
    ///
    /// Returns `None` when the store already holds weather for the city.
    pub async fn request_city_collection<S: ForecastStore>(
        &self,
        store: &S,
        queue: &str,
        location: &CityLocation,
    ) -> Result<Option<RequestId>, SubmitError> {
        if store.has_weather(location.city_id).await? {
            debug!(city_id = %location.city_id, "city already collected");
            return Ok(None);
        }
        let task = CollectDataJob {
            city_id: location.city_id,
            longitude: location.longitude,
            latitude: location.latitude,
        };
        Ok(Some(self.submit(queue, &task).await?))
    }
}

/// Chat entry point: condenses recent history into the job so the worker
/// does not need to read it.
pub struct ChatFrontDoor<Q, C, H, G> {
    submissions: Submissions<Q, C>,
    history: H,
    generator: G,
    keys: ResourcePool<String>,
    retry: RetryPolicy,
    queue: String,
    context_messages: usize,
}

impl<Q, C, H, G> ChatFrontDoor<Q, C, H, G>
where
    Q: JobQueue,
    C: ResultCache,
    H: HistoryLog,
    G: TextGenerator,
{
    pub fn new(
        submissions: Submissions<Q, C>,
        history: H,
        generator: G,
        keys: ResourcePool<String>,
        queue: impl Into<String>,
        context_messages: usize,
    ) -> Self {
        Self {
            submissions,
            history,
            generator,
            keys,
            retry: RetryPolicy::default(),
            queue: queue.into(),
            context_messages,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn submissions(&self) -> &Submissions<Q, C> {
        &self.submissions
    }

    /// Summary of the last few messages, empty for a new user or when the
    /// model is unavailable.
    async fn history_summary(&self, user: UserId) -> Result<String, HistoryError> {
        let recent = self.history.recent(user, self.context_messages).await?;
        let Some(request) = summary_request(&recent) else {
            return Ok(String::new());
        };

        let generator = &self.generator;
        let request = &request;
        match rotate(&self.keys, &self.retry, |key| async move { generator.generate(&key, request).await }).await {
            Ok(summary) => Ok(summary.trim().to_string()),
            Err(e) => {
                warn!(user_id = %user, error = %e, "history summary failed, submitting without context");
                Ok(String::new())
            }
        }
    }

    /// Record the user's message and queue it for an answer.
    pub async fn send(&self, user: UserId, city: CityId, message: &str) -> Result<RequestId, SubmitError> {
        let history_context = self.history_summary(user).await?;
        self.history.append(user, Role::User, message).await?;

        let task = ChatJob {
            city_id: city,
            user_id: user,
            user_input: message.to_string(),
            history_context,
        };
        let id = self.submissions.submit(&self.queue, &task).await?;
        info!(job_id = %id, user_id = %user, "chat message queued");
        Ok(id)
    }

    pub async fn poll_result(&self, id: &RequestId) -> Result<PollResult, CacheError> {
        self.submissions.poll_result(id).await
    }
}

impl<Q, C, H, G> std::fmt::Debug for ChatFrontDoor<Q, C, H, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatFrontDoor")
            .field("queue", &self.queue)
            .field("context_messages", &self.context_messages)
            .finish_non_exhaustive()
    }
}
