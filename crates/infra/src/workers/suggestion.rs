use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info};

use healthcast_ai::prompt::{suggestion_query, suggestion_request};
use healthcast_ai::{Retriever, TextGenerator};
use healthcast_core::RetryPolicy;

use crate::pool::{ResourcePool, rotate};
use crate::queue::{Job, SuggestionJob};
use crate::store::{ForecastStore, Suggestion};

use super::{JobError, JobHandler};

/// Documents retrieved from the disease's collection per suggestion.
pub const SUGGESTION_DOCUMENTS: usize = 2;

/// Writes one user's daily advice for one city (`queue_passive_suggestion`).
pub struct SuggestionHandler<G, R, S> {
    generator: G,
    retriever: R,
    keys: ResourcePool<String>,
    retry: RetryPolicy,
    store: S,
}

impl<G, R, S> SuggestionHandler<G, R, S>
where
    G: TextGenerator,
    R: Retriever,
    S: ForecastStore,
{
    pub fn new(generator: G, retriever: R, keys: ResourcePool<String>, store: S) -> Self {
        Self {
            generator,
            retriever,
            keys,
            retry: RetryPolicy::default(),
            store,
        }
    }

    /// Backoff between credentials when generation fails retryably.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl<G, R, S> std::fmt::Debug for SuggestionHandler<G, R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuggestionHandler")
            .field("keys", &self.keys.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<G, R, S> JobHandler for SuggestionHandler<G, R, S>
where
    G: TextGenerator,
    R: Retriever,
    S: ForecastStore,
{
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let task: SuggestionJob = job.payload_as()?;
        let Some(first) = task.daily_data.first() else {
            return Err(JobError::failed("suggestion job carries no readings"));
        };
        let report = first.report_time;
        let date = NaiveDate::from_ymd_opt(report.year, report.month, report.day)
            .ok_or_else(|| JobError::failed(format!("invalid report date {report:?}")))?;

        let query = suggestion_query(&task.daily_data, &task.disease_name, &task.describe_disease);
        let documents = self
            .retriever
            .retrieve(&query, &task.disease_name, SUGGESTION_DOCUMENTS)
            .await?;
        debug!(disease = %task.disease_name, documents = documents.len(), "retrieved documents");

        let request = suggestion_request(&query, documents);
        let generator = &self.generator;
        let request = &request;
        let text = rotate(&self.keys, &self.retry, |key| async move { generator.generate(&key, request).await }).await?;

        self.store
            .upsert_suggestion(&Suggestion {
                user_id: task.user_id,
                city_id: task.city_id,
                date,
                text,
            })
            .await?;

        info!(user_id = %task.user_id, city_id = %task.city_id, %date, "suggestion stored");
        Ok(())
    }

    async fn probe(&self) -> Result<(), JobError> {
        Ok(self.store.ping().await?)
    }
}
