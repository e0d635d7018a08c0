use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use healthcast_ai::TextGenerator;
use healthcast_ai::prompt::chat_request;
use healthcast_core::{RetryPolicy, Role};

use crate::history::HistoryLog;
use crate::pool::{ResourcePool, rotate};
use crate::queue::{ChatJob, Job};
use crate::results::ResultCache;

use super::{JobError, JobHandler};

/// Answer stored when no credential could produce one.
pub const SOFT_FAILURE_ANSWER: &str = "Không thể xử lý câu hỏi này";

/// Answers chat messages (`queue_chatbot`).
///
/// The answer is written once under the job id for the submitter to poll,
/// then appended to the user's history as a bot message. A generation
/// failure still produces a cached answer ([`SOFT_FAILURE_ANSWER`]), so a
/// polling client always gets a reply.
pub struct ChatHandler<G, C, H> {
    generator: G,
    keys: ResourcePool<String>,
    retry: RetryPolicy,
    cache: C,
    history: H,
    result_ttl: Duration,
}

impl<G, C, H> ChatHandler<G, C, H>
where
    G: TextGenerator,
    C: ResultCache,
    H: HistoryLog,
{
    pub fn new(generator: G, keys: ResourcePool<String>, cache: C, history: H, result_ttl: Duration) -> Self {
        Self {
            generator,
            keys,
            retry: RetryPolicy::default(),
            cache,
            history,
            result_ttl,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn answer(&self, task: &ChatJob) -> String {
        let request = chat_request(task.city_id, &task.user_input, &task.history_context);
        let generator = &self.generator;
        let request = &request;

        match rotate(&self.keys, &self.retry, |key| async move { generator.generate(&key, request).await }).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(user_id = %task.user_id, error = %e, "chat generation failed, answering with fallback");
                SOFT_FAILURE_ANSWER.to_string()
            }
        }
    }
}

impl<G, C, H> std::fmt::Debug for ChatHandler<G, C, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHandler")
            .field("keys", &self.keys.len())
            .field("result_ttl", &self.result_ttl)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<G, C, H> JobHandler for ChatHandler<G, C, H>
where
    G: TextGenerator,
    C: ResultCache,
    H: HistoryLog,
{
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let task: ChatJob = job.payload_as()?;
        let answer = self.answer(&task).await;

        if !self.cache.put(job.id.as_str(), &answer, self.result_ttl).await? {
            // Redelivery: the first answer is the one the client reads and
            // the one already in history.
            warn!(job_id = %job.id, "result already cached, keeping the first answer");
            return Ok(());
        }
        self.history.append(task.user_id, Role::Bot, &answer).await?;

        info!(job_id = %job.id, user_id = %task.user_id, "chat answered");
        Ok(())
    }

    async fn probe(&self) -> Result<(), JobError> {
        self.cache.ping().await?;
        self.history.ping().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use healthcast_ai::AiError;
    use healthcast_ai::testing::ScriptedGenerator;
    use healthcast_core::{CityId, JobId, UserId};

    use crate::history::InMemoryHistoryLog;
    use crate::results::InMemoryResultCache;

    const TTL: Duration = Duration::from_secs(1800);

    fn keys(n: usize) -> ResourcePool<String> {
        ResourcePool::new((0..n).map(|i| format!("llm-{i}"))).unwrap()
    }

    fn chat_job(id: &str) -> Job {
        let task = ChatJob {
            city_id: CityId::new(5),
            user_id: UserId::new(7),
            user_input: "Hôm nay có nên chạy bộ không?".to_string(),
            history_context: String::new(),
        };
        Job::with_id(JobId::from(id), "queue_chatbot", &task).unwrap()
    }

    struct Fixture {
        generator: Arc<ScriptedGenerator>,
        cache: Arc<InMemoryResultCache>,
        history: Arc<InMemoryHistoryLog>,
    }

    impl Fixture {
        fn new(generator: ScriptedGenerator) -> Self {
            Self {
                generator: Arc::new(generator),
                cache: Arc::new(InMemoryResultCache::new()),
                history: Arc::new(InMemoryHistoryLog::new()),
            }
        }

        fn handler(
            &self,
            pool: usize,
        ) -> ChatHandler<Arc<ScriptedGenerator>, Arc<InMemoryResultCache>, Arc<InMemoryHistoryLog>> {
            ChatHandler::new(
                self.generator.clone(),
                keys(pool),
                self.cache.clone(),
                self.history.clone(),
                TTL,
            )
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rotates_past_rate_limited_keys() {
        let fx = Fixture::new(
            ScriptedGenerator::new("Nên chạy bộ vào sáng sớm.")
                .then(Err(AiError::RateLimited("quota".into())))
                .then(Err(AiError::Unavailable("503".into()))),
        );

        fx.handler(3).handle(&chat_job("r1")).await.unwrap();

        assert_eq!(fx.generator.keys_used(), vec!["llm-0", "llm-1", "llm-2"]);
        assert_eq!(
            fx.cache.get("r1").await.unwrap().as_deref(),
            Some("Nên chạy bộ vào sáng sớm.")
        );
        let history = fx.history.recent(UserId::new(7), 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Bot);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_caches_the_fallback_answer() {
        let fx = Fixture::new(
            ScriptedGenerator::new("unused")
                .then(Err(AiError::RateLimited("quota".into())))
                .then(Err(AiError::RateLimited("quota".into()))),
        );

        fx.handler(2).handle(&chat_job("r2")).await.unwrap();

        assert_eq!(fx.cache.get("r2").await.unwrap().as_deref(), Some(SOFT_FAILURE_ANSWER));
        assert_eq!(fx.generator.keys_used().len(), 2);
    }

    #[tokio::test]
    async fn terminal_error_does_not_rotate() {
        let fx = Fixture::new(ScriptedGenerator::new("unused").then(Err(AiError::InvalidInput("empty".into()))));

        fx.handler(3).handle(&chat_job("r3")).await.unwrap();

        assert_eq!(fx.generator.keys_used(), vec!["llm-0"]);
        assert_eq!(fx.cache.get("r3").await.unwrap().as_deref(), Some(SOFT_FAILURE_ANSWER));
    }

    #[tokio::test]
    async fn redelivered_job_keeps_the_first_answer() {
        let fx = Fixture::new(ScriptedGenerator::new("second").then(Ok("first".into())));
        let handler = fx.handler(1);

        handler.handle(&chat_job("r4")).await.unwrap();
        handler.handle(&chat_job("r4")).await.unwrap();

        assert_eq!(fx.cache.get("r4").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn redelivered_job_does_not_record_a_second_reply() {
        let fx = Fixture::new(ScriptedGenerator::new("second").then(Ok("first".into())));
        let handler = fx.handler(1);

        handler.handle(&chat_job("r5")).await.unwrap();
        handler.handle(&chat_job("r5")).await.unwrap();

        let history = fx.history.recent(UserId::new(7), 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "first");
        assert_eq!(fx.cache.get("r5").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_credentials_per_retry_policy() {
        let fx = Fixture::new(
            ScriptedGenerator::new("Trời nắng nhẹ.")
                .then(Err(AiError::Unavailable("503".into())))
                .then(Err(AiError::RateLimited("quota".into()))),
        );
        let handler = fx
            .handler(3)
            .with_retry(RetryPolicy::linear(5, Duration::from_secs(2)));
        let started = tokio::time::Instant::now();

        handler.handle(&chat_job("r6")).await.unwrap();

        // 2s after the first failure, 4s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(6));
        assert_eq!(fx.cache.get("r6").await.unwrap().as_deref(), Some("Trời nắng nhẹ."));
    }
}
