//! `healthcast-worker`
//!
//! Wires configuration, Redis, Postgres and the upstream APIs into the
//! pipeline's long-running processes. One process runs one [`Mode`].
//!
//! Chat and suggestion workers take the text generation (and retrieval)
//! capability as a parameter, so a deployment embedding a model client calls
//! [`run_chat`] / [`run_suggestion`] with its own implementation.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

use healthcast_ai::{Retriever, TextGenerator};
use healthcast_infra::Config;
use healthcast_infra::history::RedisHistoryLog;
use healthcast_infra::pool::ResourcePool;
use healthcast_infra::queue::{QueueConnector, RedisQueueConnector};
use healthcast_infra::results::RedisResultCache;
use healthcast_infra::scheduler::{DailySchedule, push_collection_jobs, push_suggestion_jobs, run_daily};
use healthcast_infra::store::PostgresForecastStore;
use healthcast_infra::weather::{KeyedHttpClient, OpenWeatherApi};
use healthcast_infra::workers::{
    ChatHandler, CollectorHandler, JobHandler, JobWorker, SuggestionHandler, WorkerConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Collector,
    Chat,
    Suggestion,
    Scheduler,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Collector => "collector",
            Mode::Chat => "chat",
            Mode::Suggestion => "suggestion",
            Mode::Scheduler => "scheduler",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown mode {0:?}, expected collector, chat, suggestion or scheduler")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "collector" => Ok(Mode::Collector),
            "chat" => Ok(Mode::Chat),
            "suggestion" => Ok(Mode::Suggestion),
            "scheduler" => Ok(Mode::Scheduler),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Loop settings for a worker on `queue`, named after this process.
pub fn worker_config(config: &Config, queue: &str) -> WorkerConfig {
    WorkerConfig::new(format!("{}-{queue}", config.worker_name), queue)
        .with_pop_timeout(config.pop_timeout)
        .with_liveness_interval(config.liveness_interval)
}

fn llm_keys(config: &Config) -> anyhow::Result<ResourcePool<String>> {
    ResourcePool::new(config.llm_api_keys.clone())
        .context("no LLM credentials configured (LLM_API_KEYS or API_GEMINI_0..)")
}

/// Run one worker until `shutdown` turns true.
async fn supervise<H>(
    config: WorkerConfig,
    connector: RedisQueueConnector,
    handler: H,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    H: JobHandler + 'static,
{
    info!(worker = %config.name, queue = %config.queue, "starting worker");
    let handle = JobWorker::new(config, connector, handler).spawn();
    let _ = shutdown.wait_for(|stop| *stop).await;
    handle.shutdown().await;
    Ok(())
}

pub async fn run_collector(config: &Config, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let connector = RedisQueueConnector::new(&config.redis.queue)?;
    let store = PostgresForecastStore::connect(config.require_database_url()?)
        .await
        .context("connecting to the forecast database")?;
    let api = OpenWeatherApi::new(KeyedHttpClient::from_config(config)?);
    let handler = CollectorHandler::new(api, store).with_local_offset(config.local_offset);

    supervise(worker_config(config, &config.queues.data), connector, handler, shutdown).await
}

pub async fn run_chat<G>(config: &Config, generator: G, shutdown: watch::Receiver<bool>) -> anyhow::Result<()>
where
    G: TextGenerator + 'static,
{
    let connector = RedisQueueConnector::new(&config.redis.queue)?;
    let cache = RedisResultCache::new(&config.redis.cache)?;
    let history = RedisHistoryLog::with_capacity(&config.redis.history, config.max_history)?;
    let handler = ChatHandler::new(generator, llm_keys(config)?, cache, history, config.result_ttl)
        .with_retry(config.retry.clone());

    supervise(worker_config(config, &config.queues.chatbot), connector, handler, shutdown).await
}

pub async fn run_suggestion<G, R>(
    config: &Config,
    generator: G,
    retriever: R,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    G: TextGenerator + 'static,
    R: Retriever + 'static,
{
    let connector = RedisQueueConnector::new(&config.redis.queue)?;
    let store = PostgresForecastStore::connect(config.require_database_url()?)
        .await
        .context("connecting to the forecast database")?;
    let handler = SuggestionHandler::new(generator, retriever, llm_keys(config)?, store)
        .with_retry(config.retry.clone());

    supervise(worker_config(config, &config.queues.suggestion), connector, handler, shutdown).await
}

/// Push the daily collection (00:01) and suggestion (00:30) jobs.
pub async fn run_scheduler(config: &Config, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let connector = Arc::new(RedisQueueConnector::new(&config.redis.queue)?);
    let store = Arc::new(
        PostgresForecastStore::connect(config.require_database_url()?)
            .await
            .context("connecting to the forecast database")?,
    );
    let collection = DailySchedule::new(0, 1, config.local_offset)?;
    let suggestions = DailySchedule::new(0, 30, config.local_offset)?;

    let collect = {
        let (connector, store) = (connector.clone(), store.clone());
        let queue_name = config.queues.data.clone();
        tokio::spawn(run_daily(collection, shutdown.clone(), move |_at| {
            let (connector, store, queue_name) = (connector.clone(), store.clone(), queue_name.clone());
            async move {
                // Fresh connection per run; the scheduler idles for a day in between.
                let queue = connector.connect().await?;
                push_collection_jobs(&store, &queue, &queue_name).await
            }
        }))
    };

    let suggest = {
        let queue_name = config.queues.suggestion.clone();
        tokio::spawn(run_daily(suggestions, shutdown, move |at| {
            let (connector, store, queue_name) = (connector.clone(), store.clone(), queue_name.clone());
            async move {
                let queue = connector.connect().await?;
                push_suggestion_jobs(&store, &queue, &queue_name, suggestions.local_date(at)).await
            }
        }))
    };

    info!("scheduler started");
    let (collect, suggest) = tokio::join!(collect, suggest);
    collect.context("collection schedule task")?;
    suggest.context("suggestion schedule task")?;
    Ok(())
}
