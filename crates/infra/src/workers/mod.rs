//! Queue consumers.
//!
//! [`JobWorker`] is the one resilient consume loop; each queue plugs in a
//! [`JobHandler`] with its processing logic:
//!
//! - [`CollectorHandler`]: fetch, aggregate and store one city's forecasts
//! - [`ChatHandler`]: answer a chat message and cache the answer
//! - [`SuggestionHandler`]: write one user's daily advice

use thiserror::Error;

use healthcast_ai::AiError;

use crate::history::HistoryError;
use crate::pool::RotationError;
use crate::queue::QueueError;
use crate::results::CacheError;
use crate::store::StoreError;
use crate::weather::FetchError;

pub mod chat;
pub mod collector;
pub mod job_worker;
pub mod suggestion;

pub use chat::{ChatHandler, SOFT_FAILURE_ANSWER};
pub use collector::CollectorHandler;
pub use job_worker::{JobHandler, JobWorker, WorkerConfig, WorkerHandle, WorkerState, WorkerStats};
pub use suggestion::{SUGGESTION_DOCUMENTS, SuggestionHandler};

/// Why processing one job failed.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error("{0}")]
    Failed(String),
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Keeps the last provider error once every credential has been tried.
impl From<RotationError<AiError>> for JobError {
    fn from(err: RotationError<AiError>) -> Self {
        match err {
            RotationError::Exhausted { last, .. } => JobError::Ai(last),
            RotationError::Terminal(e) => JobError::Ai(e),
        }
    }
}
