use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AiError;

/// Everything a generation call needs besides the credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Instructions for the model.
    pub system: String,
    /// The question or task.
    pub prompt: String,
    /// Supporting material (conversation summary, retrieved documents).
    pub context: Vec<String>,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl IntoIterator<Item = String>) -> Self {
        self.context.extend(context);
        self
    }
}

/// Text generation behind a rotating credential.
///
/// Implementations must report quota exhaustion as [`AiError::RateLimited`]
/// and transient outages as [`AiError::Unavailable`] so callers can rotate.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, api_key: &str, request: &GenerationRequest) -> Result<String, AiError>;
}

/// Top-k similarity search over a named document collection.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, collection: &str, k: usize) -> Result<Vec<String>, AiError>;
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for std::sync::Arc<T> {
    async fn generate(&self, api_key: &str, request: &GenerationRequest) -> Result<String, AiError> {
        (**self).generate(api_key, request).await
    }
}

#[async_trait]
impl<T: Retriever + ?Sized> Retriever for std::sync::Arc<T> {
    async fn retrieve(&self, query: &str, collection: &str, k: usize) -> Result<Vec<String>, AiError> {
        (**self).retrieve(query, collection, k).await
    }
}
