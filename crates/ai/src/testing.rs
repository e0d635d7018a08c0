//! Deterministic stand-ins for the model and the retriever.
//!
//! Used by pipeline tests and local runs without a model deployment.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::capability::{GenerationRequest, Retriever, TextGenerator};
use crate::error::AiError;

/// Replays scripted outcomes in order, then falls back to a fixed reply.
#[derive(Debug)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, AiError>>>,
    fallback: String,
    keys_used: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
            keys_used: Mutex::new(Vec::new()),
        }
    }

    /// Queue the outcome of the next call.
    pub fn then(self, outcome: Result<String, AiError>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
        self
    }

    /// Credentials passed to `generate`, in call order.
    pub fn keys_used(&self) -> Vec<String> {
        self.keys_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, api_key: &str, _request: &GenerationRequest) -> Result<String, AiError> {
        self.keys_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(api_key.to_string());
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

/// Returns fixed documents per collection, truncated to `k`.
#[derive(Debug, Default)]
pub struct StaticRetriever {
    collections: HashMap<String, Vec<String>>,
    queries: Mutex<Vec<(String, String, usize)>>,
}

impl StaticRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(
        mut self,
        name: impl Into<String>,
        documents: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.collections
            .insert(name.into(), documents.into_iter().map(Into::into).collect());
        self
    }

    /// `(query, collection, k)` of every call.
    pub fn queries(&self) -> Vec<(String, String, usize)> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, query: &str, collection: &str, k: usize) -> Result<Vec<String>, AiError> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((query.to_string(), collection.to_string(), k));
        let docs = self
            .collections
            .get(collection)
            .ok_or_else(|| AiError::InvalidInput(format!("unknown collection: {collection}")))?;
        Ok(docs.iter().take(k).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_generator_replays_then_falls_back() {
        let generator = ScriptedGenerator::new("done")
            .then(Err(AiError::RateLimited("quota".into())))
            .then(Ok("first".into()));
        let request = GenerationRequest::default();

        assert!(generator.generate("k1", &request).await.is_err());
        assert_eq!(generator.generate("k2", &request).await.unwrap(), "first");
        assert_eq!(generator.generate("k3", &request).await.unwrap(), "done");
        assert_eq!(generator.keys_used(), vec!["k1", "k2", "k3"]);
    }

    #[tokio::test]
    async fn static_retriever_limits_to_k() {
        let retriever = StaticRetriever::new().with_collection("asthma", ["a", "b", "c"]);

        let docs = retriever.retrieve("q", "asthma", 2).await.unwrap();
        assert_eq!(docs, vec!["a".to_string(), "b".to_string()]);
        assert!(retriever.retrieve("q", "flu", 2).await.is_err());
        assert_eq!(retriever.queries().len(), 2);
    }
}
