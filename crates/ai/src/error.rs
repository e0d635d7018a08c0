use thiserror::Error;

/// Failure of a generation or retrieval call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AiError {
    /// The credential's quota is exhausted; another credential may succeed.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The provider is temporarily unavailable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("generation failed: {0}")]
    Failed(String),
}

impl AiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AiError::RateLimited(_) | AiError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_quota_and_availability_errors_are_retryable() {
        assert!(AiError::RateLimited("429".into()).is_retryable());
        assert!(AiError::Unavailable("503".into()).is_retryable());
        assert!(!AiError::Failed("boom".into()).is_retryable());
        assert!(!AiError::InvalidInput("empty".into()).is_retryable());
    }
}
