//! `healthcast-core`: shared primitives for the advisory pipeline.
//!
//! This crate contains **pure** building blocks (no I/O): identifiers,
//! chat roles, the domain error and the retry/backoff policy shared by every
//! external call site.

pub mod error;
pub mod id;
pub mod message;
pub mod retry;

pub use error::{DomainError, DomainResult};
pub use id::{CityId, JobId, RequestId, UserId};
pub use message::{HistoryEntry, Role};
pub use retry::{BackoffStrategy, RetryPolicy};
