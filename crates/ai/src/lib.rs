//! `healthcast-ai`
//!
//! **Responsibility:** boundary to the language model and document retrieval.
//!
//! Both are opaque capabilities: the pipeline only knows that
//! [`TextGenerator::generate`] turns a prompt into text (or fails, sometimes
//! retryably) and that [`Retriever::retrieve`] returns the top-k snippets of
//! a collection. Prompt assembly lives here so workers stay free of wording.

pub mod capability;
pub mod error;
pub mod prompt;
pub mod testing;

pub use capability::{GenerationRequest, Retriever, TextGenerator};
pub use error::AiError;
