//! Infrastructure layer: queues, caches, history, workers and their adapters.
//!
//! Every storage concern is a trait with an in-memory implementation used by
//! tests and local runs. Redis adapters sit behind the `redis` feature and
//! the Postgres store behind `postgres`.

pub mod config;
pub mod history;
pub mod pool;
pub mod queue;
#[cfg(feature = "redis")]
pub mod redis_conn;
pub mod results;
pub mod scheduler;
pub mod store;
pub mod submission;
pub mod weather;
pub mod workers;


pub use config::{Config, ConfigError};
pub use pool::{ResourcePool, RotationError, rotate};
pub use submission::{ChatFrontDoor, PollResult, SubmitError, Submissions};
