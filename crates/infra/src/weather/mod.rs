//! Upstream forecast APIs.
//!
//! [`KeyedHttpClient`] rotates API keys with per-key cooldowns after a rate
//! limit response; [`OpenWeatherApi`] builds the three forecast requests on
//! top of it.

use thiserror::Error;

pub mod api;
pub mod client;

pub use api::{Endpoints, ForecastApi, OpenWeatherApi};
pub use client::KeyedHttpClient;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("no API keys configured")]
    NoKeys,

    #[error("http client error: {0}")]
    Http(String),

    #[error("upstream returned status {status}")]
    Status { status: u16 },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("request failed after {attempts} attempts")]
    Exhausted { attempts: u32 },
}
