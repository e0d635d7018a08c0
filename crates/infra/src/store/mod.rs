//! Relational storage of aggregated readings and daily suggestions.
//!
//! The schema is owned elsewhere; this module only reads and writes it.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use healthcast_core::{CityId, UserId};
use healthcast_forecast::{AirQualityRow, UvRow, WeatherRow};

use crate::queue::SuggestionJob;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{InMemoryForecastStore, UserProfile};
#[cfg(feature = "postgres")]
pub use postgres::PostgresForecastStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("database error in {operation}: {message}")]
    Database { operation: &'static str, message: String },

    #[error("unexpected row shape: {0}")]
    Decode(String),
}

/// A city some user follows, with its coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityLocation {
    pub city_id: CityId,
    pub longitude: f64,
    pub latitude: f64,
}

/// Advice text of one user and city for one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub user_id: UserId,
    pub city_id: CityId,
    pub date: NaiveDate,
    pub text: String,
}

#[async_trait]
pub trait ForecastStore: Send + Sync {
    /// Whether any weather row exists for `city`.
    async fn has_weather(&self, city: CityId) -> Result<bool, StoreError>;

    async fn insert_weather(&self, rows: &[WeatherRow]) -> Result<u64, StoreError>;

    async fn insert_air_quality(&self, rows: &[AirQualityRow]) -> Result<u64, StoreError>;

    async fn insert_uv(&self, rows: &[UvRow]) -> Result<u64, StoreError>;

    /// Remove every weather, air quality and UV row.
    async fn truncate_readings(&self) -> Result<(), StoreError>;

    async fn truncate_suggestions(&self) -> Result<(), StoreError>;

    /// Each city followed by at least one user, once.
    async fn distinct_user_cities(&self) -> Result<Vec<CityLocation>, StoreError>;

    /// One job per (user, city) with a complete reading for `date`.
    ///
    /// Readings are ordered by period; periods missing any of the three
    /// sources are left out.
    async fn daily_readings(&self, date: NaiveDate) -> Result<Vec<SuggestionJob>, StoreError>;

    /// Insert or replace the suggestion of (user, city).
    async fn upsert_suggestion(&self, suggestion: &Suggestion) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: ForecastStore + ?Sized> ForecastStore for std::sync::Arc<S> {
    async fn has_weather(&self, city: CityId) -> Result<bool, StoreError> {
        (**self).has_weather(city).await
    }

    async fn insert_weather(&self, rows: &[WeatherRow]) -> Result<u64, StoreError> {
        (**self).insert_weather(rows).await
    }

    async fn insert_air_quality(&self, rows: &[AirQualityRow]) -> Result<u64, StoreError> {
        (**self).insert_air_quality(rows).await
    }

    async fn insert_uv(&self, rows: &[UvRow]) -> Result<u64, StoreError> {
        (**self).insert_uv(rows).await
    }

    async fn truncate_readings(&self) -> Result<(), StoreError> {
        (**self).truncate_readings().await
    }

    async fn truncate_suggestions(&self) -> Result<(), StoreError> {
        (**self).truncate_suggestions().await
    }

    async fn distinct_user_cities(&self) -> Result<Vec<CityLocation>, StoreError> {
        (**self).distinct_user_cities().await
    }

    async fn daily_readings(&self, date: NaiveDate) -> Result<Vec<SuggestionJob>, StoreError> {
        (**self).daily_readings(date).await
    }

    async fn upsert_suggestion(&self, suggestion: &Suggestion) -> Result<(), StoreError> {
        (**self).upsert_suggestion(suggestion).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        (**self).ping().await
    }
}
