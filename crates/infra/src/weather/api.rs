use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use healthcast_core::CityId;

use super::{FetchError, KeyedHttpClient};

/// Raw forecast payloads for one city.
#[async_trait]
pub trait ForecastApi: Send + Sync {
    /// 5-day forecast in 3-hour steps.
    async fn weather_forecast(&self, city: CityId) -> Result<Value, FetchError>;

    /// Hourly air pollution forecast.
    async fn air_pollution(&self, latitude: f64, longitude: f64) -> Result<Value, FetchError>;

    /// Hourly UV index forecast.
    async fn uv_forecast(&self, latitude: f64, longitude: f64) -> Result<Value, FetchError>;
}

#[async_trait]
impl<T: ForecastApi + ?Sized> ForecastApi for std::sync::Arc<T> {
    async fn weather_forecast(&self, city: CityId) -> Result<Value, FetchError> {
        (**self).weather_forecast(city).await
    }

    async fn air_pollution(&self, latitude: f64, longitude: f64) -> Result<Value, FetchError> {
        (**self).air_pollution(latitude, longitude).await
    }

    async fn uv_forecast(&self, latitude: f64, longitude: f64) -> Result<Value, FetchError> {
        (**self).uv_forecast(latitude, longitude).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub forecast: String,
    pub air_pollution: String,
    pub uv: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            forecast: "https://api.openweathermap.org/data/2.5/forecast".to_string(),
            air_pollution: "https://api.openweathermap.org/data/2.5/air_pollution/forecast"
                .to_string(),
            uv: "https://currentuvindex.com/api/v1/uvi".to_string(),
        }
    }
}

impl Endpoints {
    /// All three endpoints under one base URL (`/forecast`, `/air_pollution/forecast`, `/uvi`).
    pub fn under(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            forecast: format!("{base}/forecast"),
            air_pollution: format!("{base}/air_pollution/forecast"),
            uv: format!("{base}/uvi"),
        }
    }
}

#[derive(Debug)]
pub struct OpenWeatherApi {
    client: KeyedHttpClient,
    endpoints: Endpoints,
}

impl OpenWeatherApi {
    pub fn new(client: KeyedHttpClient) -> Self {
        Self::with_endpoints(client, Endpoints::default())
    }

    pub fn with_endpoints(client: KeyedHttpClient, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }
}

#[async_trait]
impl ForecastApi for OpenWeatherApi {
    #[instrument(skip(self), err)]
    async fn weather_forecast(&self, city: CityId) -> Result<Value, FetchError> {
        let params = [
            ("id", city.to_string()),
            ("units", "metric".to_string()),
            ("lang", "vi".to_string()),
        ];
        self.client.get_json(&self.endpoints.forecast, &params).await
    }

    #[instrument(skip(self), err)]
    async fn air_pollution(&self, latitude: f64, longitude: f64) -> Result<Value, FetchError> {
        let params = [("lat", latitude.to_string()), ("lon", longitude.to_string())];
        self.client.get_json(&self.endpoints.air_pollution, &params).await
    }

    #[instrument(skip(self), err)]
    async fn uv_forecast(&self, latitude: f64, longitude: f64) -> Result<Value, FetchError> {
        let params = [
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
        ];
        self.client.get_json_unkeyed(&self.endpoints.uv, &params).await
    }
}
