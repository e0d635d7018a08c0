use async_trait::async_trait;
use chrono::FixedOffset;
use tracing::{debug, info, warn};

use healthcast_forecast::sample::{parse_air_pollution, parse_uv_forecast, parse_weather_forecast};
use healthcast_forecast::{PeriodTable, aggregate_air_quality, aggregate_uv, aggregate_weather};

use crate::config::vietnam_offset;
use crate::queue::{CollectDataJob, Job};
use crate::store::ForecastStore;
use crate::weather::ForecastApi;

use super::{JobError, JobHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Weather,
    AirQuality,
    Uv,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::Weather => "weather",
            Stage::AirQuality => "air_quality",
            Stage::Uv => "uv",
        }
    }
}

/// Fetches, condenses and stores one city's forecasts (`queue_data`).
///
/// Cities that already have weather rows are skipped, so duplicate jobs from
/// the same scheduling run are harmless.
pub struct CollectorHandler<A, S> {
    api: A,
    store: S,
    uv_table: PeriodTable,
    local_offset: FixedOffset,
}

impl<A, S> CollectorHandler<A, S>
where
    A: ForecastApi,
    S: ForecastStore,
{
    pub fn new(api: A, store: S) -> Self {
        Self {
            api,
            store,
            uv_table: PeriodTable::hour_ranges(),
            local_offset: vietnam_offset(),
        }
    }

    /// Offset applied to the UV feed's UTC timestamps.
    pub fn with_local_offset(mut self, offset: FixedOffset) -> Self {
        self.local_offset = offset;
        self
    }

    pub fn with_uv_table(mut self, table: PeriodTable) -> Self {
        self.uv_table = table;
        self
    }

    async fn run_stage(&self, stage: Stage, task: &CollectDataJob) -> Result<u64, JobError> {
        let city = task.city_id;
        match stage {
            Stage::Weather => {
                let payload = self.api.weather_forecast(city).await?;
                let rows = aggregate_weather(&parse_weather_forecast(&payload, city));
                if rows.is_empty() {
                    return Ok(0);
                }
                Ok(self.store.insert_weather(&rows).await?)
            }
            Stage::AirQuality => {
                let payload = self.api.air_pollution(task.latitude, task.longitude).await?;
                let rows = aggregate_air_quality(city, &parse_air_pollution(&payload));
                if rows.is_empty() {
                    return Ok(0);
                }
                Ok(self.store.insert_air_quality(&rows).await?)
            }
            Stage::Uv => {
                let payload = self.api.uv_forecast(task.latitude, task.longitude).await?;
                let samples = parse_uv_forecast(&payload, self.local_offset);
                let rows = aggregate_uv(city, &samples, &self.uv_table);
                if rows.is_empty() {
                    return Ok(0);
                }
                Ok(self.store.insert_uv(&rows).await?)
            }
        }
    }
}

impl<A, S> std::fmt::Debug for CollectorHandler<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorHandler")
            .field("local_offset", &self.local_offset)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<A, S> JobHandler for CollectorHandler<A, S>
where
    A: ForecastApi,
    S: ForecastStore,
{
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let task: CollectDataJob = job.payload_as()?;
        let city = task.city_id;

        if self.store.has_weather(city).await? {
            info!(city_id = %city, "weather already stored, skipping city");
            return Ok(());
        }

        let mut failed = 0;
        for stage in [Stage::Weather, Stage::AirQuality, Stage::Uv] {
            match self.run_stage(stage, &task).await {
                Ok(0) => warn!(city_id = %city, stage = stage.as_str(), "no rows to store"),
                Ok(rows) => debug!(city_id = %city, stage = stage.as_str(), rows, "stored"),
                Err(e) => {
                    failed += 1;
                    warn!(city_id = %city, stage = stage.as_str(), error = %e, "stage failed, skipping");
                }
            }
        }

        if failed == 3 {
            return Err(JobError::failed(format!("every collection stage failed for city {city}")));
        }
        info!(city_id = %city, failed_stages = failed, "city collected");
        Ok(())
    }

    async fn probe(&self) -> Result<(), JobError> {
        Ok(self.store.ping().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use chrono::NaiveDate;
    use healthcast_core::{CityId, JobId};
    use healthcast_forecast::Period;
    use serde_json::{Value, json};

    use crate::store::InMemoryForecastStore;
    use crate::weather::FetchError;

    struct FakeApi {
        weather: Result<Value, FetchError>,
        air: Result<Value, FetchError>,
        uv: Result<Value, FetchError>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl FakeApi {
        fn healthy() -> Self {
            let dt = NaiveDate::from_ymd_opt(2025, 9, 1)
                .unwrap()
                .and_hms_opt(6, 0, 0)
                .unwrap()
                .and_utc()
                .timestamp();
            Self {
                weather: Ok(json!({
                    "city": { "id": 5 },
                    "list": [{
                        "dt_txt": "2025-09-01 06:00:00",
                        "main": { "temp": 29.0, "feels_like": 33.0, "humidity": 80.0 },
                        "weather": [{ "main": "Rain", "description": "mưa nhẹ", "icon": "10d" }],
                        "pop": 0.6,
                        "wind": { "speed": 2.5 },
                        "visibility": 9000.0,
                        "clouds": { "all": 90.0 }
                    }]
                })),
                air: Ok(json!({
                    "list": [{ "dt": dt, "main": { "aqi": 2 }, "components": { "pm2_5": 12.0 } }]
                })),
                uv: Ok(json!({
                    "forecast": [{ "time": "2025-08-31T23:00:00Z", "uvi": 1.5 }]
                })),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ForecastApi for FakeApi {
        async fn weather_forecast(&self, _city: CityId) -> Result<Value, FetchError> {
            self.calls.lock().unwrap().push("weather");
            self.weather.clone()
        }

        async fn air_pollution(&self, _lat: f64, _lon: f64) -> Result<Value, FetchError> {
            self.calls.lock().unwrap().push("air");
            self.air.clone()
        }

        async fn uv_forecast(&self, _lat: f64, _lon: f64) -> Result<Value, FetchError> {
            self.calls.lock().unwrap().push("uv");
            self.uv.clone()
        }
    }

    fn collect_job() -> Job {
        let task = CollectDataJob {
            city_id: CityId::new(5),
            longitude: 106.67,
            latitude: 10.75,
        };
        Job::with_id(JobId::from("abc"), "queue_data", &task).unwrap()
    }

    #[tokio::test]
    async fn stores_all_three_stages() {
        let api = Arc::new(FakeApi::healthy());
        let store = Arc::new(InMemoryForecastStore::new());
        let handler = CollectorHandler::new(api.clone(), store.clone());

        handler.handle(&collect_job()).await.unwrap();

        let weather = store.weather_rows();
        assert_eq!(weather.len(), 1);
        assert_eq!(weather[0].period, Period::Morning);
        assert_eq!(store.air_quality_rows()[0].aqi, Some(2));
        // 23:00 UTC is 06:00 in UTC+7.
        let uv = store.uv_rows();
        assert_eq!(uv[0].period, Period::Morning);
        assert_eq!(uv[0].date, NaiveDate::from_ymd_opt(2025, 9, 1).unwrap());
        assert_eq!(api.calls(), vec!["weather", "air", "uv"]);
    }

    #[tokio::test]
    async fn failed_stage_does_not_stop_later_ones() {
        let api = Arc::new(FakeApi {
            air: Err(FetchError::Exhausted { attempts: 5 }),
            ..FakeApi::healthy()
        });
        let store = Arc::new(InMemoryForecastStore::new());
        let handler = CollectorHandler::new(api.clone(), store.clone());

        handler.handle(&collect_job()).await.unwrap();

        assert_eq!(store.weather_rows().len(), 1);
        assert!(store.air_quality_rows().is_empty());
        assert_eq!(store.uv_rows().len(), 1);
    }

    #[tokio::test]
    async fn city_with_weather_is_skipped() {
        let api = Arc::new(FakeApi::healthy());
        let store = Arc::new(InMemoryForecastStore::new());
        let handler = CollectorHandler::new(api.clone(), store.clone());

        handler.handle(&collect_job()).await.unwrap();
        handler.handle(&collect_job()).await.unwrap();

        assert_eq!(store.weather_rows().len(), 1);
        assert_eq!(api.calls().len(), 3);
    }

    #[tokio::test]
    async fn every_stage_failing_fails_the_job() {
        let api = FakeApi {
            weather: Err(FetchError::NoKeys),
            air: Err(FetchError::NoKeys),
            uv: Err(FetchError::Status { status: 503 }),
            ..FakeApi::healthy()
        };
        let handler = CollectorHandler::new(api, InMemoryForecastStore::new());

        assert!(matches!(handler.handle(&collect_job()).await, Err(JobError::Failed(_))));
    }

    #[tokio::test]
    async fn wrong_payload_is_rejected() {
        let job = Job::with_id(JobId::from("x"), "queue_data", &json!({ "city": "five" })).unwrap();
        let handler = CollectorHandler::new(FakeApi::healthy(), InMemoryForecastStore::new());

        assert!(matches!(handler.handle(&job).await, Err(JobError::Queue(_))));
    }
}
