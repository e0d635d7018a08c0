//! `healthcast-forecast`: time-bucket aggregation of forecast timeseries.
//!
//! Raw upstream samples (3-hourly weather, hourly air pollution, hourly UV)
//! are parsed into typed samples, bucketed into named daily [`Period`]s and
//! reduced to one row per (city, date, period). Everything here is pure and
//! deterministic: the same input always produces the same rows.

pub mod aggregate;
pub mod interpret;
pub mod period;
pub mod reading;
pub mod reduce;
pub mod sample;

pub use aggregate::{
    AirQualityRow, UvRow, WeatherRow, aggregate_air_quality, aggregate_uv, aggregate_weather,
};
pub use period::{Period, PeriodTable, window_start};
pub use reading::{ClimateDetails, PeriodReading, ReportTime, UvDetails, WeatherDetails};
pub use sample::{AirComponents, AirSample, UvSample, WeatherSample};
