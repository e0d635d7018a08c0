//! One period's joined readings, as carried by suggestion jobs.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::aggregate::{AirQualityRow, UvRow, WeatherRow};
use crate::period::Period;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTime {
    #[serde(rename = "report_day")]
    pub day: u32,
    #[serde(rename = "report_month")]
    pub month: u32,
    #[serde(rename = "report_year")]
    pub year: i32,
}

impl From<NaiveDate> for ReportTime {
    fn from(date: NaiveDate) -> Self {
        Self {
            day: date.day(),
            month: date.month(),
            year: date.year(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherDetails {
    pub temp: f64,
    pub feels_like: f64,
    pub humidity: f64,
    pub pop: f64,
    pub wind_speed: f64,
    pub wind_gust: f64,
    pub visibility: f64,
    pub clouds_all: f64,
    pub weather_main: String,
    pub weather_description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClimateDetails {
    pub aqi: i64,
    pub co: f64,
    pub no: f64,
    pub no2: f64,
    pub o3: f64,
    pub so2: f64,
    pub pm2_5: f64,
    pub pm10: f64,
    pub nh3: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UvDetails {
    pub uvi: f64,
}

/// Weather, air quality and UV for one period of one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodReading {
    pub period: Period,
    pub report_time: ReportTime,
    pub weather_details: WeatherDetails,
    pub climate_details: ClimateDetails,
    pub uvi_details: UvDetails,
}

impl PeriodReading {
    /// Join the three rows of one (city, date, period).
    ///
    /// Returns `None` unless all three rows describe the same bucket. Missing
    /// measurements default to zero.
    pub fn join(weather: &WeatherRow, air: &AirQualityRow, uv: &UvRow) -> Option<Self> {
        let same_bucket = weather.city_id == air.city_id
            && weather.city_id == uv.city_id
            && weather.date == air.date
            && weather.date == uv.date
            && weather.period == air.period
            && weather.period == uv.period;
        if !same_bucket {
            return None;
        }

        let c = &air.components;
        Some(Self {
            period: weather.period,
            report_time: weather.date.into(),
            weather_details: WeatherDetails {
                temp: weather.temp.unwrap_or_default(),
                feels_like: weather.feels_like.unwrap_or_default(),
                humidity: weather.humidity.unwrap_or_default(),
                pop: weather.pop.unwrap_or_default(),
                wind_speed: weather.wind_speed.unwrap_or_default(),
                wind_gust: weather.wind_gust.unwrap_or_default(),
                visibility: weather.visibility.unwrap_or_default(),
                clouds_all: weather.clouds_all.unwrap_or_default(),
                weather_main: weather.weather_main.clone().unwrap_or_default(),
                weather_description: weather.weather_description.clone().unwrap_or_default(),
            },
            climate_details: ClimateDetails {
                aqi: air.aqi.unwrap_or_default(),
                co: c.co.unwrap_or_default(),
                no: c.no.unwrap_or_default(),
                no2: c.no2.unwrap_or_default(),
                o3: c.o3.unwrap_or_default(),
                so2: c.so2.unwrap_or_default(),
                pm2_5: c.pm2_5.unwrap_or_default(),
                pm10: c.pm10.unwrap_or_default(),
                nh3: c.nh3.unwrap_or_default(),
            },
            uvi_details: UvDetails { uvi: uv.uvi },
        })
    }
}
