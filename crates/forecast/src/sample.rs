//! Typed samples parsed from upstream forecast payloads.
//!
//! Parsing is lenient: an item that does not match the expected shape is
//! skipped, and a payload without a usable list yields no samples. Missing
//! data is "no data for this unit of work", never an error.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use healthcast_core::CityId;

const FORECAST_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const UV_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One 3-hourly weather forecast point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSample {
    pub city_id: CityId,
    pub at: NaiveDateTime,
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub humidity: Option<f64>,
    pub pop: Option<f64>,
    pub rain_3h: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    pub visibility: Option<f64>,
    pub clouds_all: Option<f64>,
    pub weather_main: Option<String>,
    pub weather_description: Option<String>,
    pub weather_icon: Option<String>,
}

impl WeatherSample {
    pub fn hour(&self) -> u32 {
        self.at.hour()
    }
}

/// Pollutant concentrations in μg/m3.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AirComponents {
    pub co: Option<f64>,
    pub no: Option<f64>,
    pub no2: Option<f64>,
    pub o3: Option<f64>,
    pub so2: Option<f64>,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub nh3: Option<f64>,
}

/// One hourly air pollution forecast point (UTC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirSample {
    pub at: NaiveDateTime,
    pub aqi: Option<i64>,
    pub components: AirComponents,
}

/// One hourly UV forecast point, already shifted to local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UvSample {
    pub at: NaiveDateTime,
    pub uvi: f64,
}

#[derive(Deserialize)]
struct ListPayload {
    #[serde(default)]
    list: Vec<Value>,
    #[serde(default)]
    city: Option<CityInfo>,
}

#[derive(Deserialize)]
struct CityInfo {
    id: Option<i64>,
}

#[derive(Deserialize)]
struct ForecastItem {
    dt_txt: String,
    #[serde(default)]
    main: MainBlock,
    #[serde(default)]
    weather: Vec<Condition>,
    pop: Option<f64>,
    rain: Option<RainBlock>,
    #[serde(default)]
    wind: WindBlock,
    visibility: Option<f64>,
    #[serde(default)]
    clouds: CloudBlock,
}

#[derive(Default, Deserialize)]
struct MainBlock {
    temp: Option<f64>,
    feels_like: Option<f64>,
    humidity: Option<f64>,
}

#[derive(Deserialize)]
struct Condition {
    main: Option<String>,
    description: Option<String>,
    icon: Option<String>,
}

#[derive(Deserialize)]
struct RainBlock {
    #[serde(rename = "3h")]
    three_hours: Option<f64>,
}

#[derive(Default, Deserialize)]
struct WindBlock {
    speed: Option<f64>,
    gust: Option<f64>,
}

#[derive(Default, Deserialize)]
struct CloudBlock {
    all: Option<f64>,
}

#[derive(Deserialize)]
struct PollutionItem {
    dt: i64,
    #[serde(default)]
    main: AqiBlock,
    #[serde(default)]
    components: AirComponents,
}

#[derive(Default, Deserialize)]
struct AqiBlock {
    aqi: Option<i64>,
}

#[derive(Deserialize)]
struct UvPayload {
    #[serde(default)]
    forecast: Vec<Value>,
}

#[derive(Deserialize)]
struct UvItem {
    time: String,
    uvi: f64,
}

fn list_items(payload: &Value) -> Option<ListPayload> {
    ListPayload::deserialize(payload).ok()
}

/// Parse an OpenWeather 5-day/3-hour forecast.
///
/// The city id comes from the payload, falling back to `fallback_city`.
pub fn parse_weather_forecast(payload: &Value, fallback_city: CityId) -> Vec<WeatherSample> {
    let Some(parsed) = list_items(payload) else {
        return Vec::new();
    };
    let city_id = parsed
        .city
        .and_then(|c| c.id)
        .map(CityId::new)
        .unwrap_or(fallback_city);

    parsed
        .list
        .into_iter()
        .filter_map(|raw| {
            let item = match ForecastItem::deserialize(&raw) {
                Ok(item) => item,
                Err(e) => {
                    debug!(error = %e, "skipping malformed forecast item");
                    return None;
                }
            };
            let at = NaiveDateTime::parse_from_str(&item.dt_txt, FORECAST_TIME_FORMAT).ok()?;
            let condition = item.weather.into_iter().next();
            let (weather_main, weather_description, weather_icon) = match condition {
                Some(c) => (c.main, c.description, c.icon),
                None => (None, None, None),
            };

            Some(WeatherSample {
                city_id,
                at,
                temp: item.main.temp,
                feels_like: item.main.feels_like,
                humidity: item.main.humidity,
                pop: item.pop,
                rain_3h: Some(item.rain.and_then(|r| r.three_hours).unwrap_or(0.0)),
                wind_speed: item.wind.speed,
                wind_gust: item.wind.gust,
                visibility: item.visibility,
                clouds_all: item.clouds.all,
                weather_main,
                weather_description,
                weather_icon,
            })
        })
        .collect()
}

/// Parse an OpenWeather air pollution forecast (unix timestamps, UTC).
pub fn parse_air_pollution(payload: &Value) -> Vec<AirSample> {
    let Some(parsed) = list_items(payload) else {
        return Vec::new();
    };

    parsed
        .list
        .into_iter()
        .filter_map(|raw| {
            let item = PollutionItem::deserialize(&raw).ok()?;
            let at = DateTime::from_timestamp(item.dt, 0)?.naive_utc();
            Some(AirSample {
                at,
                aqi: item.main.aqi,
                components: item.components,
            })
        })
        .collect()
}

/// Parse a UV index forecast and shift its UTC times by `offset`.
pub fn parse_uv_forecast(payload: &Value, offset: FixedOffset) -> Vec<UvSample> {
    let Ok(parsed) = UvPayload::deserialize(payload) else {
        return Vec::new();
    };
    let shift = TimeDelta::seconds(i64::from(offset.local_minus_utc()));

    parsed
        .forecast
        .into_iter()
        .filter_map(|raw| {
            let item = UvItem::deserialize(&raw).ok()?;
            let utc = NaiveDateTime::parse_from_str(&item.time, UV_TIME_FORMAT).ok()?;
            Some(UvSample {
                at: utc + shift,
                uvi: item.uvi,
            })
        })
        .collect()
}
