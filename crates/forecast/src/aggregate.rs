//! Bucket samples into (city, date, period) rows.
//!
//! Groups are kept in `BTreeMap`s keyed by `(date, period, city)`, which gives
//! the output order (date, then period display order) for free and makes the
//! result independent of hash seeds.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Timelike};
use serde::{Deserialize, Serialize};

use healthcast_core::CityId;

use crate::period::{Period, PeriodTable, window_start};
use crate::reduce::{majority_or_median, max, mean, mode};
use crate::sample::{AirComponents, AirSample, UvSample, WeatherSample};

/// Weather condensed to one period of one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRow {
    pub city_id: CityId,
    pub date: NaiveDate,
    pub period: Period,
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

/// Air quality condensed to one period of one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQualityRow {
    pub city_id: CityId,
    pub date: NaiveDate,
    pub period: Period,
    pub aqi: Option<i64>,
    pub components: AirComponents,
}

/// Peak UV index of one period of one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UvRow {
    pub city_id: CityId,
    pub date: NaiveDate,
    pub period: Period,
    pub uvi: f64,
}

type BucketKey = (NaiveDate, Period, CityId);

fn mean_of<T>(items: &[&T], field: impl Fn(&T) -> Option<f64>) -> Option<f64> {
    let values: Vec<f64> = items.iter().filter_map(|s| field(s)).collect();
    mean(&values)
}

fn mode_of<T>(items: &[&T], field: impl Fn(&T) -> Option<&str>) -> Option<String> {
    mode(items.iter().filter_map(|s| field(s)))
}

impl AirComponents {
    fn mean_of(items: &[&AirComponents]) -> AirComponents {
        AirComponents {
            co: mean_of(items, |c| c.co),
            no: mean_of(items, |c| c.no),
            no2: mean_of(items, |c| c.no2),
            o3: mean_of(items, |c| c.o3),
            so2: mean_of(items, |c| c.so2),
            pm2_5: mean_of(items, |c| c.pm2_5),
            pm10: mean_of(items, |c| c.pm10),
            nh3: mean_of(items, |c| c.nh3),
        }
    }
}

/// Condense 3-hourly weather samples.
///
/// Hours are mapped with [`PeriodTable::three_hour_windows`]; numeric fields
/// are averaged and text fields take their most frequent value.
pub fn aggregate_weather(samples: &[WeatherSample]) -> Vec<WeatherRow> {
    let table = PeriodTable::three_hour_windows();
    let mut buckets: BTreeMap<BucketKey, Vec<&WeatherSample>> = BTreeMap::new();
    for sample in samples {
        if let Some(period) = table.period_for(sample.hour()) {
            buckets
                .entry((sample.at.date(), period, sample.city_id))
                .or_default()
                .push(sample);
        }
    }

    buckets
        .into_iter()
        .map(|((date, period, city_id), group)| WeatherRow {
            city_id,
            date,
            period,
            temp: mean_of(&group, |s| s.temp),
            feels_like: mean_of(&group, |s| s.feels_like),
            humidity: mean_of(&group, |s| s.humidity),
            pop: mean_of(&group, |s| s.pop),
            rain_3h: mean_of(&group, |s| s.rain_3h),
            wind_speed: mean_of(&group, |s| s.wind_speed),
            wind_gust: mean_of(&group, |s| s.wind_gust),
            visibility: mean_of(&group, |s| s.visibility),
            clouds_all: mean_of(&group, |s| s.clouds_all),
            weather_main: mode_of(&group, |s| s.weather_main.as_deref()),
            weather_description: mode_of(&group, |s| s.weather_description.as_deref()),
            weather_icon: mode_of(&group, |s| s.weather_icon.as_deref()),
        })
        .collect()
}

/// Condense hourly air pollution samples for one city.
///
/// Two stages: samples are first reduced per 3-hour window, then windows are
/// mapped to periods and reduced again. AQI uses [`majority_or_median`] at
/// both stages, pollutant concentrations use the mean.
pub fn aggregate_air_quality(city_id: CityId, samples: &[AirSample]) -> Vec<AirQualityRow> {
    let mut windows: BTreeMap<(NaiveDate, u32), Vec<&AirSample>> = BTreeMap::new();
    for sample in samples {
        windows
            .entry((sample.at.date(), window_start(sample.at.hour())))
            .or_default()
            .push(sample);
    }

    let table = PeriodTable::three_hour_windows();
    let mut buckets: BTreeMap<BucketKey, Vec<(Option<i64>, AirComponents)>> = BTreeMap::new();
    for ((date, hour), group) in windows {
        let Some(period) = table.period_for(hour) else {
            continue;
        };
        let aqi_values: Vec<i64> = group.iter().filter_map(|s| s.aqi).collect();
        let components: Vec<&AirComponents> = group.iter().map(|s| &s.components).collect();
        buckets.entry((date, period, city_id)).or_default().push((
            majority_or_median(&aqi_values),
            AirComponents::mean_of(&components),
        ));
    }

    buckets
        .into_iter()
        .map(|((date, period, city_id), windows)| {
            let aqi_values: Vec<i64> = windows.iter().filter_map(|(aqi, _)| *aqi).collect();
            let components: Vec<&AirComponents> = windows.iter().map(|(_, c)| c).collect();
            AirQualityRow {
                city_id,
                date,
                period,
                aqi: majority_or_median(&aqi_values),
                components: AirComponents::mean_of(&components),
            }
        })
        .collect()
}

/// Condense hourly UV samples for one city, keeping each period's peak.
pub fn aggregate_uv(city_id: CityId, samples: &[UvSample], table: &PeriodTable) -> Vec<UvRow> {
    let mut buckets: BTreeMap<BucketKey, Vec<f64>> = BTreeMap::new();
    for sample in samples {
        if let Some(period) = table.period_for(sample.at.hour()) {
            buckets
                .entry((sample.at.date(), period, city_id))
                .or_default()
                .push(sample.uvi);
        }
    }

    buckets
        .into_iter()
        .filter_map(|((date, period, city_id), values)| {
            Some(UvRow {
                city_id,
                date,
                period,
                uvi: max(&values)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use proptest::prelude::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn weather(ts: &str, temp: f64, main: &str) -> WeatherSample {
        WeatherSample {
            city_id: CityId::new(1),
            at: at(ts),
            temp: Some(temp),
            feels_like: Some(temp + 1.0),
            humidity: Some(60.0),
            pop: Some(0.2),
            rain_3h: Some(0.0),
            wind_speed: Some(2.0),
            wind_gust: None,
            visibility: Some(10_000.0),
            clouds_all: Some(40.0),
            weather_main: Some(main.to_string()),
            weather_description: None,
            weather_icon: Some("01d".to_string()),
        }
    }

    fn air(ts: &str, aqi: i64, pm2_5: f64) -> AirSample {
        AirSample {
            at: at(ts),
            aqi: Some(aqi),
            components: AirComponents {
                pm2_5: Some(pm2_5),
                ..AirComponents::default()
            },
        }
    }

    #[test]
    fn full_day_of_three_hour_samples_yields_five_periods() {
        let mut samples = Vec::new();
        for hour in [0, 3, 6, 9, 12, 15, 18, 21] {
            let ts = format!("2025-09-01 {hour:02}:00:00");
            samples.push(weather(&ts, hour as f64, "Clear"));
            samples.push(weather(&ts, hour as f64 + 2.0, "Clear"));
        }

        let rows = aggregate_weather(&samples);

        let periods: Vec<Period> = rows.iter().map(|r| r.period).collect();
        assert_eq!(
            periods,
            vec![
                Period::EarlyMorning,
                Period::Morning,
                Period::Noon,
                Period::Afternoon,
                Period::Evening
            ]
        );
        // EarlyMorning = mean(0, 2, 3, 5)
        assert_eq!(rows[0].temp, Some(2.5));
        // Noon = mean(12, 14)
        assert_eq!(rows[2].temp, Some(13.0));
        assert_eq!(rows[4].temp, Some(22.0));
        assert_eq!(rows[0].weather_main.as_deref(), Some("Clear"));
        assert_eq!(rows[0].wind_gust, None);
    }

    #[test]
    fn rows_sort_by_date_then_period() {
        let samples = vec![
            weather("2025-09-02 00:00:00", 1.0, "Rain"),
            weather("2025-09-01 21:00:00", 2.0, "Rain"),
            weather("2025-09-01 06:00:00", 3.0, "Rain"),
        ];

        let rows = aggregate_weather(&samples);
        let keys: Vec<(String, Period)> = rows
            .iter()
            .map(|r| (r.date.to_string(), r.period))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("2025-09-01".to_string(), Period::Morning),
                ("2025-09-01".to_string(), Period::Evening),
                ("2025-09-02".to_string(), Period::EarlyMorning),
            ]
        );
    }

    #[test]
    fn off_grid_hours_are_dropped() {
        let rows = aggregate_weather(&[weather("2025-09-01 01:00:00", 1.0, "Rain")]);
        assert!(rows.is_empty());
    }

    #[test]
    fn weather_text_fields_take_the_mode() {
        let samples = vec![
            weather("2025-09-01 15:00:00", 30.0, "Rain"),
            weather("2025-09-01 18:00:00", 28.0, "Clouds"),
            weather("2025-09-01 18:00:00", 28.0, "Rain"),
        ];

        let rows = aggregate_weather(&samples);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].weather_main.as_deref(), Some("Rain"));
    }

    #[test]
    fn air_quality_reduces_windows_then_periods() {
        let samples = vec![
            // 06:00 window: aqi [2, 2, 4] -> 2
            air("2025-09-01 06:00:00", 2, 10.0),
            air("2025-09-01 07:00:00", 2, 20.0),
            air("2025-09-01 08:00:00", 4, 30.0),
            // 09:00 window: aqi [3, 4, 5] -> median 4
            air("2025-09-01 09:00:00", 3, 40.0),
            air("2025-09-01 10:00:00", 4, 50.0),
            air("2025-09-01 11:00:00", 5, 60.0),
        ];

        let rows = aggregate_air_quality(CityId::new(9), &samples);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].period, Period::Morning);
        assert_eq!(rows[0].city_id, CityId::new(9));
        // windows [2, 4] -> no majority -> median 3
        assert_eq!(rows[0].aqi, Some(3));
        // mean(mean(10,20,30), mean(40,50,60))
        assert_eq!(rows[0].components.pm2_5, Some(35.0));
        assert_eq!(rows[0].components.co, None);
    }

    #[test]
    fn air_quality_hours_between_windows_collapse_to_window_start() {
        let rows = aggregate_air_quality(
            CityId::new(1),
            &[air("2025-09-01 13:00:00", 1, 5.0), air("2025-09-01 14:00:00", 1, 7.0)],
        );

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].period, Period::Noon);
        assert_eq!(rows[0].aqi, Some(1));
    }

    #[test]
    fn uv_keeps_the_peak_of_each_period() {
        let uv = |ts: &str, uvi: f64| UvSample { at: at(ts), uvi };
        let samples = vec![
            uv("2025-09-01 10:00:00", 6.0),
            uv("2025-09-01 11:00:00", 9.5),
            uv("2025-09-01 12:00:00", 8.0),
            uv("2025-09-01 20:00:00", 0.0),
        ];

        let rows = aggregate_uv(CityId::new(1), &samples, &PeriodTable::hour_ranges());

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].period, Period::Noon);
        assert_eq!(rows[0].uvi, 9.5);
        assert_eq!(rows[1].period, Period::Evening);
    }

    fn arb_weather() -> impl Strategy<Value = WeatherSample> {
        (1u32..=3, 0u32..24, -5.0f64..45.0, prop::sample::select(vec!["Rain", "Clear", "Clouds"]))
            .prop_map(|(day, hour, temp, main)| {
                weather(&format!("2025-09-{day:02} {hour:02}:00:00"), temp, main)
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: aggregating the same samples twice gives identical rows.
        #[test]
        fn weather_aggregation_is_idempotent(samples in prop::collection::vec(arb_weather(), 0..60)) {
            let first = aggregate_weather(&samples);
            let second = aggregate_weather(&samples);
            prop_assert_eq!(&first, &second);

            for pair in first.windows(2) {
                prop_assert!((pair[0].date, pair[0].period) < (pair[1].date, pair[1].period));
            }
        }

        /// Property: every UV row is the maximum of its own samples.
        #[test]
        fn uv_rows_never_exceed_the_input_peak(
            values in prop::collection::vec((0u32..24, 0.0f64..14.0), 1..48)
        ) {
            let samples: Vec<UvSample> = values
                .iter()
                .map(|(hour, uvi)| UvSample { at: at(&format!("2025-09-01 {hour:02}:00:00")), uvi: *uvi })
                .collect();
            let peak = samples.iter().map(|s| s.uvi).fold(0.0, f64::max);

            let rows = aggregate_uv(CityId::new(1), &samples, &PeriodTable::hour_ranges());
            prop_assert!(!rows.is_empty());
            prop_assert!(rows.iter().all(|r| r.uvi <= peak));
            prop_assert!(rows.iter().any(|r| r.uvi == peak));
        }
    }
}
