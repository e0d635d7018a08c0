use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDate;

use healthcast_core::{CityId, UserId};
use healthcast_forecast::{AirQualityRow, Period, PeriodReading, UvRow, WeatherRow};

use crate::queue::SuggestionJob;

use super::{CityLocation, ForecastStore, StoreError, Suggestion};

/// A user and the condition their advice is tailored to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub disease_name: String,
    pub describe_disease: String,
}

#[derive(Debug, Default)]
struct Tables {
    weather: Vec<WeatherRow>,
    air: Vec<AirQualityRow>,
    uv: Vec<UvRow>,
    suggestions: BTreeMap<(UserId, CityId), Suggestion>,
    follows: Vec<(UserProfile, CityLocation)>,
}

/// Process-local store, used by tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryForecastStore {
    tables: Mutex<Tables>,
}

impl InMemoryForecastStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that `user` follows `city`.
    pub fn follow(&self, user: UserProfile, city: CityLocation) {
        self.lock().follows.push((user, city));
    }

    pub fn weather_rows(&self) -> Vec<WeatherRow> {
        self.lock().weather.clone()
    }

    pub fn air_quality_rows(&self) -> Vec<AirQualityRow> {
        self.lock().air.clone()
    }

    pub fn uv_rows(&self) -> Vec<UvRow> {
        self.lock().uv.clone()
    }

    pub fn suggestions(&self) -> Vec<Suggestion> {
        self.lock().suggestions.values().cloned().collect()
    }
}

#[async_trait]
impl ForecastStore for InMemoryForecastStore {
    async fn has_weather(&self, city: CityId) -> Result<bool, StoreError> {
        Ok(self.lock().weather.iter().any(|w| w.city_id == city))
    }

    async fn insert_weather(&self, rows: &[WeatherRow]) -> Result<u64, StoreError> {
        self.lock().weather.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn insert_air_quality(&self, rows: &[AirQualityRow]) -> Result<u64, StoreError> {
        self.lock().air.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn insert_uv(&self, rows: &[UvRow]) -> Result<u64, StoreError> {
        self.lock().uv.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn truncate_readings(&self) -> Result<(), StoreError> {
        let mut tables = self.lock();
        tables.weather.clear();
        tables.air.clear();
        tables.uv.clear();
        Ok(())
    }

    async fn truncate_suggestions(&self) -> Result<(), StoreError> {
        self.lock().suggestions.clear();
        Ok(())
    }

    async fn distinct_user_cities(&self) -> Result<Vec<CityLocation>, StoreError> {
        let tables = self.lock();
        let mut seen: BTreeMap<CityId, CityLocation> = BTreeMap::new();
        for (_, city) in &tables.follows {
            seen.entry(city.city_id).or_insert_with(|| city.clone());
        }
        Ok(seen.into_values().collect())
    }

    async fn daily_readings(&self, date: NaiveDate) -> Result<Vec<SuggestionJob>, StoreError> {
        let tables = self.lock();
        let mut jobs: BTreeMap<(UserId, CityId), SuggestionJob> = BTreeMap::new();

        for (user, city) in &tables.follows {
            let mut readings: Vec<PeriodReading> = Vec::new();
            for weather in tables
                .weather
                .iter()
                .filter(|w| w.city_id == city.city_id && w.date == date)
            {
                let same = |city_id: CityId, d: NaiveDate, p: Period| {
                    city_id == weather.city_id && d == weather.date && p == weather.period
                };
                let air = tables.air.iter().find(|a| same(a.city_id, a.date, a.period));
                let uv = tables.uv.iter().find(|u| same(u.city_id, u.date, u.period));
                if let (Some(air), Some(uv)) = (air, uv) {
                    readings.extend(PeriodReading::join(weather, air, uv));
                }
            }
            if readings.is_empty() {
                continue;
            }
            readings.sort_by_key(|r| r.period.display_order());

            jobs.insert(
                (user.user_id, city.city_id),
                SuggestionJob {
                    user_id: user.user_id,
                    city_id: city.city_id,
                    disease_name: user.disease_name.clone(),
                    describe_disease: user.describe_disease.clone(),
                    daily_data: readings,
                },
            );
        }

        Ok(jobs.into_values().collect())
    }

    async fn upsert_suggestion(&self, suggestion: &Suggestion) -> Result<(), StoreError> {
        self.lock().suggestions.insert(
            (suggestion.user_id, suggestion.city_id),
            suggestion.clone(),
        );
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use healthcast_forecast::AirComponents;

    pub fn weather(city: i64, date: NaiveDate, period: Period) -> WeatherRow {
        WeatherRow {
            city_id: CityId::new(city),
            date,
            period,
            temp: Some(31.0),
            feels_like: Some(36.0),
            humidity: Some(75.0),
            pop: Some(0.2),
            rain_3h: Some(0.0),
            wind_speed: Some(3.0),
            wind_gust: Some(5.0),
            visibility: Some(10000.0),
            clouds_all: Some(40.0),
            weather_main: Some("Clouds".to_string()),
            weather_description: Some("mây rải rác".to_string()),
            weather_icon: Some("03d".to_string()),
        }
    }

    pub fn air(city: i64, date: NaiveDate, period: Period) -> AirQualityRow {
        AirQualityRow {
            city_id: CityId::new(city),
            date,
            period,
            aqi: Some(3),
            components: AirComponents {
                pm2_5: Some(40.0),
                ..Default::default()
            },
        }
    }

    pub fn uv(city: i64, date: NaiveDate, period: Period) -> UvRow {
        UvRow {
            city_id: CityId::new(city),
            date,
            period,
            uvi: 7.5,
        }
    }

    pub fn profile(user: i64) -> UserProfile {
        UserProfile {
            user_id: UserId::new(user),
            disease_name: "asthma".to_string(),
            describe_disease: "hen suyễn nhẹ".to_string(),
        }
    }

    pub fn location(city: i64) -> CityLocation {
        CityLocation {
            city_id: CityId::new(city),
            longitude: 106.67,
            latitude: 10.75,
        }
    }

    /// A store where user 1 follows city 5 with a full day on `date`.
    pub async fn seeded(date: NaiveDate, periods: &[Period]) -> InMemoryForecastStore {
        let store = InMemoryForecastStore::new();
        store.follow(profile(1), location(5));
        for &p in periods {
            store.insert_weather(&[weather(5, date, p)]).await.unwrap();
            store.insert_air_quality(&[air(5, date, p)]).await.unwrap();
            store.insert_uv(&[uv(5, date, p)]).await.unwrap();
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    #[tokio::test]
    async fn daily_readings_join_and_order_by_period() {
        let store = seeded(day(), &[Period::Evening, Period::EarlyMorning, Period::Noon]).await;
        // Weather without air or UV for the same period is dropped.
        store
            .insert_weather(&[weather(5, day(), Period::Morning)])
            .await
            .unwrap();

        let jobs = store.daily_readings(day()).await.unwrap();
        assert_eq!(jobs.len(), 1);
        let periods: Vec<Period> = jobs[0].daily_data.iter().map(|r| r.period).collect();
        assert_eq!(periods, vec![Period::EarlyMorning, Period::Noon, Period::Evening]);
        assert_eq!(jobs[0].disease_name, "asthma");
    }

    #[tokio::test]
    async fn other_days_and_unfollowed_cities_are_ignored() {
        let store = seeded(day(), &[Period::Noon]).await;
        store.follow(profile(2), location(9));

        let next = day().succ_opt().unwrap();
        assert!(store.daily_readings(next).await.unwrap().is_empty());
        assert_eq!(store.daily_readings(day()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn followed_cities_are_listed_once() {
        let store = InMemoryForecastStore::new();
        store.follow(profile(1), location(5));
        store.follow(profile(2), location(5));
        store.follow(profile(2), location(7));

        let cities: Vec<CityId> = store
            .distinct_user_cities()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.city_id)
            .collect();
        assert_eq!(cities, vec![CityId::new(5), CityId::new(7)]);
    }

    #[tokio::test]
    async fn suggestion_upsert_replaces_by_user_and_city() {
        let store = InMemoryForecastStore::new();
        let mut s = Suggestion {
            user_id: UserId::new(1),
            city_id: CityId::new(5),
            date: day(),
            text: "first".to_string(),
        };
        store.upsert_suggestion(&s).await.unwrap();
        s.text = "second".to_string();
        store.upsert_suggestion(&s).await.unwrap();

        assert_eq!(store.suggestions(), vec![s]);
        store.truncate_suggestions().await.unwrap();
        assert!(store.suggestions().is_empty());
    }

    #[tokio::test]
    async fn truncate_clears_all_readings() {
        let store = seeded(day(), &[Period::Noon]).await;
        assert!(store.has_weather(CityId::new(5)).await.unwrap());

        store.truncate_readings().await.unwrap();
        assert!(!store.has_weather(CityId::new(5)).await.unwrap());
        assert!(store.air_quality_rows().is_empty());
        assert!(store.uv_rows().is_empty());
    }
}
