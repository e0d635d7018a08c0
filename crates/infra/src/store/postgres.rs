//! Postgres-backed forecast store.
//!
//! Tables (owned by the schema migrations of the API service):
//!
//! | Table | Written | Read |
//! |---|---|---|
//! | `weather`, `climate`, `uv` | collector | scheduler |
//! | `suggestion` | suggestion worker | API |
//! | `user_city`, `users`, `disease`, `city` | API | scheduler |
//!
//! Readings are keyed by `(city_id, report_year, report_month, report_day,
//! period)` with `period` stored as its display name.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use healthcast_core::{CityId, UserId};
use healthcast_forecast::{
    AirQualityRow, ClimateDetails, Period, PeriodReading, ReportTime, UvDetails, UvRow,
    WeatherDetails, WeatherRow,
};

use crate::queue::SuggestionJob;

use super::{CityLocation, ForecastStore, StoreError, Suggestion};

const DAILY_READINGS_QUERY: &str = r#"
    SELECT
        uc.user_id, uc.city_id, d.disease_name, u.describe_disease,
        w.period, w.report_day, w.report_month, w.report_year,
        w.temp, w.feels_like, w.humidity, w.pop, w.wind_speed, w.wind_gust,
        w.visibility, w.clouds_all, w.weather_main, w.weather_description,
        cl.aqi, cl.co, cl.no, cl.no2, cl.o3, cl.so2, cl.pm2_5, cl.pm10, cl.nh3,
        uv.uvi
    FROM user_city uc
    JOIN users u ON uc.user_id = u.user_id
    JOIN disease d ON u.disease_id = d.disease_id
    JOIN weather w ON uc.city_id = w.city_id
    JOIN climate cl ON uc.city_id = cl.city_id
    JOIN uv ON uc.city_id = uv.city_id
    WHERE
        w.report_day = $1 AND w.report_month = $2 AND w.report_year = $3 AND
        cl.report_day = $1 AND cl.report_month = $2 AND cl.report_year = $3 AND
        uv.report_day = $1 AND uv.report_month = $2 AND uv.report_year = $3 AND
        w.period = cl.period AND w.period = uv.period
"#;

#[derive(Debug, Clone)]
pub struct PostgresForecastStore {
    pool: PgPool,
}

impl PostgresForecastStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Database {
            operation,
            message: db_err.message().to_string(),
        },
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Decode(format!("{operation}: {err}"))
        }
        other => StoreError::Database {
            operation,
            message: other.to_string(),
        },
    }
}

fn date_parts(date: NaiveDate) -> (i32, i32, i32) {
    (date.day() as i32, date.month() as i32, date.year())
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| map_sqlx_error("decode_row", e))
}

/// Nullable numeric column, zero when absent.
fn num(row: &PgRow, column: &str) -> Result<f64, StoreError> {
    Ok(get::<Option<f64>>(row, column)?.unwrap_or_default())
}

fn reading_from_row(row: &PgRow) -> Result<PeriodReading, StoreError> {
    let period_name: String = get(row, "period")?;
    let period = Period::from_str(&period_name)
        .map_err(|e| StoreError::Decode(format!("period {period_name:?}: {e}")))?;

    Ok(PeriodReading {
        period,
        report_time: ReportTime {
            day: get::<i32>(row, "report_day")? as u32,
            month: get::<i32>(row, "report_month")? as u32,
            year: get(row, "report_year")?,
        },
        weather_details: WeatherDetails {
            temp: num(row, "temp")?,
            feels_like: num(row, "feels_like")?,
            humidity: num(row, "humidity")?,
            pop: num(row, "pop")?,
            wind_speed: num(row, "wind_speed")?,
            wind_gust: num(row, "wind_gust")?,
            visibility: num(row, "visibility")?,
            clouds_all: num(row, "clouds_all")?,
            weather_main: get::<Option<String>>(row, "weather_main")?.unwrap_or_default(),
            weather_description: get::<Option<String>>(row, "weather_description")?
                .unwrap_or_default(),
        },
        climate_details: ClimateDetails {
            aqi: get::<Option<i32>>(row, "aqi")?.map(i64::from).unwrap_or_default(),
            co: num(row, "co")?,
            no: num(row, "no")?,
            no2: num(row, "no2")?,
            o3: num(row, "o3")?,
            so2: num(row, "so2")?,
            pm2_5: num(row, "pm2_5")?,
            pm10: num(row, "pm10")?,
            nh3: num(row, "nh3")?,
        },
        uvi_details: UvDetails {
            uvi: num(row, "uvi")?,
        },
    })
}

#[async_trait]
impl ForecastStore for PostgresForecastStore {
    #[instrument(skip(self), err)]
    async fn has_weather(&self, city: CityId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM weather WHERE city_id = $1 LIMIT 1")
            .bind(city.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("has_weather", e))?;
        Ok(row.is_some())
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()), err)]
    async fn insert_weather(&self, rows: &[WeatherRow]) -> Result<u64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for w in rows {
            let (day, month, year) = date_parts(w.date);
            sqlx::query(
                r#"
                INSERT INTO weather (
                    city_id, report_year, report_month, report_day, period,
                    temp, feels_like, humidity, pop, rain_3h, wind_speed, wind_gust,
                    visibility, clouds_all, weather_main, weather_description, weather_icon
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                "#,
            )
            .bind(w.city_id.get())
            .bind(year)
            .bind(month)
            .bind(day)
            .bind(w.period.name())
            .bind(w.temp)
            .bind(w.feels_like)
            .bind(w.humidity)
            .bind(w.pop)
            .bind(w.rain_3h)
            .bind(w.wind_speed)
            .bind(w.wind_gust)
            .bind(w.visibility)
            .bind(w.clouds_all)
            .bind(w.weather_main.as_deref())
            .bind(w.weather_description.as_deref())
            .bind(w.weather_icon.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_weather", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(rows.len() as u64)
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()), err)]
    async fn insert_air_quality(&self, rows: &[AirQualityRow]) -> Result<u64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for a in rows {
            let (day, month, year) = date_parts(a.date);
            let c = &a.components;
            sqlx::query(
                r#"
                INSERT INTO climate (
                    city_id, report_year, report_month, report_day, period,
                    aqi, co, no, no2, o3, so2, pm2_5, pm10, nh3
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(a.city_id.get())
            .bind(year)
            .bind(month)
            .bind(day)
            .bind(a.period.name())
            .bind(a.aqi.map(|v| v as i32))
            .bind(c.co)
            .bind(c.no)
            .bind(c.no2)
            .bind(c.o3)
            .bind(c.so2)
            .bind(c.pm2_5)
            .bind(c.pm10)
            .bind(c.nh3)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_air_quality", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(rows.len() as u64)
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()), err)]
    async fn insert_uv(&self, rows: &[UvRow]) -> Result<u64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for u in rows {
            let (day, month, year) = date_parts(u.date);
            sqlx::query(
                r#"
                INSERT INTO uv (city_id, report_year, report_month, report_day, period, uvi)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(u.city_id.get())
            .bind(year)
            .bind(month)
            .bind(day)
            .bind(u.period.name())
            .bind(u.uvi)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_uv", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(rows.len() as u64)
    }

    #[instrument(skip(self), err)]
    async fn truncate_readings(&self) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        for table in ["weather", "climate", "uv"] {
            sqlx::query(&format!("TRUNCATE TABLE {table} RESTART IDENTITY CASCADE"))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("truncate_readings", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        debug!("cleared weather, climate and uv");
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn truncate_suggestions(&self) -> Result<(), StoreError> {
        sqlx::query("TRUNCATE TABLE suggestion RESTART IDENTITY CASCADE")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("truncate_suggestions", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn distinct_user_cities(&self) -> Result<Vec<CityLocation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT uc.city_id, c.longitude, c.latitude
            FROM user_city uc
            LEFT JOIN city c ON uc.city_id = c.city_id
            ORDER BY uc.city_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("distinct_user_cities", e))?;

        rows.iter()
            .map(|row| {
                Ok(CityLocation {
                    city_id: CityId::new(get(row, "city_id")?),
                    longitude: num(row, "longitude")?,
                    latitude: num(row, "latitude")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn daily_readings(&self, date: NaiveDate) -> Result<Vec<SuggestionJob>, StoreError> {
        let (day, month, year) = date_parts(date);
        let rows = sqlx::query(DAILY_READINGS_QUERY)
            .bind(day)
            .bind(month)
            .bind(year)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("daily_readings", e))?;

        let mut jobs: BTreeMap<(i64, i64), SuggestionJob> = BTreeMap::new();
        for row in &rows {
            let user_id: i64 = get(row, "user_id")?;
            let city_id: i64 = get(row, "city_id")?;
            let reading = reading_from_row(row)?;

            let job = match jobs.entry((user_id, city_id)) {
                std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::btree_map::Entry::Vacant(e) => e.insert(SuggestionJob {
                    user_id: UserId::new(user_id),
                    city_id: CityId::new(city_id),
                    disease_name: get(row, "disease_name")?,
                    describe_disease: get::<Option<String>>(row, "describe_disease")?
                        .unwrap_or_default(),
                    daily_data: Vec::new(),
                }),
            };
            job.daily_data.push(reading);
        }

        let mut jobs: Vec<SuggestionJob> = jobs.into_values().collect();
        for job in &mut jobs {
            job.daily_data.sort_by_key(|r| r.period.display_order());
        }
        Ok(jobs)
    }

    #[instrument(skip(self, suggestion), fields(user_id = %suggestion.user_id, city_id = %suggestion.city_id), err)]
    async fn upsert_suggestion(&self, suggestion: &Suggestion) -> Result<(), StoreError> {
        let (day, month, year) = date_parts(suggestion.date);
        sqlx::query(
            r#"
            INSERT INTO suggestion (user_id, city_id, text_suggestion, report_year, report_month, report_day)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, city_id) DO UPDATE SET
                text_suggestion = EXCLUDED.text_suggestion,
                report_year = EXCLUDED.report_year,
                report_month = EXCLUDED.report_month,
                report_day = EXCLUDED.report_day
            "#,
        )
        .bind(suggestion.user_id.get())
        .bind(suggestion.city_id.get())
        .bind(&suggestion.text)
        .bind(year)
        .bind(month)
        .bind(day)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_suggestion", e))?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }
}
