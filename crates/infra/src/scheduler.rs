//! Daily producers for the collection and suggestion queues.
//!
//! Both runs start from a clean slate: collection clears yesterday's readings
//! (the collector skips cities that still have weather), suggestions clear
//! the previous day's advice.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

use healthcast_core::{DomainError, DomainResult};

use crate::config::vietnam_offset;
use crate::queue::{CollectDataJob, Job, JobQueue, QueueError};
use crate::store::{ForecastStore, StoreError};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A wall-clock time of day in a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    hour: u32,
    minute: u32,
    offset: FixedOffset,
}

impl DailySchedule {
    pub fn new(hour: u32, minute: u32, offset: FixedOffset) -> DomainResult<Self> {
        if hour > 23 || minute > 59 {
            return Err(DomainError::validation(format!(
                "invalid time of day {hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute, offset })
    }

    /// 00:01 Vietnam time.
    pub fn collection() -> Self {
        Self {
            hour: 0,
            minute: 1,
            offset: vietnam_offset(),
        }
    }

    /// 00:30 Vietnam time.
    pub fn suggestions() -> Self {
        Self {
            hour: 0,
            minute: 30,
            offset: vietnam_offset(),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// First firing strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.offset);
        let since_midnight = TimeDelta::minutes(i64::from(self.hour * 60 + self.minute));
        let today = local.date_naive().and_time(NaiveTime::MIN) + since_midnight;
        let shift = TimeDelta::seconds(i64::from(self.offset.local_minus_utc()));

        let mut next = (today - shift).and_utc();
        if next <= now {
            next += TimeDelta::days(1);
        }
        next
    }

    /// Calendar date of `at` in this schedule's offset.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }
}

/// Clear stored readings and queue one collection job per followed city.
pub async fn push_collection_jobs<S, Q>(store: &S, queue: &Q, queue_name: &str) -> Result<usize, SchedulerError>
where
    S: ForecastStore,
    Q: JobQueue,
{
    store.truncate_readings().await?;
    let cities = store.distinct_user_cities().await?;

    for city in &cities {
        let task = CollectDataJob {
            city_id: city.city_id,
            longitude: city.longitude,
            latitude: city.latitude,
        };
        let job = Job::new(queue_name, &task)?;
        queue.enqueue(queue_name, &job).await?;
        debug!(job_id = %job.id, city_id = %city.city_id, "collection job queued");
    }

    info!(queue = queue_name, jobs = cities.len(), "collection jobs pushed");
    Ok(cities.len())
}

/// Clear stored suggestions and queue one job per user and city with
/// readings for `date`.
pub async fn push_suggestion_jobs<S, Q>(
    store: &S,
    queue: &Q,
    queue_name: &str,
    date: NaiveDate,
) -> Result<usize, SchedulerError>
where
    S: ForecastStore,
    Q: JobQueue,
{
    store.truncate_suggestions().await?;
    let tasks = store.daily_readings(date).await?;

    for task in &tasks {
        let job = Job::new(queue_name, task)?;
        queue.enqueue(queue_name, &job).await?;
        debug!(job_id = %job.id, user_id = %task.user_id, city_id = %task.city_id, "suggestion job queued");
    }

    info!(queue = queue_name, %date, jobs = tasks.len(), "suggestion jobs pushed");
    Ok(tasks.len())
}

/// Run `task` at every firing of `schedule` until `shutdown` turns true.
///
/// The task receives the scheduled instant. A failed run is logged and the
/// next firing proceeds as usual.
pub async fn run_daily<F, Fut, E>(schedule: DailySchedule, shutdown: watch::Receiver<bool>, task: F)
where
    F: FnMut(DateTime<Utc>) -> Fut,
    Fut: Future<Output = Result<usize, E>>,
    E: std::fmt::Display,
{
    run_daily_with_clock(schedule, shutdown, Utc::now, task).await
}

/// [`run_daily`] with an explicit wall clock.
pub async fn run_daily_with_clock<C, F, Fut, E>(
    schedule: DailySchedule,
    mut shutdown: watch::Receiver<bool>,
    clock: C,
    mut task: F,
) where
    C: Fn() -> DateTime<Utc>,
    F: FnMut(DateTime<Utc>) -> Fut,
    Fut: Future<Output = Result<usize, E>>,
    E: std::fmt::Display,
{
    let mut last_fired: Option<DateTime<Utc>> = None;

    loop {
        let now = clock();
        // Never fire the same slot twice if the timer wakes a little early.
        let after = last_fired.map_or(now, |last| last.max(now));
        let next = schedule.next_after(after);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(next = %next, wait_secs = wait.as_secs(), "waiting for next run");

        tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => break,
            _ = tokio::time::sleep(wait) => {}
        }

        last_fired = Some(next);
        match task(next).await {
            Ok(jobs) => info!(at = %next, jobs, "scheduled run finished"),
            Err(e) => error!(at = %next, error = %e, "scheduled run failed"),
        }
    }
    info!("scheduler stopped");
}
