use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::{is_valid_cron, parse_timezone};
use crate::pipeline::{Pipeline, PipelineError, RunOutcome};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression: {0:?}")]
    InvalidCron(String),
    #[error("unknown timezone: {0:?}")]
    InvalidTimezone(String),
    #[error("scheduler failure: {0}")]
    Scheduler(#[from] JobSchedulerError),
}

struct LiveJob {
    id: Uuid,
    expression: String,
    timezone: Tz,
}

/// What is currently scheduled, as reported to admins.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInfo {
    pub expression: String,
    pub timezone: String,
    pub next_run: Option<DateTime<Utc>>,
}

/// The one schedule that triggers pipeline runs.
///
/// Replacing it removes the old job before the new one is added, under a
/// lock, so two schedules are never live at once. Expressions are evaluated
/// in the schedule's own timezone.
pub struct ActiveSchedule {
    scheduler: JobScheduler,
    pipeline: Arc<Pipeline>,
    current: Mutex<Option<LiveJob>>,
}

impl ActiveSchedule {
    pub async fn new(pipeline: Arc<Pipeline>) -> Result<Self, ScheduleError> {
        let scheduler = JobScheduler::new().await?;
        scheduler.start().await?;

        Ok(Self {
            scheduler,
            pipeline,
            current: Mutex::new(None),
        })
    }

    pub async fn current(&self) -> Option<ScheduleInfo> {
        self.current.lock().await.as_ref().map(|job| ScheduleInfo {
            expression: job.expression.clone(),
            timezone: job.timezone.name().to_string(),
            next_run: next_run(&job.expression, job.timezone, Utc::now()),
        })
    }

    /// Installs `expression`, evaluated in `timezone`, as the active
    /// schedule, replacing any previous one.
    pub async fn reconfigure(&self, expression: &str, timezone: &str) -> Result<(), ScheduleError> {
        let expression = expression.trim();
        if !is_valid_cron(expression) {
            return Err(ScheduleError::InvalidCron(expression.to_string()));
        }
        let timezone = parse_timezone(timezone)
            .ok_or_else(|| ScheduleError::InvalidTimezone(timezone.to_string()))?;

        let job = self.build_job(expression, timezone)?;

        let mut current = self.current.lock().await;
        if let Some(old) = current.take() {
            self.scheduler.remove(&old.id).await?;
            info!(schedule = %old.expression, timezone = %old.timezone, "Stopped previous schedule");
        }

        let id = self.scheduler.add(job).await?;
        info!(schedule = %expression, timezone = %timezone, "Digest scheduled");
        *current = Some(LiveJob {
            id,
            expression: expression.to_string(),
            timezone,
        });
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ScheduleError> {
        if let Some(old) = self.current.lock().await.take() {
            self.scheduler.remove(&old.id).await?;
            info!(schedule = %old.expression, "Schedule stopped");
        }
        Ok(())
    }

    fn build_job(&self, expression: &str, timezone: Tz) -> Result<Job, ScheduleError> {
        let pipeline = self.pipeline.clone();
        let schedule = with_seconds(expression);
        let job = Job::new_async_tz(schedule.as_str(), timezone, move |_id, _scheduler| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                info!("Scheduled digest run triggered");
                match pipeline.run(true).await {
                    Ok(RunOutcome::Completed(report)) => {
                        info!(date = %report.date, "Scheduled digest saved")
                    }
                    Ok(RunOutcome::Aborted) => info!("Scheduled digest skipped, no new articles"),
                    Err(PipelineError::AlreadyRunning) => {
                        info!("Scheduled digest skipped, a run is already in progress")
                    }
                    Err(e) => error!("Scheduled digest failed: {}", e),
                }
            })
        })?;
        Ok(job)
    }
}

/// The job scheduler expects a leading seconds field.
fn with_seconds(expression: &str) -> String {
    format!("0 {}", expression.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// First time strictly after `after` that `expression` fires in `timezone`.
pub fn next_run(expression: &str, timezone: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let cron = Cron::new(&with_seconds(expression))
        .with_seconds_required()
        .with_dom_and_dow()
        .parse()
        .ok()?;
    cron.find_next_occurrence(&after.with_timezone(&timezone), false)
        .ok()
        .map(|next| next.with_timezone(&Utc))
}
