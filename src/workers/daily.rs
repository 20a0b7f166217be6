use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::info;

use crate::state::AppState;

use super::{JobExecution, JobHandler, JOB_DAILY_TICK, JOB_QUEUE_CHECK};

/// Runs the daily tick once per local calendar day.
pub struct DailyTickJob {
    last_day: Mutex<Option<NaiveDate>>,
}

impl DailyTickJob {
    pub fn new() -> Self {
        Self {
            last_day: Mutex::new(None),
        }
    }
}

impl Default for DailyTickJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for DailyTickJob {
    fn job_type(&self) -> &'static str {
        JOB_DAILY_TICK
    }

    async fn handle(&self, state: Arc<AppState>) -> JobExecution {
        let today = state.pipeline.today();
        let mut last_day = self.last_day.lock().await;
        if *last_day == Some(today) {
            return JobExecution::Idle;
        }

        match state.pipeline.run_daily().await {
            Ok(report) => {
                info!(
                    %today,
                    healthy = report.health.is_healthy,
                    approved = report.approval.total_approved,
                    "daily report ready"
                );
                *last_day = Some(today);
                JobExecution::Success
            }
            Err(err) => JobExecution::Retry {
                delay: Duration::from_secs(300),
                error: err.to_string(),
            },
        }
    }
}

/// Re-evaluates queue health between daily ticks.
pub struct QueueCheckJob {
    every: chrono::Duration,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl QueueCheckJob {
    pub fn new(every: chrono::Duration) -> Self {
        Self {
            every,
            last_run: Mutex::new(None),
        }
    }
}

#[async_trait]
impl JobHandler for QueueCheckJob {
    fn job_type(&self) -> &'static str {
        JOB_QUEUE_CHECK
    }

    async fn handle(&self, state: Arc<AppState>) -> JobExecution {
        let now = state.now();
        let mut last_run = self.last_run.lock().await;
        if last_run.is_some_and(|at| at + self.every > now) {
            return JobExecution::Idle;
        }

        match state.pipeline.monitor.check().await {
            Ok(_) => {
                *last_run = Some(now);
                JobExecution::Success
            }
            Err(err) => JobExecution::Retry {
                delay: Duration::from_secs(60),
                error: err.to_string(),
            },
        }
    }
}
