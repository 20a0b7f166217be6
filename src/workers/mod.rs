use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{sync::Mutex, time::sleep};
use tracing::{debug, error, info, warn};

use crate::state::AppState;

pub mod daily;
pub mod posting;
pub mod scan;

pub const JOB_PLATFORM_SCANS: &str = "platform_scans";
pub const JOB_DAILY_TICK: &str = "daily_tick";
pub const JOB_QUEUE_CHECK: &str = "queue_check";
pub const JOB_MEAL_POST: &str = "meal_post";

#[derive(Debug)]
pub enum JobExecution {
    Success,
    /// Nothing was due this tick.
    Idle,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>) -> JobExecution;
}

/// Polls every handler once per interval. A handler asking for a retry is
/// skipped until its delay has elapsed.
pub struct Worker {
    state: Arc<AppState>,
    handlers: Vec<Arc<dyn JobHandler>>,
    poll_interval: Duration,
    retry_after: Mutex<HashMap<&'static str, DateTime<Utc>>>,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            state,
            handlers,
            poll_interval,
            retry_after: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(&self) {
        info!(handlers = self.handlers.len(), "worker started");
        loop {
            let worked = self.tick().await;
            debug!(worked, "worker tick finished");
            sleep(self.poll_interval).await;
        }
    }

    /// Runs every handler that is not backing off. Returns how many did work.
    pub async fn tick(&self) -> usize {
        let mut worked = 0;
        for handler in &self.handlers {
            let job_type = handler.job_type();
            let now = self.state.now();
            if let Some(until) = self.retry_after.lock().await.get(job_type) {
                if *until > now {
                    continue;
                }
            }

            match handler.handle(self.state.clone()).await {
                JobExecution::Success => {
                    worked += 1;
                    self.retry_after.lock().await.remove(job_type);
                    info!(job_type, "job completed successfully");
                }
                JobExecution::Idle => {
                    self.retry_after.lock().await.remove(job_type);
                }
                JobExecution::Retry { delay, error } => {
                    warn!(job_type, %error, retry_in_secs = delay.as_secs(), "job will retry");
                    let until = now
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::seconds(60));
                    self.retry_after.lock().await.insert(job_type, until);
                }
                JobExecution::Failed { error } => {
                    error!(job_type, %error, "job failed");
                }
            }
        }
        worked
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![
        Arc::new(daily::DailyTickJob::new()),
        Arc::new(daily::QueueCheckJob::new(chrono::Duration::hours(1))),
        Arc::new(scan::PlatformScanJob::new()),
        Arc::new(posting::MealPostJob::new()),
    ]
}
