use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::warn;

use crate::schedule::PostOutcome;
use crate::state::AppState;

use super::{JobExecution, JobHandler, JOB_MEAL_POST};

/// Posts when a meal-time window is open. Repeated ticks inside the same
/// window see the slot as already posted.
pub struct MealPostJob;

impl MealPostJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MealPostJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for MealPostJob {
    fn job_type(&self) -> &'static str {
        JOB_MEAL_POST
    }

    async fn handle(&self, state: Arc<AppState>) -> JobExecution {
        match state.pipeline.poster.tick().await {
            Ok(PostOutcome::Posted { .. }) => JobExecution::Success,
            Ok(PostOutcome::NothingToPost { meal }) => {
                warn!(%meal, "meal time passed without content");
                JobExecution::Success
            }
            Ok(_) => JobExecution::Idle,
            Err(err) => JobExecution::Retry {
                delay: Duration::from_secs(30),
                error: err.to_string(),
            },
        }
    }
}
