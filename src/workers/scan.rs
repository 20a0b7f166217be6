use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::state::AppState;

use super::{JobExecution, JobHandler, JOB_PLATFORM_SCANS};

/// Scans each platform whose scan interval has elapsed since its last
/// recorded scan.
pub struct PlatformScanJob;

impl PlatformScanJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PlatformScanJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for PlatformScanJob {
    fn job_type(&self) -> &'static str {
        JOB_PLATFORM_SCANS
    }

    async fn handle(&self, state: Arc<AppState>) -> JobExecution {
        match state.pipeline.run_due_scans().await {
            Ok(results) if results.is_empty() => JobExecution::Idle,
            Ok(_) => JobExecution::Success,
            Err(err) => JobExecution::Retry {
                delay: Duration::from_secs(120),
                error: err.to_string(),
            },
        }
    }
}
