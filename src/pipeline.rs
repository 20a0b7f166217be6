//! Wires the curation components together and runs the daily tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::approval::{ApprovalReport, ProgressiveApprover};
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::error::{PipelineResult, ScanError, StoreResult};
use crate::filter::{ContentPolicy, FilterAndScorer, KeywordPolicy};
use crate::models::{AlertType, Platform, ScanResult, Severity};
use crate::monitor::{QueueHealth, QueueHealthMonitor, QueueStatus};
use crate::scanning::{ScanCoordinator, ScannerRegistry};
use crate::schedule::{MaterializeOutcome, PostingScheduler, ScheduleMaterializer};
use crate::store::{AlertStore, ContentStore, ScanHistoryStore, ScheduleStore};

/// The four persistence seams, usually backed by one store.
#[derive(Clone)]
pub struct PipelineStores {
    pub content: Arc<dyn ContentStore>,
    pub schedule: Arc<dyn ScheduleStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub history: Arc<dyn ScanHistoryStore>,
}

impl PipelineStores {
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ContentStore + ScheduleStore + AlertStore + ScanHistoryStore,
    {
        Self {
            content: store.clone(),
            schedule: store.clone(),
            alerts: store.clone(),
            history: store,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmergencyScan {
    pub platform: Platform,
    pub result: Option<ScanResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    pub started_at: DateTime<Utc>,
    pub health: QueueHealth,
    pub emergency_scans: Vec<EmergencyScan>,
    pub approval: ApprovalReport,
    pub schedules: Vec<MaterializeOutcome>,
    pub queue_after: QueueStatus,
}

#[derive(Clone)]
pub struct Pipeline {
    pub stores: PipelineStores,
    pub config: Arc<PipelineConfig>,
    pub clock: Arc<dyn Clock>,
    pub scans: Arc<ScanCoordinator>,
    pub monitor: QueueHealthMonitor,
    pub approver: ProgressiveApprover,
    pub materializer: ScheduleMaterializer,
    pub poster: PostingScheduler,
}

impl Pipeline {
    pub fn new(
        stores: PipelineStores,
        config: Arc<PipelineConfig>,
        scanners: ScannerRegistry,
        clock: Arc<dyn Clock>,
        scanner_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let policy: Arc<dyn ContentPolicy> = Arc::new(KeywordPolicy::new()?);
        Ok(Self::with_policy(
            stores,
            config,
            scanners,
            clock,
            scanner_timeout,
            policy,
        ))
    }

    pub fn with_policy(
        stores: PipelineStores,
        config: Arc<PipelineConfig>,
        scanners: ScannerRegistry,
        clock: Arc<dyn Clock>,
        scanner_timeout: Duration,
        policy: Arc<dyn ContentPolicy>,
    ) -> Self {
        let scorer = FilterAndScorer::new(
            policy,
            config.approval_threshold,
            config.auto_approve_threshold,
        );
        let scans = Arc::new(ScanCoordinator::new(
            stores.content.clone(),
            stores.history.clone(),
            scorer,
            config.clone(),
            scanners,
            clock.clone(),
            scanner_timeout,
        ));
        let monitor = QueueHealthMonitor::new(
            stores.content.clone(),
            stores.alerts.clone(),
            config.clone(),
            clock.clone(),
        );
        let approver =
            ProgressiveApprover::new(stores.content.clone(), config.clone(), clock.clone());
        let materializer = ScheduleMaterializer::new(
            stores.content.clone(),
            stores.schedule.clone(),
            config.clone(),
            clock.clone(),
        );
        let poster = PostingScheduler::new(
            stores.content.clone(),
            stores.schedule.clone(),
            stores.alerts.clone(),
            config.clone(),
            clock.clone(),
        );
        Self {
            stores,
            config,
            clock,
            scans,
            monitor,
            approver,
            materializer,
            poster,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.materializer.today()
    }

    /// Health check, emergency scans when the queue is (nearly) empty,
    /// progressive approval, then slot materialization for today and tomorrow.
    pub async fn run_daily(&self) -> PipelineResult<DailyReport> {
        let started_at = self.clock.now();
        let health = self.monitor.check().await?;

        let starving = health.alerts.iter().any(|fired| {
            fired.alert.alert_type == AlertType::EmptyQueue
                || (fired.alert.alert_type == AlertType::LowQueue
                    && fired.alert.severity == Severity::Critical)
        });
        let emergency_scans = if starving {
            self.emergency_scans().await
        } else {
            Vec::new()
        };

        let approval = self.approver.run().await?;

        let today = self.today();
        let mut schedules = vec![self.materializer.materialize_day(today).await?];
        if let Some(tomorrow) = today.succ_opt() {
            schedules.push(self.materializer.materialize_day(tomorrow).await?);
        }

        let queue_after = self.monitor.status().await?;
        info!(
            healthy = health.is_healthy,
            emergency_scans = emergency_scans.len(),
            approved = approval.total_approved,
            days_after = queue_after.days_of_content,
            "daily tick finished"
        );

        Ok(DailyReport {
            started_at,
            health,
            emergency_scans,
            approval,
            schedules,
            queue_after,
        })
    }

    /// Scans every ready platform once. Failures are reported, not raised.
    pub async fn emergency_scans(&self) -> Vec<EmergencyScan> {
        let mut reports = Vec::new();
        for status in self.scans.status() {
            if !(status.is_enabled && status.is_authenticated && status.has_scanner) {
                continue;
            }
            warn!(platform = %status.platform, "starting emergency scan");
            reports.push(match self.scans.scan(status.platform).await {
                Ok(result) => EmergencyScan {
                    platform: status.platform,
                    result: Some(result),
                    error: None,
                },
                Err(err) => EmergencyScan {
                    platform: status.platform,
                    result: None,
                    error: Some(err.to_string()),
                },
            });
        }
        reports
    }

    /// Runs every platform whose scan interval has elapsed.
    pub async fn run_due_scans(&self) -> StoreResult<Vec<ScanResult>> {
        let mut results = Vec::new();
        for platform in self.scans.due_platforms().await? {
            match self.scans.scan(platform).await {
                Ok(result) => results.push(result),
                Err(ScanError::InProgress(_)) => {
                    info!(%platform, "scan already running, will retry next tick")
                }
                Err(ScanError::Store(err)) => return Err(err),
                Err(err) => warn!(%platform, error = %err, "scheduled scan failed"),
            }
        }
        Ok(results)
    }
}
