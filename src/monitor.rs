use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::error::StoreResult;
use crate::models::{AlertType, AlertWrite, ContentStats, PlatformDepth, QueueAlert, Severity};
use crate::store::{AlertStore, ContentStore};

/// Read-only view of the queue; computing it never raises alerts.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub total_approved: u64,
    pub total_pending: u64,
    pub days_of_content: f64,
    pub stats: ContentStats,
    pub platforms: Vec<PlatformDepth>,
    pub checked_at: DateTime<Utc>,
}

impl QueueStatus {
    /// At least one full day of approved content is ready.
    pub fn has_buffer(&self) -> bool {
        self.days_of_content >= 1.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FiredAlert {
    pub alert: QueueAlert,
    pub write: AlertWrite,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub total_approved: u64,
    pub total_pending: u64,
    pub days_of_content: f64,
    pub is_healthy: bool,
    pub alerts: Vec<FiredAlert>,
    pub platforms: Vec<PlatformDepth>,
}

impl QueueHealth {
    pub fn fired(&self, alert_type: AlertType) -> bool {
        self.alerts
            .iter()
            .any(|fired| fired.alert.alert_type == alert_type)
    }
}

#[derive(Clone)]
pub struct QueueHealthMonitor {
    content: Arc<dyn ContentStore>,
    alerts: Arc<dyn AlertStore>,
    config: Arc<PipelineConfig>,
    clock: Arc<dyn Clock>,
}

impl QueueHealthMonitor {
    pub fn new(
        content: Arc<dyn ContentStore>,
        alerts: Arc<dyn AlertStore>,
        config: Arc<PipelineConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            content,
            alerts,
            config,
            clock,
        }
    }

    pub async fn status(&self) -> StoreResult<QueueStatus> {
        let stats = self.content.stats().await?;
        let platforms = self.content.platform_depth().await?;
        let posts_per_day = self.config.posts_per_day().max(1) as f64;
        Ok(QueueStatus {
            total_approved: stats.approved,
            total_pending: stats.queued,
            days_of_content: stats.approved as f64 / posts_per_day,
            stats,
            platforms,
            checked_at: self.clock.now(),
        })
    }

    /// Evaluates thresholds and raises (or refreshes) alerts.
    pub async fn check(&self) -> StoreResult<QueueHealth> {
        let status = self.status().await?;
        let thresholds = &self.config.alert_thresholds;
        let approved = status.total_approved;
        let pending = status.total_pending;
        let mut fired = Vec::new();

        let depth_alert = if approved == 0 {
            Some((
                AlertType::EmptyQueue,
                Severity::Critical,
                "No approved content left to post".to_string(),
            ))
        } else if approved <= thresholds.critical_low {
            Some((
                AlertType::LowQueue,
                Severity::Critical,
                format!("Only {approved} approved items left"),
            ))
        } else if approved <= thresholds.low {
            Some((
                AlertType::LowQueue,
                Severity::Medium,
                format!("Approved queue is low ({approved} items)"),
            ))
        } else {
            None
        };

        let metadata = json!({
            "total_approved": approved,
            "total_pending": pending,
            "days_of_content": status.days_of_content,
        });

        if let Some((alert_type, severity, message)) = depth_alert {
            fired.push(
                self.create_alert(alert_type, &message, severity, metadata.clone())
                    .await?,
            );
        }

        if pending > thresholds.high_pending {
            fired.push(
                self.create_alert(
                    AlertType::HighPending,
                    &format!("{pending} items are waiting for review"),
                    Severity::Low,
                    metadata,
                )
                .await?,
            );
        }

        let is_healthy = status.has_buffer() && fired.is_empty();
        info!(
            approved,
            pending,
            days = status.days_of_content,
            alerts = fired.len(),
            is_healthy,
            "queue health checked"
        );

        Ok(QueueHealth {
            total_approved: approved,
            total_pending: pending,
            days_of_content: status.days_of_content,
            is_healthy,
            alerts: fired,
            platforms: status.platforms,
        })
    }

    pub async fn create_alert(
        &self,
        alert_type: AlertType,
        message: &str,
        severity: Severity,
        metadata: Value,
    ) -> StoreResult<FiredAlert> {
        let (alert, write) = self
            .alerts
            .upsert(alert_type, message, severity, metadata, self.clock.now())
            .await?;
        let kind = alert_type.as_str();
        if severity >= Severity::High {
            warn!(alert_id = alert.id, kind, ?write, alert_message = message, "queue alert");
        } else {
            info!(alert_id = alert.id, kind, ?write, alert_message = message, "queue alert");
        }
        Ok(FiredAlert { alert, write })
    }
}
