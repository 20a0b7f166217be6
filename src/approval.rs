use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::error::StoreResult;
use crate::models::Platform;
use crate::store::{ContentStore, PendingFilter};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierOutcome {
    pub tier: usize,
    pub min_confidence: f64,
    pub min_age_hours: i64,
    pub approved: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalReport {
    pub skipped: bool,
    pub buffer_days_before: f64,
    pub target_buffer_days: f64,
    pub tiers: Vec<TierOutcome>,
    pub platform_balance: usize,
    pub total_approved: usize,
}

/// Approves undecided content in escalating confidence/age tiers while the
/// ready-to-post buffer is below target.
#[derive(Clone)]
pub struct ProgressiveApprover {
    content: Arc<dyn ContentStore>,
    config: Arc<PipelineConfig>,
    clock: Arc<dyn Clock>,
}

impl ProgressiveApprover {
    pub fn new(
        content: Arc<dyn ContentStore>,
        config: Arc<PipelineConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            content,
            config,
            clock,
        }
    }

    pub async fn buffer_days(&self) -> StoreResult<f64> {
        let stats = self.content.stats().await?;
        Ok(stats.approved as f64 / self.config.posts_per_day().max(1) as f64)
    }

    pub async fn run(&self) -> StoreResult<ApprovalReport> {
        let buffer_days_before = self.buffer_days().await?;
        let target = self.config.target_buffer_days;
        if buffer_days_before >= target {
            debug!(buffer_days_before, target, "buffer full, skipping approval");
            return Ok(ApprovalReport {
                skipped: true,
                buffer_days_before,
                target_buffer_days: target,
                tiers: Vec::new(),
                platform_balance: 0,
                total_approved: 0,
            });
        }

        let now = self.clock.now();
        let mut tiers = Vec::with_capacity(self.config.approval_tiers.len());
        for (index, tier) in self.config.approval_tiers.iter().enumerate() {
            let number = index + 1;
            let filter = PendingFilter {
                min_confidence: tier.min_confidence,
                created_before: (tier.min_age_hours > 0)
                    .then(|| now - Duration::hours(tier.min_age_hours)),
                platform: None,
            };
            let note = format!(
                "Progressive approval tier {number} (confidence >= {:.2}, age >= {}h)",
                tier.min_confidence, tier.min_age_hours
            );
            let approved = self.approve_matching(&filter, tier.limit, &note).await?;
            tiers.push(TierOutcome {
                tier: number,
                min_confidence: tier.min_confidence,
                min_age_hours: tier.min_age_hours,
                approved,
            });
        }

        let balance = &self.config.platform_balance;
        let note = format!(
            "Platform balance approval (confidence >= {:.2}, age >= {}h)",
            balance.min_confidence, balance.min_age_hours
        );
        let mut platform_balance = 0;
        for platform in Platform::ALL {
            let filter = PendingFilter {
                min_confidence: balance.min_confidence,
                created_before: Some(now - Duration::hours(balance.min_age_hours)),
                platform: Some(platform),
            };
            platform_balance += self
                .approve_matching(&filter, balance.per_platform_cap, &note)
                .await?;
        }

        let total_approved =
            tiers.iter().map(|tier| tier.approved).sum::<usize>() + platform_balance;
        info!(
            buffer_days_before,
            target,
            total_approved,
            platform_balance,
            "progressive approval finished"
        );

        Ok(ApprovalReport {
            skipped: false,
            buffer_days_before,
            target_buffer_days: target,
            tiers,
            platform_balance,
            total_approved,
        })
    }

    async fn approve_matching(
        &self,
        filter: &PendingFilter,
        limit: usize,
        note: &str,
    ) -> StoreResult<usize> {
        if limit == 0 {
            return Ok(0);
        }
        let candidates = self.content.list_unapproved(filter, limit).await?;
        let mut approved = 0;
        for item in candidates {
            self.content.mark_approved(item.id, Some(note)).await?;
            approved += 1;
        }
        Ok(approved)
    }
}
