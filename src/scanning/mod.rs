//! Platform scans: per-platform mutual exclusion plus the
//! fetch, dedup, score and persist loop for each search term.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{PipelineConfig, PlatformConfig};
use crate::dedup::{Candidate, DuplicateDetector};
use crate::error::{ScanError, StoreError, StoreResult};
use crate::filter::{Disposition, FilterAndScorer};
use crate::models::{EngagementHighlight, NewContent, Platform, RawItem, ScanResult, TermError};
use crate::store::{ContentStore, ScanHistoryStore};

mod http;

pub use http::HttpScanner;

#[async_trait]
pub trait PlatformScanner: Send + Sync + 'static {
    /// Errors mentioning a rate limit flag the whole scan as rate limited.
    async fn search(&self, term: &str, limit: usize) -> anyhow::Result<Vec<RawItem>>;
}

pub type ScannerRegistry = HashMap<Platform, Arc<dyn PlatformScanner>>;

pub fn is_rate_limit_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("rate limit")
        || lowered.contains("ratelimit")
        || lowered.contains("too many requests")
        || has_status_429(&lowered)
}

/// Matches 429 only as a status code, e.g. `HTTP 429` or `status: 429`.
fn has_status_429(lowered: &str) -> bool {
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect();
    tokens.windows(2).any(|pair| {
        pair[1] == "429" && matches!(pair[0], "http" | "status" | "code" | "error")
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScanPhase {
    Idle,
    Scanning { started_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed {
        at: DateTime<Utc>,
        posts_processed: u32,
        errors: usize,
    },
    Failed {
        at: DateTime<Utc>,
        error: String,
    },
}

#[derive(Debug, Clone)]
struct PlatformState {
    phase: ScanPhase,
    last_outcome: Option<ScanOutcome>,
}

impl Default for PlatformState {
    fn default() -> Self {
        Self {
            phase: ScanPhase::Idle,
            last_outcome: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformScanStatus {
    pub platform: Platform,
    pub phase: ScanPhase,
    pub last_outcome: Option<ScanOutcome>,
    pub is_enabled: bool,
    pub is_authenticated: bool,
    pub has_scanner: bool,
}

/// Held for the duration of one scan. Dropping it returns the platform to idle.
struct ScanPermit<'a> {
    coordinator: &'a ScanCoordinator,
    platform: Platform,
    outcome: Option<ScanOutcome>,
}

impl ScanPermit<'_> {
    fn finish(mut self, outcome: ScanOutcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for ScanPermit<'_> {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or_else(|| ScanOutcome::Failed {
            at: self.coordinator.clock.now(),
            error: "scan aborted".to_string(),
        });
        let mut states = self.coordinator.lock_states();
        let state = states.entry(self.platform).or_default();
        state.phase = ScanPhase::Idle;
        state.last_outcome = Some(outcome);
    }
}

pub struct ScanCoordinator {
    content: Arc<dyn ContentStore>,
    history: Arc<dyn ScanHistoryStore>,
    detector: DuplicateDetector,
    scorer: FilterAndScorer,
    config: Arc<PipelineConfig>,
    scanners: ScannerRegistry,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
    states: Mutex<HashMap<Platform, PlatformState>>,
}

impl ScanCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        content: Arc<dyn ContentStore>,
        history: Arc<dyn ScanHistoryStore>,
        scorer: FilterAndScorer,
        config: Arc<PipelineConfig>,
        scanners: ScannerRegistry,
        clock: Arc<dyn Clock>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            detector: DuplicateDetector::new(content.clone()),
            content,
            history,
            scorer,
            config,
            scanners,
            clock,
            call_timeout,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<Platform, PlatformState>> {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Moves `platform` from idle to scanning. Returns false if a scan is
    /// already running; this is the only way to enter the scanning state.
    pub fn try_begin_scan(&self, platform: Platform) -> bool {
        let mut states = self.lock_states();
        let state = states.entry(platform).or_default();
        if matches!(state.phase, ScanPhase::Scanning { .. }) {
            return false;
        }
        state.phase = ScanPhase::Scanning {
            started_at: self.clock.now(),
        };
        true
    }

    fn begin(&self, platform: Platform) -> Result<ScanPermit<'_>, ScanError> {
        if !self.try_begin_scan(platform) {
            return Err(ScanError::InProgress(platform));
        }
        Ok(ScanPermit {
            coordinator: self,
            platform,
            outcome: None,
        })
    }

    pub fn is_scanning(&self, platform: Platform) -> bool {
        self.lock_states()
            .get(&platform)
            .is_some_and(|state| matches!(state.phase, ScanPhase::Scanning { .. }))
    }

    pub fn status(&self) -> Vec<PlatformScanStatus> {
        let states = self.lock_states();
        Platform::ALL
            .iter()
            .map(|platform| {
                let state = states.get(platform).cloned().unwrap_or_default();
                let config = self.config.platform(*platform);
                PlatformScanStatus {
                    platform: *platform,
                    phase: state.phase,
                    last_outcome: state.last_outcome,
                    is_enabled: config.is_some_and(|config| config.is_enabled),
                    is_authenticated: config.is_some_and(PlatformConfig::is_authenticated),
                    has_scanner: self.scanners.contains_key(platform),
                }
            })
            .collect()
    }

    /// Enabled, authenticated platforms whose scan interval has elapsed.
    pub async fn due_platforms(&self) -> StoreResult<Vec<Platform>> {
        let now = self.clock.now();
        let mut due = Vec::new();
        for config in &self.config.platforms {
            let platform = config.platform();
            if !config.is_enabled
                || !config.is_authenticated()
                || !self.scanners.contains_key(&platform)
                || self.is_scanning(platform)
            {
                continue;
            }
            let interval = chrono::Duration::minutes(i64::from(config.scan_interval_minutes));
            let is_due = match self.history.last_scan(platform).await? {
                Some(record) => record.result.completed_at + interval <= now,
                None => true,
            };
            if is_due {
                due.push(platform);
            }
        }
        Ok(due)
    }

    pub async fn scan(&self, platform: Platform) -> Result<ScanResult, ScanError> {
        let permit = self.begin(platform)?;
        info!(%platform, "scan started");
        let outcome = self.run_scan(platform).await;
        let now = self.clock.now();
        match &outcome {
            Ok(result) => {
                info!(
                    %platform,
                    found = result.posts_found,
                    approved = result.posts_approved,
                    rejected = result.posts_rejected,
                    duplicates = result.duplicates_found,
                    errors = result.errors.len(),
                    rate_limited = result.rate_limit_hit,
                    "scan completed"
                );
                permit.finish(ScanOutcome::Completed {
                    at: now,
                    posts_processed: result.posts_processed,
                    errors: result.errors.len(),
                });
            }
            Err(err) => {
                warn!(%platform, error = %err, "scan failed");
                permit.finish(ScanOutcome::Failed {
                    at: now,
                    error: err.to_string(),
                });
            }
        }
        outcome
    }

    async fn run_scan(&self, platform: Platform) -> Result<ScanResult, ScanError> {
        let config = self
            .config
            .platform(platform)
            .ok_or(ScanError::NotConfigured(platform))?;
        if !config.is_enabled {
            return Err(ScanError::Disabled(platform));
        }
        if !config.is_authenticated() {
            return Err(ScanError::NotAuthenticated(platform));
        }
        let scanner = self
            .scanners
            .get(&platform)
            .cloned()
            .ok_or(ScanError::NoScanner(platform))?;

        let mut result = ScanResult::new(platform, self.clock.now());
        let mut budget = config.max_items_per_scan;

        for term in config.search_terms() {
            if budget == 0 {
                debug!(%platform, "item budget exhausted");
                break;
            }
            result.terms_scanned.push(term.clone());

            let items = match tokio::time::timeout(self.call_timeout, scanner.search(&term, budget))
                .await
            {
                Ok(Ok(items)) => items,
                Ok(Err(err)) => {
                    record_term_error(&mut result, &term, format!("{err:#}"));
                    continue;
                }
                Err(_) => {
                    record_term_error(
                        &mut result,
                        &term,
                        format!("search timed out after {}s", self.call_timeout.as_secs()),
                    );
                    continue;
                }
            };

            let items: Vec<RawItem> = items.into_iter().take(budget).collect();
            budget -= items.len();
            result.posts_found += items.len() as u32;

            for raw in items {
                if let Err(err) = self.ingest(platform, config, raw, &mut result).await {
                    record_term_error(&mut result, &term, err.to_string());
                    break;
                }
            }
        }

        result.completed_at = self.clock.now();
        if let Err(err) = self.history.record(&result).await {
            warn!(%platform, error = %err, "failed to record scan history");
        }
        Ok(result)
    }

    async fn ingest(
        &self,
        platform: Platform,
        config: &PlatformConfig,
        raw: RawItem,
        result: &mut ScanResult,
    ) -> StoreResult<()> {
        result.posts_processed += 1;
        let engagement = raw.engagement;

        let candidate = match Candidate::from_raw(platform, raw) {
            Ok(candidate) => candidate,
            Err(err) => {
                debug!(%platform, error = %err, "dropping malformed candidate");
                result.posts_rejected += 1;
                return Ok(());
            }
        };

        let check = self.detector.check(&candidate).await?;
        if check.is_duplicate {
            debug!(
                %platform,
                reason = check.reason.as_deref().unwrap_or_default(),
                existing_id = check.existing_id,
                "duplicate skipped"
            );
            result.duplicates_found += 1;
            return Ok(());
        }

        let verdict = self.scorer.score(&candidate);
        let mut disposition = self.scorer.disposition(&verdict);
        if config.min_score > 0.0 && !matches!(disposition, Disposition::Rejected(_)) {
            let score = engagement.unwrap_or(0.0);
            if score < config.min_score {
                disposition = Disposition::Rejected(format!(
                    "Engagement {score} below platform minimum {}",
                    config.min_score
                ));
            }
        }

        let (is_approved, is_rejected, rejection_reason) = match &disposition {
            Disposition::Approved => (true, false, None),
            Disposition::Pending => (false, false, None),
            Disposition::Rejected(reason) => (false, true, Some(reason.clone())),
        };
        let flagged = !verdict.flagged_patterns.is_empty();

        let new = NewContent {
            content_hash: candidate.content_hash.clone(),
            similarity_key: candidate.similarity_key.clone(),
            text: candidate.text().map(str::to_string),
            image_url: candidate.image_url().map(str::to_string),
            video_url: candidate.video_url().map(str::to_string),
            content_type: candidate.content_type,
            source_platform: platform,
            original_url: candidate.raw.original_url.trim().to_string(),
            original_author: candidate.raw.author.clone(),
            scraped_at: self.clock.now(),
            is_approved,
            is_rejected,
            confidence_score: verdict.confidence_score,
            rejection_reason,
            admin_notes: None,
            flagged_patterns: verdict.flagged_patterns,
            engagement,
        };

        let item = match self.content.create(new).await {
            Ok(item) => item,
            Err(StoreError::Duplicate { hash }) => {
                debug!(%platform, %hash, "duplicate caught by unique constraint");
                result.duplicates_found += 1;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        if flagged {
            result.posts_flagged += 1;
        }
        match disposition {
            Disposition::Approved => result.posts_approved += 1,
            Disposition::Rejected(_) => result.posts_rejected += 1,
            Disposition::Pending => {}
        }

        if let Some(score) = engagement.filter(|_| !item.is_rejected) {
            let beats = result
                .highest_engagement
                .as_ref()
                .map_or(true, |best| score > best.engagement);
            if beats {
                result.highest_engagement = Some(EngagementHighlight {
                    original_url: item.original_url.clone(),
                    engagement: score,
                    text: item.text.clone(),
                });
            }
        }
        Ok(())
    }
}

fn record_term_error(result: &mut ScanResult, term: &str, message: String) {
    let rate_limited = is_rate_limit_message(&message);
    if rate_limited {
        result.rate_limit_hit = true;
    }
    warn!(platform = %result.platform, term, error = %message, rate_limited, "search term failed");
    result.errors.push(TermError {
        term: term.to_string(),
        message,
        rate_limited,
    });
}
