use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Reddit,
    Youtube,
    Instagram,
    Imgur,
    Pixabay,
    Bluesky,
    Giphy,
    Tumblr,
    Lemmy,
    Mastodon,
}

impl Platform {
    pub const ALL: [Platform; 10] = [
        Platform::Reddit,
        Platform::Youtube,
        Platform::Instagram,
        Platform::Imgur,
        Platform::Pixabay,
        Platform::Bluesky,
        Platform::Giphy,
        Platform::Tumblr,
        Platform::Lemmy,
        Platform::Mastodon,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Reddit => "reddit",
            Platform::Youtube => "youtube",
            Platform::Instagram => "instagram",
            Platform::Imgur => "imgur",
            Platform::Pixabay => "pixabay",
            Platform::Bluesky => "bluesky",
            Platform::Giphy => "giphy",
            Platform::Tumblr => "tumblr",
            Platform::Lemmy => "lemmy",
            Platform::Mastodon => "mastodon",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_ascii_lowercase();
        Platform::ALL
            .into_iter()
            .find(|platform| platform.as_str() == lowered)
            .ok_or_else(|| format!("unknown platform: {value}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Image,
    Video,
    Gif,
    Mixed,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Video => "video",
            ContentType::Gif => "gif",
            ContentType::Mixed => "mixed",
        }
    }

    /// Higher posts first: visual content performs best.
    pub fn posting_priority(self) -> u8 {
        match self {
            ContentType::Video => 4,
            ContentType::Image | ContentType::Gif => 3,
            ContentType::Mixed => 2,
            ContentType::Text => 1,
        }
    }

    pub fn is_visual(self) -> bool {
        !matches!(self, ContentType::Text)
    }

    /// Infers the type from which payload fields are present.
    pub fn infer(image_url: Option<&str>, video_url: Option<&str>) -> Self {
        let image = image_url.map(str::trim).filter(|url| !url.is_empty());
        let video = video_url.map(str::trim).filter(|url| !url.is_empty());
        match (image, video) {
            (Some(_), Some(_)) => ContentType::Mixed,
            (None, Some(_)) => ContentType::Video,
            (Some(url), None) => {
                let lowered = url.to_ascii_lowercase();
                if lowered.ends_with(".gif") || lowered.contains("giphy.com") {
                    ContentType::Gif
                } else {
                    ContentType::Image
                }
            }
            (None, None) => ContentType::Text,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(ContentType::Text),
            "image" => Ok(ContentType::Image),
            "video" => Ok(ContentType::Video),
            "gif" => Ok(ContentType::Gif),
            "mixed" => Ok(ContentType::Mixed),
            other => Err(format!("unknown content type: {other}")),
        }
    }
}

/// Normalized item handed over by a platform scanner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub original_url: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub content_type: Option<ContentType>,
    /// Platform-native engagement (upvotes, likes, views).
    #[serde(default)]
    pub engagement: Option<f64>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentItem {
    pub id: i64,
    pub content_hash: String,
    pub similarity_key: String,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub content_type: ContentType,
    pub source_platform: Platform,
    pub original_url: String,
    pub original_author: Option<String>,
    pub scraped_at: DateTime<Utc>,
    pub is_approved: bool,
    pub is_posted: bool,
    pub is_rejected: bool,
    pub confidence_score: f64,
    pub rejection_reason: Option<String>,
    pub admin_notes: Option<String>,
    pub flagged_patterns: Vec<String>,
    pub engagement: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl ContentItem {
    pub fn status(&self) -> ContentStatus {
        if self.is_posted {
            ContentStatus::Posted
        } else if self.is_rejected {
            ContentStatus::Rejected
        } else if self.is_approved && self.scheduled_for.is_some() {
            ContentStatus::Scheduled
        } else if self.is_approved {
            ContentStatus::Approved
        } else {
            ContentStatus::Pending
        }
    }

    pub fn is_ready_to_post(&self) -> bool {
        self.is_approved && !self.is_posted && !self.is_rejected
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewContent {
    pub content_hash: String,
    pub similarity_key: String,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub content_type: ContentType,
    pub source_platform: Platform,
    pub original_url: String,
    pub original_author: Option<String>,
    pub scraped_at: DateTime<Utc>,
    pub is_approved: bool,
    pub is_rejected: bool,
    pub confidence_score: f64,
    pub rejection_reason: Option<String>,
    pub admin_notes: Option<String>,
    pub flagged_patterns: Vec<String>,
    pub engagement: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Pending,
    Approved,
    Scheduled,
    Rejected,
    Posted,
}

impl FromStr for ContentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(ContentStatus::Pending),
            "approved" => Ok(ContentStatus::Approved),
            "scheduled" => Ok(ContentStatus::Scheduled),
            "rejected" => Ok(ContentStatus::Rejected),
            "posted" => Ok(ContentStatus::Posted),
            other => Err(format!("unknown content status: {other}")),
        }
    }
}

/// Administrative edit. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContentUpdate {
    pub text: Option<String>,
    pub admin_notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContentStats {
    pub total: u64,
    /// Awaiting a decision: neither approved nor rejected, not posted.
    pub queued: u64,
    /// Approved and not yet posted.
    pub approved: u64,
    pub posted: u64,
    pub rejected: u64,
    /// Created since the start of the current UTC day.
    pub today: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlatformDepth {
    pub platform: Platform,
    pub approved: u64,
    pub pending: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostedContent {
    pub id: i64,
    pub content_queue_id: i64,
    pub scheduled_time: String,
    pub posted_at: DateTime<Utc>,
    pub post_order: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPostedContent {
    pub content_queue_id: i64,
    pub scheduled_time: String,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledSlot {
    pub id: i64,
    pub day: NaiveDate,
    pub slot_index: i32,
    pub meal: String,
    pub content_id: Option<i64>,
    pub scheduled_post_time: DateTime<Utc>,
    pub actual_posted_at: Option<DateTime<Utc>>,
    pub reasoning: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSlot {
    pub slot_index: i32,
    pub meal: String,
    pub scheduled_post_time: DateTime<Utc>,
    pub content_id: Option<i64>,
    pub reasoning: Option<String>,
}

/// What an upsert actually changed. `filled` lists only assignments that
/// landed on a previously empty slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotUpsert {
    pub created: Vec<i32>,
    pub filled: Vec<(i32, i64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    EmptyQueue,
    LowQueue,
    HighPending,
    PostingFailure,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::EmptyQueue => "empty_queue",
            AlertType::LowQueue => "low_queue",
            AlertType::HighPending => "high_pending",
            AlertType::PostingFailure => "posting_failure",
        }
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "empty_queue" => Ok(AlertType::EmptyQueue),
            "low_queue" => Ok(AlertType::LowQueue),
            "high_pending" => Ok(AlertType::HighPending),
            "posting_failure" => Ok(AlertType::PostingFailure),
            other => Err(format!("unknown alert type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueAlert {
    pub id: i64,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub metadata: Value,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertWrite {
    Created,
    Refreshed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermError {
    pub term: String,
    pub message: String,
    pub rate_limited: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementHighlight {
    pub original_url: String,
    pub engagement: f64,
    pub text: Option<String>,
}

/// Aggregate outcome of one platform scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub platform: Platform,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub posts_found: u32,
    pub posts_processed: u32,
    pub posts_approved: u32,
    pub posts_rejected: u32,
    pub posts_flagged: u32,
    pub duplicates_found: u32,
    pub errors: Vec<TermError>,
    pub rate_limit_hit: bool,
    pub terms_scanned: Vec<String>,
    pub highest_engagement: Option<EngagementHighlight>,
}

impl ScanResult {
    pub fn new(platform: Platform, started_at: DateTime<Utc>) -> Self {
        Self {
            platform,
            started_at,
            completed_at: started_at,
            posts_found: 0,
            posts_processed: 0,
            posts_approved: 0,
            posts_rejected: 0,
            posts_flagged: 0,
            duplicates_found: 0,
            errors: Vec::new(),
            rate_limit_hit: false,
            terms_scanned: Vec::new(),
            highest_engagement: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanRecord {
    pub id: i64,
    #[serde(flatten)]
    pub result: ScanResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_round_trips_through_str() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>(), Ok(platform));
        }
        assert_eq!("Reddit".parse::<Platform>(), Ok(Platform::Reddit));
        assert!("myspace".parse::<Platform>().is_err());
    }

    #[test]
    fn infers_content_type_from_media() {
        assert_eq!(ContentType::infer(None, None), ContentType::Text);
        assert_eq!(
            ContentType::infer(Some("https://i.imgur.com/a.jpg"), None),
            ContentType::Image
        );
        assert_eq!(
            ContentType::infer(Some("https://media.giphy.com/x/200.webp"), None),
            ContentType::Gif
        );
        assert_eq!(
            ContentType::infer(None, Some("https://v.redd.it/abc")),
            ContentType::Video
        );
        assert_eq!(
            ContentType::infer(Some("https://x/a.png"), Some("https://x/a.mp4")),
            ContentType::Mixed
        );
        assert_eq!(ContentType::infer(Some("  "), None), ContentType::Text);
    }

    #[test]
    fn visual_types_outrank_text() {
        assert!(ContentType::Video.posting_priority() > ContentType::Image.posting_priority());
        assert!(ContentType::Image.posting_priority() > ContentType::Mixed.posting_priority());
        assert!(ContentType::Mixed.posting_priority() > ContentType::Text.posting_priority());
    }
}
