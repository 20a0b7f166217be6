//! Duplicate detection against already-queued content.
//!
//! Strategies run in order and stop at the first match: content hash,
//! image URL, original URL, then fuzzy text overlap.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::{StoreResult, ValidationError};
use crate::hashing::{content_hash, normalize_text, similarity_key, HashInput};
use crate::models::{ContentType, Platform, RawItem};
use crate::store::ContentStore;

/// Texts shorter than this (normalized chars) skip fuzzy matching.
pub const FUZZY_MIN_TEXT_CHARS: usize = 20;
pub const FUZZY_PREFIX_CHARS: usize = 50;
pub const FUZZY_CANDIDATE_LIMIT: usize = 5;
pub const FUZZY_RATIO_THRESHOLD: f64 = 0.9;

/// A scanned item with its identity computed, ready for dedup and scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub platform: Platform,
    pub raw: RawItem,
    pub content_type: ContentType,
    pub content_hash: String,
    pub similarity_key: String,
    pub normalized_text: String,
}

impl Candidate {
    pub fn from_raw(platform: Platform, raw: RawItem) -> Result<Self, ValidationError> {
        let text = non_blank(raw.text.as_deref());
        let image_url = non_blank(raw.image_url.as_deref());
        let video_url = non_blank(raw.video_url.as_deref());

        if raw.original_url.trim().is_empty() {
            return Err(ValidationError::MissingUrl);
        }
        if text.is_none() && image_url.is_none() && video_url.is_none() {
            return Err(ValidationError::NoPayload);
        }

        let input = HashInput {
            platform,
            text,
            image_url,
            video_url,
            original_url: raw.original_url.trim(),
            author: non_blank(raw.author.as_deref()),
        };
        let content_hash = content_hash(&input);
        let similarity_key = similarity_key(&input);
        let normalized_text = text.map(normalize_text).unwrap_or_default();
        let content_type = raw
            .content_type
            .unwrap_or_else(|| ContentType::infer(image_url, video_url));

        Ok(Self {
            platform,
            content_type,
            content_hash,
            similarity_key,
            normalized_text,
            raw,
        })
    }

    pub fn text(&self) -> Option<&str> {
        non_blank(self.raw.text.as_deref())
    }

    pub fn image_url(&self) -> Option<&str> {
        non_blank(self.raw.image_url.as_deref())
    }

    pub fn video_url(&self) -> Option<&str> {
        non_blank(self.raw.video_url.as_deref())
    }

    pub fn has_media(&self) -> bool {
        self.image_url().is_some() || self.video_url().is_some()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub reason: Option<String>,
    pub existing_id: Option<i64>,
}

impl DuplicateCheck {
    pub fn unique() -> Self {
        Self {
            is_duplicate: false,
            reason: None,
            existing_id: None,
        }
    }

    pub fn duplicate(reason: impl Into<String>, existing_id: Option<i64>) -> Self {
        Self {
            is_duplicate: true,
            reason: Some(reason.into()),
            existing_id,
        }
    }
}

#[derive(Clone)]
pub struct DuplicateDetector {
    store: Arc<dyn ContentStore>,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    pub async fn check(&self, candidate: &Candidate) -> StoreResult<DuplicateCheck> {
        if let Some(existing) = self.store.find_by_hash(&candidate.content_hash).await? {
            return Ok(DuplicateCheck::duplicate(
                "Same content hash",
                Some(existing.id),
            ));
        }

        if let Some(image_url) = candidate.image_url() {
            if let Some(existing) = self.store.find_by_image_url(image_url).await? {
                return Ok(DuplicateCheck::duplicate("Same image URL", Some(existing.id)));
            }
        }

        if let Some(existing) = self
            .store
            .find_by_url(candidate.raw.original_url.trim())
            .await?
        {
            return Ok(DuplicateCheck::duplicate(
                "Same original URL",
                Some(existing.id),
            ));
        }

        if candidate.normalized_text.chars().count() < FUZZY_MIN_TEXT_CHARS {
            return Ok(DuplicateCheck::unique());
        }

        let prefix: String = candidate
            .normalized_text
            .chars()
            .take(FUZZY_PREFIX_CHARS)
            .collect();
        let neighbours = self
            .store
            .find_by_text_prefix(&prefix, FUZZY_CANDIDATE_LIMIT)
            .await?;
        for existing in neighbours {
            let Some(stored) = existing.text.as_deref() else {
                continue;
            };
            let ratio = overlap_ratio(&candidate.normalized_text, &normalize_text(stored));
            debug!(existing_id = existing.id, ratio, "fuzzy text comparison");
            if ratio > FUZZY_RATIO_THRESHOLD {
                return Ok(DuplicateCheck::duplicate(
                    format!("Very similar text ({:.1}% overlap)", ratio * 100.0),
                    Some(existing.id),
                ));
            }
        }

        Ok(DuplicateCheck::unique())
    }
}

/// Share of `candidate` characters that occur anywhere in `stored`,
/// over the longer of the two lengths.
pub fn overlap_ratio(candidate: &str, stored: &str) -> f64 {
    let candidate_len = candidate.chars().count();
    let stored_len = stored.chars().count();
    let longest = candidate_len.max(stored_len);
    if longest == 0 {
        return 0.0;
    }
    let stored_chars: HashSet<char> = stored.chars().collect();
    let found = candidate
        .chars()
        .filter(|ch| stored_chars.contains(ch))
        .count();
    found as f64 / longest as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::NewContent;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn raw(text: Option<&str>, image: Option<&str>, url: &str) -> RawItem {
        RawItem {
            text: text.map(str::to_string),
            image_url: image.map(str::to_string),
            original_url: url.to_string(),
            ..RawItem::default()
        }
    }

    fn stored(candidate: &Candidate) -> NewContent {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        NewContent {
            content_hash: candidate.content_hash.clone(),
            similarity_key: candidate.similarity_key.clone(),
            text: candidate.raw.text.clone(),
            image_url: candidate.raw.image_url.clone(),
            video_url: None,
            content_type: candidate.content_type,
            source_platform: candidate.platform,
            original_url: candidate.raw.original_url.clone(),
            original_author: None,
            scraped_at: now,
            is_approved: false,
            is_rejected: false,
            confidence_score: 0.7,
            rejection_reason: None,
            admin_notes: None,
            flagged_patterns: Vec::new(),
            engagement: None,
        }
    }

    fn detector() -> (Arc<MemoryStore>, DuplicateDetector) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let store = Arc::new(MemoryStore::new(Arc::new(clock)));
        let detector = DuplicateDetector::new(store.clone());
        (store, detector)
    }

    #[test]
    fn rejects_candidates_without_url_or_payload() {
        assert_eq!(
            Candidate::from_raw(Platform::Reddit, raw(Some("hotdog"), None, "  ")),
            Err(ValidationError::MissingUrl)
        );
        assert_eq!(
            Candidate::from_raw(Platform::Reddit, raw(Some("   "), None, "https://x/1")),
            Err(ValidationError::NoPayload)
        );
    }

    #[test]
    fn overlap_ratio_uses_longer_length() {
        assert_eq!(overlap_ratio("", ""), 0.0);
        assert_eq!(overlap_ratio("abc", "abc"), 1.0);
        assert!((overlap_ratio("ab", "abcd") - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn same_image_url_wins_over_different_text() {
        let (store, detector) = detector();
        let first = Candidate::from_raw(
            Platform::Imgur,
            raw(
                Some("a glorious chili dog"),
                Some("https://i.imgur.com/x.jpg"),
                "https://imgur.com/a",
            ),
        )
        .unwrap();
        let created = store.create(stored(&first)).await.unwrap();

        let second = Candidate::from_raw(
            Platform::Reddit,
            raw(
                Some("totally different caption"),
                Some("https://i.imgur.com/x.jpg"),
                "https://reddit.com/b",
            ),
        )
        .unwrap();
        let check = detector.check(&second).await.unwrap();
        assert!(check.is_duplicate);
        assert_eq!(check.reason.as_deref(), Some("Same image URL"));
        assert_eq!(check.existing_id, Some(created.id));
    }

    #[tokio::test]
    async fn short_text_skips_fuzzy_matching() {
        let (store, detector) = detector();
        let first = Candidate::from_raw(
            Platform::Reddit,
            raw(Some("hot dog time"), None, "https://r/1"),
        )
        .unwrap();
        store.create(stored(&first)).await.unwrap();

        let second = Candidate::from_raw(
            Platform::Reddit,
            raw(Some("hot dog time!"), None, "https://r/2"),
        )
        .unwrap();
        assert!(!detector.check(&second).await.unwrap().is_duplicate);
    }
}
