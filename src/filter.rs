use std::sync::Arc;

use regex::Regex;
use serde::Serialize;

use crate::dedup::Candidate;
use crate::hashing::normalize_text;

/// Classification of one candidate before any approval decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterVerdict {
    pub is_valid: bool,
    pub confidence_score: f64,
    pub flagged_patterns: Vec<String>,
    pub rejection_reason: Option<String>,
}

impl FilterVerdict {
    fn invalid(confidence: f64, flags: Vec<String>, reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            confidence_score: confidence,
            flagged_patterns: flags,
            rejection_reason: Some(reason.into()),
        }
    }
}

/// Domain policy consulted by [`FilterAndScorer`].
pub trait ContentPolicy: Send + Sync + 'static {
    fn evaluate(&self, text: Option<&str>, has_media: bool) -> FilterVerdict;
}

/// Keyword and pattern policy for hotdog content.
pub struct KeywordPolicy {
    spam: Vec<(&'static str, Regex)>,
    inappropriate: Regex,
    unrelated: Regex,
    keywords: Regex,
}

impl KeywordPolicy {
    pub fn new() -> Result<Self, regex::Error> {
        let spam = vec![
            (
                "spam:call_to_action",
                Regex::new(r"(?i)\b(buy now|click here|order now|limited time offer|act fast)\b")?,
            ),
            (
                "spam:promo",
                Regex::new(r"(?i)\b(promo code|discount code|coupon code|free money|giveaway)\b")?,
            ),
            (
                "spam:link_shortener",
                Regex::new(r"(?i)https?://(bit\.ly|tinyurl\.com|t\.co|goo\.gl)/")?,
            ),
            (
                "spam:follow_bait",
                Regex::new(r"(?i)\b(follow|like|sub)\s*(for|4)\s*(follow|like|sub)\b")?,
            ),
            ("spam:shouting", Regex::new(r"[!?$]{4,}")?),
        ];
        let inappropriate =
            Regex::new(r"\b(nsfw|porn|porno|xxx|nude|nudes|onlyfans|gore)\b")?;
        let unrelated = Regex::new(
            r"\b(puppy|puppies|dachshund|doggo|vet|veterinarian|heatstroke|heat stroke|overheated|dog park|leash)\b",
        )?;
        let keywords = Regex::new(
            r"\b(hot ?dogs?|frankfurters?|franks?|wieners?|weiners?|bratwursts?|corn ?dogs?|chili ?dogs?|chicago dogs?|sausages?|glizzy|glizzies|coney dogs?)\b",
        )?;
        Ok(Self {
            spam,
            inappropriate,
            unrelated,
            keywords,
        })
    }
}

impl ContentPolicy for KeywordPolicy {
    fn evaluate(&self, text: Option<&str>, has_media: bool) -> FilterVerdict {
        let raw = text.map(str::trim).unwrap_or_default();
        let normalized = normalize_text(raw);
        let mut flags = Vec::new();

        for (name, pattern) in &self.spam {
            if pattern.is_match(raw) {
                flags.push((*name).to_string());
            }
        }
        if !flags.is_empty() {
            return FilterVerdict::invalid(0.1, flags, "Spam pattern detected");
        }

        if let Some(hit) = self.inappropriate.find(&normalized) {
            flags.push(format!("inappropriate:{}", hit.as_str()));
            return FilterVerdict::invalid(0.0, flags, "Inappropriate content");
        }

        let unrelated = self.unrelated.find(&normalized).map(|hit| hit.as_str().to_string());
        if let Some(term) = &unrelated {
            flags.push(format!("unrelated:{term}"));
        }

        if normalized.is_empty() {
            // Media without a caption cannot be checked for keywords.
            return FilterVerdict {
                is_valid: has_media,
                confidence_score: if has_media { 0.6 } else { 0.0 },
                flagged_patterns: flags,
                rejection_reason: (!has_media).then(|| "Empty content".to_string()),
            };
        }

        let hits = self.keywords.find_iter(&normalized).count();
        if hits == 0 {
            flags.push("no_keyword".to_string());
            if !has_media {
                return FilterVerdict::invalid(0.1, flags, "No hotdog keywords found");
            }
        }

        let mut confidence = if hits == 0 { 0.25 } else { 0.5 };
        confidence += 0.1 * hits.min(3) as f64;
        if has_media {
            confidence += 0.1;
        }
        let length = normalized.chars().count();
        if (20..=280).contains(&length) {
            confidence += 0.05;
        }
        if unrelated.is_some() {
            confidence -= 0.3;
        }
        let confidence = (confidence.clamp(0.0, 1.0) * 100.0).round() / 100.0;

        if unrelated.is_some() && hits == 0 {
            return FilterVerdict::invalid(confidence, flags, "Unrelated to hotdogs");
        }

        FilterVerdict {
            is_valid: true,
            confidence_score: confidence,
            flagged_patterns: flags,
            rejection_reason: None,
        }
    }
}

/// What ingest does with a scored candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Approved,
    Pending,
    Rejected(String),
}

#[derive(Clone)]
pub struct FilterAndScorer {
    policy: Arc<dyn ContentPolicy>,
    approval_threshold: f64,
    auto_approve_threshold: f64,
}

impl FilterAndScorer {
    pub fn new(
        policy: Arc<dyn ContentPolicy>,
        approval_threshold: f64,
        auto_approve_threshold: f64,
    ) -> Self {
        Self {
            policy,
            approval_threshold,
            auto_approve_threshold,
        }
    }

    pub fn score(&self, candidate: &Candidate) -> FilterVerdict {
        self.policy.evaluate(candidate.text(), candidate.has_media())
    }

    pub fn disposition(&self, verdict: &FilterVerdict) -> Disposition {
        if !verdict.is_valid {
            return Disposition::Rejected(
                verdict
                    .rejection_reason
                    .clone()
                    .unwrap_or_else(|| "Rejected by content policy".to_string()),
            );
        }
        if verdict.confidence_score < self.approval_threshold {
            return Disposition::Rejected(format!(
                "Confidence {:.2} below approval threshold {:.2}",
                verdict.confidence_score, self.approval_threshold
            ));
        }
        if verdict.confidence_score >= self.auto_approve_threshold
            && verdict.flagged_patterns.is_empty()
        {
            return Disposition::Approved;
        }
        Disposition::Pending
    }
}
