use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::models::Platform;

const FIELD_SEPARATOR: &str = "|";
const SIMILARITY_PREFIX_CHARS: usize = 100;

/// Fields that identify a candidate.
#[derive(Debug, Clone, Copy)]
pub struct HashInput<'a> {
    pub platform: Platform,
    pub text: Option<&'a str>,
    pub image_url: Option<&'a str>,
    pub video_url: Option<&'a str>,
    pub original_url: &'a str,
    pub author: Option<&'a str>,
}

/// Lowercases, strips punctuation and collapses whitespace.
pub fn normalize_text(text: &str) -> String {
    let stripped: String = text
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch.is_whitespace() {
                ch
            } else {
                ' '
            }
        })
        .collect();

    stripped
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn content_hash(input: &HashInput<'_>) -> String {
    let text = input.text.map(normalize_text).unwrap_or_default();
    let image_url = trimmed(input.image_url);
    let video_url = trimmed(input.video_url);
    let original_url = input.original_url.trim();
    let author = trimmed(input.author);

    let identity = [text.as_str(), image_url, video_url, original_url, author];
    if identity.iter().all(|part| part.is_empty()) {
        // Degenerate candidates must never collide with each other.
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_string();
        let salted = [hex::encode(salt).as_str(), nanos.as_str(), input.platform.as_str()]
            .join(FIELD_SEPARATOR);
        return sha256_hex(&salted);
    }

    let joined = [
        text.as_str(),
        image_url,
        video_url,
        original_url,
        input.platform.as_str(),
        author,
    ]
    .join(FIELD_SEPARATOR);
    sha256_hex(&joined)
}

/// Key for approximate matching, independent of the exact hash.
pub fn similarity_key(input: &HashInput<'_>) -> String {
    let image_url = trimmed(input.image_url);
    if !image_url.is_empty() {
        return sha256_hex(image_url);
    }

    let text = input.text.map(normalize_text).unwrap_or_default();
    if !text.is_empty() {
        let prefix: String = text.chars().take(SIMILARITY_PREFIX_CHARS).collect();
        return sha256_hex(&prefix);
    }

    sha256_hex(input.original_url.trim())
}

pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

fn trimmed(value: Option<&str>) -> &str {
    value.map(str::trim).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(text: Option<&'a str>, image_url: Option<&'a str>) -> HashInput<'a> {
        HashInput {
            platform: Platform::Reddit,
            text,
            image_url,
            video_url: None,
            original_url: "https://reddit.com/r/hotdogs/abc",
            author: Some("frank"),
        }
    }

    #[test]
    fn normalizes_case_whitespace_and_punctuation() {
        assert_eq!(
            normalize_text("  Best   HOTDOG\tin\nChicago!!! "),
            "best hotdog in chicago"
        );
        assert_eq!(normalize_text("chili-dog, w/ onions"), "chili dog w onions");
        assert_eq!(normalize_text("...!!!"), "");
    }

    #[test]
    fn hash_is_deterministic() {
        let candidate = input(Some("Chicago dog with all the fixings"), None);
        assert_eq!(content_hash(&candidate), content_hash(&candidate));
        assert_eq!(content_hash(&candidate).len(), 64);
    }

    #[test]
    fn hash_ignores_whitespace_and_casing_of_text() {
        let a = input(Some("Chicago dog with   all the fixings"), None);
        let b = input(Some("  CHICAGO DOG with all THE fixings "), None);
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_changes_with_platform_and_media() {
        let base = input(Some("hotdog"), None);
        let with_image = input(Some("hotdog"), Some("https://i.imgur.com/x.jpg"));
        let other_platform = HashInput {
            platform: Platform::Imgur,
            ..base
        };
        assert_ne!(content_hash(&base), content_hash(&with_image));
        assert_ne!(content_hash(&base), content_hash(&other_platform));
    }

    #[test]
    fn empty_candidates_never_collide() {
        let empty = HashInput {
            platform: Platform::Reddit,
            text: Some("   "),
            image_url: None,
            video_url: None,
            original_url: "",
            author: None,
        };
        assert_ne!(content_hash(&empty), content_hash(&empty));
    }

    #[test]
    fn similarity_key_prefers_image_then_text_then_url() {
        let image = input(Some("one"), Some("https://i.imgur.com/x.jpg"));
        assert_eq!(similarity_key(&image), sha256_hex("https://i.imgur.com/x.jpg"));

        let text = input(Some("Hot  Dog"), None);
        assert_eq!(similarity_key(&text), sha256_hex("hot dog"));

        let url_only = input(None, None);
        assert_eq!(
            similarity_key(&url_only),
            sha256_hex("https://reddit.com/r/hotdogs/abc")
        );
    }

    #[test]
    fn similarity_key_only_looks_at_text_prefix() {
        let long = "a".repeat(100);
        let a = format!("{long} first ending");
        let b = format!("{long} second ending");
        assert_eq!(
            similarity_key(&input(Some(&a), None)),
            similarity_key(&input(Some(&b), None))
        );
    }
}
