//! Pure text normalization for Reddit content.
//!
//! No I/O and no state: every function maps an input string to a value.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Markers Reddit substitutes for deleted or removed content.
const DELETED_PATTERNS: [&str; 3] = ["[deleted]", "[removed]", "[deleted by user]"];

/// Author names that mean the account is gone.
const DELETED_AUTHORS: [&str; 3] = ["[deleted]", "deleted", "[removed]"];

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)https?://[^\s<>\[\]"'()]+"#).unwrap());

static USER_MENTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)/?u/([A-Za-z0-9_-]+)").unwrap());

static SUBREDDIT_MENTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)/?r/([A-Za-z0-9_]+)").unwrap());

static HASHTAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"#([A-Za-z0-9_]+)").unwrap());

static MULTIPLE_SPACES_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());

static MULTIPLE_NEWLINES_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

static SENTENCE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+").unwrap());

/// Extracted `/u/` and `/r/` mentions, lower-cased, first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mentions {
    pub users: Vec<String>,
    pub subreddits: Vec<String>,
}

/// Basic counts over a piece of text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextStats {
    pub char_count: usize,
    pub word_count: usize,
    pub sentence_count: usize,
    pub paragraph_count: usize,
    pub url_count: usize,
}

/// Reddit text preprocessor: cleaning, deletion detection, extraction.
#[derive(Debug, Clone, Default)]
pub struct TextPreprocessor;

impl TextPreprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Normalize a piece of text:
    /// 1. decode HTML entities,
    /// 2. strip http/https URLs,
    /// 3. collapse runs of spaces and tabs,
    /// 4. cap blank-line runs at two newlines,
    /// 5. trim the ends.
    ///
    /// Idempotent: cleaning already-clean text is a no-op.
    pub fn clean_text(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let decoded = htmlescape::decode_html(text).unwrap_or_else(|_| text.to_string());
        let without_urls = URL_PATTERN.replace_all(&decoded, "");
        let single_spaced = MULTIPLE_SPACES_PATTERN.replace_all(&without_urls, " ");
        let capped = MULTIPLE_NEWLINES_PATTERN.replace_all(&single_spaced, "\n\n");
        capped.trim().to_string()
    }

    /// Whether the text is one of Reddit's deletion markers.
    pub fn is_deleted_content(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let normalized = text.trim().to_lowercase();
        DELETED_PATTERNS
            .iter()
            .any(|p| p.to_lowercase() == normalized)
    }

    /// `None` for deleted accounts, the trimmed name otherwise.
    pub fn normalize_author(&self, author: &str) -> Option<String> {
        let trimmed = author.trim();
        if trimmed.is_empty() {
            return None;
        }
        if DELETED_AUTHORS.contains(&trimmed.to_lowercase().as_str()) {
            return None;
        }
        Some(trimmed.to_string())
    }

    /// All http/https URLs in the text, in order.
    pub fn extract_urls(&self, text: &str) -> Vec<String> {
        URL_PATTERN
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// `/u/<name>` and `/r/<name>` mentions, lower-cased and deduplicated
    /// preserving first-seen order.
    pub fn extract_mentions(&self, text: &str) -> Mentions {
        fn collect(pattern: &Regex, text: &str) -> Vec<String> {
            let mut seen = Vec::new();
            for capture in pattern.captures_iter(text) {
                let name = capture[1].to_lowercase();
                if !seen.contains(&name) {
                    seen.push(name);
                }
            }
            seen
        }

        Mentions {
            users: collect(&USER_MENTION_PATTERN, text),
            subreddits: collect(&SUBREDDIT_MENTION_PATTERN, text),
        }
    }

    /// Strip user and subreddit mentions, then tidy the whitespace.
    pub fn remove_mentions(&self, text: &str) -> String {
        let without_users = USER_MENTION_PATTERN.replace_all(text, "");
        let without_subs = SUBREDDIT_MENTION_PATTERN.replace_all(&without_users, "");
        MULTIPLE_SPACES_PATTERN
            .replace_all(&without_subs, " ")
            .trim()
            .to_string()
    }

    /// Hashtags (without `#`), lower-cased and deduplicated. Uncommon on
    /// Reddit but some subreddits use them in titles.
    pub fn extract_hashtags(&self, text: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for capture in HASHTAG_PATTERN.captures_iter(text) {
            let tag = capture[1].to_lowercase();
            if !seen.contains(&tag) {
                seen.push(tag);
            }
        }
        seen
    }

    /// Character/word/sentence/paragraph/URL counts. Counts run over the
    /// cleaned text except `url_count`, which sees the original.
    pub fn text_stats(&self, text: &str) -> TextStats {
        if text.is_empty() {
            return TextStats::default();
        }

        let cleaned = self.clean_text(text);
        let word_count = cleaned.split_whitespace().count();
        let sentence_count = SENTENCE_PATTERN
            .split(&cleaned)
            .filter(|s| !s.trim().is_empty())
            .count();
        let paragraph_count = cleaned
            .split("\n\n")
            .filter(|p| !p.trim().is_empty())
            .count();

        TextStats {
            char_count: cleaned.chars().count(),
            word_count,
            sentence_count: if cleaned.is_empty() {
                0
            } else {
                sentence_count.max(1)
            },
            paragraph_count: if cleaned.is_empty() {
                0
            } else {
                paragraph_count.max(1)
            },
            url_count: self.extract_urls(text).len(),
        }
    }

    /// Stats as a metric map, usable directly by alert-rule evaluation.
    pub fn text_stats_map(&self, text: &str) -> HashMap<String, f64> {
        let stats = self.text_stats(text);
        HashMap::from([
            ("char_count".to_string(), stats.char_count as f64),
            ("word_count".to_string(), stats.word_count as f64),
            ("sentence_count".to_string(), stats.sentence_count as f64),
            ("paragraph_count".to_string(), stats.paragraph_count as f64),
            ("url_count".to_string(), stats.url_count as f64),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pre() -> TextPreprocessor {
        TextPreprocessor::new()
    }

    #[test]
    fn clean_text_decodes_strips_and_collapses() {
        let cleaned = pre().clean_text("Hello &amp; World!   see https://example.com/x now");
        assert_eq!(cleaned, "Hello & World! see now");
    }

    #[test]
    fn clean_text_caps_blank_line_runs() {
        let cleaned = pre().clean_text("one\n\n\n\n\ntwo");
        assert_eq!(cleaned, "one\n\ntwo");
    }

    #[test]
    fn clean_text_is_idempotent() {
        let inputs = [
            "Hello &amp; World! https://example.com",
            "spaces\t\tand\ttabs",
            "lines\n\n\n\nhere",
            "",
            "already clean text",
        ];
        let p = pre();
        for input in inputs {
            let once = p.clean_text(input);
            assert_eq!(p.clean_text(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn deletion_markers_are_case_insensitive() {
        let p = pre();
        assert!(p.is_deleted_content("[deleted]"));
        assert!(p.is_deleted_content("[Removed]"));
        assert!(p.is_deleted_content("  [DELETED BY USER]  "));
        assert!(!p.is_deleted_content("deleted scenes"));
        assert!(!p.is_deleted_content(""));
    }

    #[test]
    fn normalize_author_maps_deleted_markers_to_none() {
        let p = pre();
        assert_eq!(p.normalize_author("[deleted]"), None);
        assert_eq!(p.normalize_author("Deleted"), None);
        assert_eq!(p.normalize_author("[removed]"), None);
        assert_eq!(p.normalize_author(""), None);
        assert_eq!(p.normalize_author("  real_user "), Some("real_user".into()));
    }

    #[test]
    fn mention_extraction_lowercases_and_dedupes_in_order() {
        let text = "thanks /u/Alice and u/BOB, also /u/alice; see /r/Rust and r/python";
        let mentions = pre().extract_mentions(text);
        assert_eq!(mentions.users, vec!["alice", "bob"]);
        assert_eq!(mentions.subreddits, vec!["rust", "python"]);
    }

    #[test]
    fn urls_are_extracted_from_raw_text() {
        let urls = pre().extract_urls("a https://x.test/a and http://y.test/b?q=1 done");
        assert_eq!(urls, vec!["https://x.test/a", "http://y.test/b?q=1"]);
    }

    #[test]
    fn remove_mentions_strips_and_tidies() {
        assert_eq!(pre().remove_mentions("ping /u/alice  in /r/rust"), "ping in");
    }

    #[test]
    fn hashtags_are_rare_but_supported() {
        assert_eq!(
            pre().extract_hashtags("#Rust news #rust #2024"),
            vec!["rust", "2024"]
        );
    }

    #[test]
    fn text_stats_counts_the_documented_boundaries() {
        let stats = pre().text_stats("One sentence. Two! Three?\n\nNew paragraph https://a.test");
        // "New paragraph" has no terminator but still counts as a fragment.
        assert_eq!(stats.sentence_count, 4);
        assert_eq!(stats.paragraph_count, 2);
        assert_eq!(stats.url_count, 1);
        assert!(stats.word_count >= 7);

        assert_eq!(pre().text_stats(""), TextStats::default());
    }
}
