use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{RenderedDocument, TurnElement};
use crate::mode::{DEFAULT_MODE, ModeDetector};

const CHARS_PER_TOKEN: u64 = 4;

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Observed totals of one conversation at one scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub turns: u64,
    pub message_count: u64,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "epoch", with = "chrono::serde::ts_milliseconds")]
    pub last_updated: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(
        id: &str,
        timestamp: DateTime<Utc>,
        input_tokens: u64,
        output_tokens: u64,
        turns: u64,
        message_count: u64,
        mode: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            timestamp,
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            turns,
            message_count,
            mode: mode.to_string(),
            last_updated: timestamp,
        }
    }

    /// Baseline used when a session has never been stored.
    pub fn empty(id: &str) -> Self {
        Self::new(id, epoch(), 0, 0, 0, 0, DEFAULT_MODE)
    }
}

fn default_mode() -> String {
    DEFAULT_MODE.to_string()
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
    Other,
}

impl TurnRole {
    pub fn from_attribute(value: &str) -> Self {
        match value.trim() {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTurn {
    pub index: usize,
    pub role: TurnRole,
    pub length: usize,
    pub tokens: u64,
}

/// Turns a rendered document into classified, costed turns.
pub trait TurnExtractor {
    /// Number of turn elements currently rendered, extractable or not.
    fn rendered_count(&self, document: &RenderedDocument) -> usize;
    fn extract(&self, document: &RenderedDocument) -> Vec<ExtractedTurn>;
}

/// Re-reads every rendered turn on every scan.
#[derive(Debug, Clone, Default)]
pub struct FullScanExtractor;

impl FullScanExtractor {
    fn content_of(element: &TurnElement, role: TurnRole) -> Option<&str> {
        element.markdown.as_deref().or_else(|| {
            if role == TurnRole::User {
                element.plain_text.as_deref()
            } else {
                None
            }
        })
    }
}

impl TurnExtractor for FullScanExtractor {
    fn rendered_count(&self, document: &RenderedDocument) -> usize {
        document.turns.len()
    }

    fn extract(&self, document: &RenderedDocument) -> Vec<ExtractedTurn> {
        document
            .turns
            .iter()
            .enumerate()
            .filter_map(|(index, element)| {
                let role = TurnRole::from_attribute(&element.author_role);
                let Some(text) = Self::content_of(element, role) else {
                    debug!(index, role = %element.author_role, "turn has no content container");
                    return None;
                };
                Some(ExtractedTurn {
                    index,
                    role,
                    length: text.chars().count(),
                    tokens: estimate_tokens(text),
                })
            })
            .collect()
    }
}

pub struct SnapshotBuilder {
    extractor: Box<dyn TurnExtractor + Send + Sync>,
    detector: ModeDetector,
}

impl SnapshotBuilder {
    pub fn new(extractor: Box<dyn TurnExtractor + Send + Sync>, detector: ModeDetector) -> Self {
        Self {
            extractor,
            detector,
        }
    }

    /// Builds the current snapshot for `session_id`, or `None` when the page
    /// has no rendered turns yet.
    pub fn build(
        &self,
        session_id: &str,
        document: &RenderedDocument,
        now: DateTime<Utc>,
    ) -> Option<SessionSnapshot> {
        if self.extractor.rendered_count(document) == 0 {
            return None;
        }

        let turns = self.extractor.extract(document);
        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;
        let mut assistant_turns = 0u64;
        for turn in &turns {
            match turn.role {
                TurnRole::User => input_tokens += turn.tokens,
                TurnRole::Assistant => {
                    output_tokens += turn.tokens;
                    assistant_turns += 1;
                }
                TurnRole::Other => {}
            }
        }

        let mode = self.detector.detect(document);
        Some(SessionSnapshot::new(
            session_id,
            now,
            input_tokens,
            output_tokens,
            assistant_turns,
            turns.len() as u64,
            &mode,
        ))
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new(Box::new(FullScanExtractor), ModeDetector::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn page(turns: Vec<TurnElement>) -> RenderedDocument {
        RenderedDocument {
            location: "https://chatgpt.com/c/abc".to_string(),
            model_selector: None,
            body_text: String::new(),
            turns,
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(160)), 40);
    }

    #[test]
    fn token_estimate_counts_characters_not_bytes() {
        assert_eq!(estimate_tokens("日本語です"), 2);
    }

    #[test]
    fn builds_snapshot_from_user_and_assistant_turns() {
        let builder = SnapshotBuilder::default();
        let doc = page(vec![
            TurnElement::new("user", None, Some(&"q".repeat(40))),
            TurnElement::new("assistant", Some(&"a".repeat(160)), None),
            TurnElement::new("user", Some("hey"), None),
        ]);

        let snapshot = builder.build("abc", &doc, at()).expect("snapshot");
        assert_eq!(snapshot.id, "abc");
        assert_eq!(snapshot.input_tokens, 11);
        assert_eq!(snapshot.output_tokens, 40);
        assert_eq!(snapshot.total_tokens, 51);
        assert_eq!(snapshot.turns, 1);
        assert_eq!(snapshot.message_count, 3);
        assert_eq!(snapshot.mode, "Default");
        assert_eq!(snapshot.timestamp, at());
        assert_eq!(snapshot.last_updated, at());
    }

    #[test]
    fn turns_without_content_are_skipped() {
        let builder = SnapshotBuilder::default();
        let doc = page(vec![
            TurnElement::new("assistant", None, Some("plain fallback is user only")),
            TurnElement::new("user", None, None),
            TurnElement::new("assistant", Some("ok"), None),
        ]);

        let snapshot = builder.build("abc", &doc, at()).expect("snapshot");
        assert_eq!(snapshot.message_count, 1);
        assert_eq!(snapshot.turns, 1);
        assert_eq!(snapshot.input_tokens, 0);
        assert_eq!(snapshot.output_tokens, 1);
    }

    #[test]
    fn other_roles_count_as_messages_without_tokens() {
        let builder = SnapshotBuilder::default();
        let doc = page(vec![
            TurnElement::new("system", Some("hidden instructions"), None),
            TurnElement::new("tool", Some("result"), None),
        ]);

        let snapshot = builder.build("abc", &doc, at()).expect("snapshot");
        assert_eq!(snapshot.message_count, 2);
        assert_eq!(snapshot.total_tokens, 0);
        assert_eq!(snapshot.turns, 0);
        assert!(snapshot.turns <= snapshot.message_count);
    }

    #[test]
    fn empty_page_produces_nothing() {
        let builder = SnapshotBuilder::default();
        assert!(builder.build("abc", &page(Vec::new()), at()).is_none());
    }

    #[test]
    fn snapshot_serializes_in_camel_case_with_millisecond_timestamps() {
        let snapshot = SessionSnapshot::new("abc", at(), 10, 40, 1, 2, "gpt-4");
        let value = serde_json::to_value(&snapshot).expect("serialize");
        assert_eq!(value["inputTokens"], 10);
        assert_eq!(value["totalTokens"], 50);
        assert_eq!(value["messageCount"], 2);
        assert_eq!(value["timestamp"], at().timestamp_millis());

        let parsed: SessionSnapshot = serde_json::from_value(serde_json::json!({
            "id": "abc",
            "timestamp": at().timestamp_millis(),
            "inputTokens": 1,
            "outputTokens": 2,
            "totalTokens": 3,
            "turns": 1,
            "messageCount": 2
        }))
        .expect("deserialize");
        assert_eq!(parsed.mode, "Default");
    }
}
