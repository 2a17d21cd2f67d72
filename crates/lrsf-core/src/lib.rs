//! Core domain model and handoff contracts for LRSF.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "lrsf-core";

/// Raw post exactly as the collector hands it over. Every field is optional;
/// deduplication needs at least one of text, permalink or post id to work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPost {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_title: Option<String>,
    #[serde(default)]
    pub author_profile_url: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub company_url: Option<String>,
    #[serde(default)]
    pub date_text: Option<String>,
    #[serde(default)]
    pub permalink_url: Option<String>,
    #[serde(default)]
    pub post_urn_or_id: Option<String>,
    #[serde(default)]
    pub declared_language: Option<String>,
}

impl RawPost {
    /// True when the post carries enough identity for duplicate detection.
    pub fn is_dedupable(&self) -> bool {
        let has = |field: &Option<String>| {
            field
                .as_deref()
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false)
        };
        has(&self.text) || has(&self.permalink_url) || has(&self.post_urn_or_id)
    }
}

/// Cleaned field value with the normalizer's confidence in it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extracted<T> {
    pub value: Option<T>,
    pub confidence: f64,
}

impl<T> Extracted<T> {
    pub fn missing() -> Self {
        Self {
            value: None,
            confidence: 0.0,
        }
    }

    pub fn with(value: T, confidence: f64) -> Self {
        Self {
            value: Some(value),
            confidence,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.value.is_some() && self.confidence > 0.0
    }
}

/// Parsed post date: instant, derived age, and parse confidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDate {
    pub parsed_at: Option<DateTime<Utc>>,
    pub age_hours: Option<f64>,
    pub confidence: f64,
}

impl ExtractedDate {
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.parsed_at.is_some() && self.confidence > 0.0
    }
}

/// Post identifier recovered from a permalink or URN, or synthesized from
/// content when neither is recognizable. Synthesized ids stay below 0.9
/// confidence so signature priority keeps preferring real ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPermalink {
    pub post_id: Option<String>,
    pub is_activity: bool,
    pub confidence: f64,
}

impl ExtractedPermalink {
    pub fn missing() -> Self {
        Self::default()
    }

    /// Id usable for signature priority: real extracted ids only, never the
    /// content-derived fallback.
    pub fn reliable_post_id(&self) -> Option<&str> {
        if self.confidence >= 0.9 {
            self.post_id.as_deref()
        } else {
            None
        }
    }
}

/// Normalizer output handed into classification and persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPost {
    pub text: Option<String>,
    pub author: Extracted<String>,
    pub author_title: Extracted<String>,
    pub company: Extracted<String>,
    pub date: ExtractedDate,
    pub permalink: ExtractedPermalink,
    pub declared_language: Option<String>,
    /// Mean confidence across the fields the normalizer actually attempted.
    pub confidence: f64,
}

/// Final decision label for a classified post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    Relevant,
    Agency,
    StageOrInternship,
    LowScore,
    NonRecruitment,
    Other,
}

impl IntentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentLabel::Relevant => "relevant",
            IntentLabel::Agency => "agency",
            IntentLabel::StageOrInternship => "stage_or_internship",
            IntentLabel::LowScore => "low_score",
            IntentLabel::NonRecruitment => "non_recruitment",
            IntentLabel::Other => "other",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, IntentLabel::Relevant)
    }
}

/// Classifier/filter verdict. Immutable, created fresh per call; the matched
/// pattern list is the audit trail for the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub intent: IntentLabel,
    pub score: f64,
    pub confidence: f64,
    pub matched_patterns: Vec<String>,
    pub location_ok: bool,
}

/// Accepted post as handed forward to the storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedPost {
    pub keyword: Option<String>,
    pub author: Option<String>,
    pub company: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub age_hours: Option<f64>,
    pub extraction_confidence: f64,
    pub canonical_signature: String,
    pub classification: ClassificationResult,
    pub review_required: bool,
    pub near_duplicate_similarity: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupable_requires_text_permalink_or_id() {
        let empty = RawPost::default();
        assert!(!empty.is_dedupable());

        let blank_text = RawPost {
            text: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(!blank_text.is_dedupable());

        let with_permalink = RawPost {
            permalink_url: Some("https://example.com/post/1".to_string()),
            ..Default::default()
        };
        assert!(with_permalink.is_dedupable());
    }

    #[test]
    fn synthesized_permalink_is_not_reliable() {
        let synthesized = ExtractedPermalink {
            post_id: Some("a1b2c3".to_string()),
            is_activity: false,
            confidence: 0.5,
        };
        assert!(synthesized.reliable_post_id().is_none());

        let real = ExtractedPermalink {
            post_id: Some("7254339911".to_string()),
            is_activity: true,
            confidence: 0.95,
        };
        assert_eq!(real.reliable_post_id(), Some("7254339911"));
    }

    #[test]
    fn intent_labels_serialize_snake_case() {
        let json = serde_json::to_string(&IntentLabel::StageOrInternship).expect("serialize");
        assert_eq!(json, "\"stage_or_internship\"");
    }
}
