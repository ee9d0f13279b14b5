//! Triples: the subject–predicate–object facts extracted from text

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Kind of relationship a triple expresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TripleType {
    EntityEntity,
    EntityEvent,
    EventEvent,
    EmotionalContext,
}

impl TripleType {
    /// Every type, in the order the four-stage extractor runs them
    pub const ALL: [TripleType; 4] = [
        Self::EntityEntity,
        Self::EntityEvent,
        Self::EventEvent,
        Self::EmotionalContext,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityEntity => "entity-entity",
            Self::EntityEvent => "entity-event",
            Self::EventEvent => "event-event",
            Self::EmotionalContext => "emotional-context",
        }
    }

    /// Parse from string, accepting `_` or `-` separators
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "entity-entity" => Some(Self::EntityEntity),
            "entity-event" => Some(Self::EntityEvent),
            "event-event" => Some(Self::EventEvent),
            "emotional-context" => Some(Self::EmotionalContext),
            _ => None,
        }
    }

    /// Whether the object position names an event
    pub fn object_is_event(&self) -> bool {
        matches!(self, Self::EntityEvent | Self::EventEvent)
    }

    /// Whether the subject position names an event
    pub fn subject_is_event(&self) -> bool {
        matches!(self, Self::EventEvent)
    }
}

impl fmt::Display for TripleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a piece of knowledge came from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub source_type: String,
    pub source_date: Option<DateTime<Utc>>,
}

impl Provenance {
    pub fn new(source: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_type: source_type.into(),
            source_date: None,
        }
    }

    pub fn with_source_date(mut self, date: DateTime<Utc>) -> Self {
        self.source_date = Some(date);
        self
    }
}

/// A subject–predicate–object fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(rename = "type")]
    pub triple_type: TripleType,
    pub source: String,
    pub source_type: String,
    pub source_date: Option<DateTime<Utc>>,
    pub extracted_at: DateTime<Utc>,
    pub confidence: f32,
}

impl Triple {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        triple_type: TripleType,
        provenance: &Provenance,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            triple_type,
            source: provenance.source.clone(),
            source_type: provenance.source_type.clone(),
            source_date: provenance.source_date,
            extracted_at: Utc::now(),
            confidence: 0.5,
        }
    }

    /// Set confidence score (clamped to 0.0-1.0)
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Content fingerprint used as the primary key
    pub fn id(&self) -> String {
        triple_fingerprint(
            &self.subject,
            &self.predicate,
            &self.object,
            self.triple_type,
        )
    }

    /// `"subject predicate object"`, the text embedded for semantic comparison
    pub fn semantic_text(&self) -> String {
        format!("{} {} {}", self.subject, self.predicate, self.object)
    }

    /// Case- and whitespace-insensitive key for exact duplicate detection
    pub fn normalized_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            normalize(&self.subject),
            normalize(&self.predicate),
            normalize(&self.object),
            self.triple_type.as_str()
        )
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 hex digest of the `|`-joined parts
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint of `subject|predicate|object|type`
pub fn triple_fingerprint(
    subject: &str,
    predicate: &str,
    object: &str,
    triple_type: TripleType,
) -> String {
    fingerprint(&[subject, predicate, object, triple_type.as_str()])
}
