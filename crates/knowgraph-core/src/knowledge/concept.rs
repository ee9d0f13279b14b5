//! Concept nodes and the relationships that map elements onto them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::triple::{Provenance, fingerprint};

/// How abstract a concept is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstractionLevel {
    High,
    Medium,
    Low,
}

impl AbstractionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl fmt::Display for AbstractionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of element a conceptualization maps from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Entity,
    Event,
    Relation,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Event => "event",
            Self::Relation => "relation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "entity" => Some(Self::Entity),
            "event" => Some(Self::Event),
            "relation" | "relationship" => Some(Self::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A higher-level label abstracting one or more entities or events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptNode {
    pub concept: String,
    pub abstraction_level: AbstractionLevel,
    pub confidence: f32,
    pub source: String,
    pub source_type: String,
    pub extracted_at: DateTime<Utc>,
}

impl ConceptNode {
    pub fn new(
        concept: impl Into<String>,
        abstraction_level: AbstractionLevel,
        provenance: &Provenance,
    ) -> Self {
        Self {
            concept: concept.into(),
            abstraction_level,
            confidence: 0.5,
            source: provenance.source.clone(),
            source_type: provenance.source_type.clone(),
            extracted_at: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Fingerprint of the normalized label
    pub fn id(&self) -> String {
        fingerprint(&["concept", &self.concept.trim().to_lowercase()])
    }
}

/// Maps a source element (entity, event, relation) onto a concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptualizationRelationship {
    pub source_element: String,
    pub element_type: ElementType,
    pub concept: String,
    pub confidence: f32,
    /// Fingerprints of the triples this mapping was derived from
    pub context_triples: Vec<String>,
    pub source: String,
    pub source_type: String,
    pub extracted_at: DateTime<Utc>,
}

impl ConceptualizationRelationship {
    pub fn new(
        source_element: impl Into<String>,
        element_type: ElementType,
        concept: impl Into<String>,
        provenance: &Provenance,
    ) -> Self {
        Self {
            source_element: source_element.into(),
            element_type,
            concept: concept.into(),
            confidence: 0.5,
            context_triples: Vec::new(),
            source: provenance.source.clone(),
            source_type: provenance.source_type.clone(),
            extracted_at: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn with_context_triples(mut self, triple_ids: Vec<String>) -> Self {
        self.context_triples = triple_ids;
        self
    }

    pub fn id(&self) -> String {
        fingerprint(&[
            &self.source_element,
            self.element_type.as_str(),
            &self.concept,
        ])
    }
}
