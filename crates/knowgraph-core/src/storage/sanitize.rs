//! Input hygiene applied before anything reaches a database

use crate::knowledge::{ConceptNode, ConceptualizationRelationship, Triple};

/// Cap for subject, predicate, object and concept labels
pub const MAX_ELEMENT_CHARS: usize = 1000;
/// Cap for source and source type fields
pub const MAX_SOURCE_CHARS: usize = 500;

/// Strip control characters other than tab and newline, trim, cap length
pub fn sanitize_text(input: &str, max_chars: usize) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_control() || *c == '\t' || *c == '\n')
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

/// Clamp into [0, 1]; NaN and infinities become 0
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 }
}

/// Sanitized copy, or None when a required field ends up empty
pub fn sanitize_triple(triple: &Triple) -> Option<Triple> {
    let subject = sanitize_text(&triple.subject, MAX_ELEMENT_CHARS);
    let predicate = sanitize_text(&triple.predicate, MAX_ELEMENT_CHARS);
    let object = sanitize_text(&triple.object, MAX_ELEMENT_CHARS);
    let source = sanitize_text(&triple.source, MAX_SOURCE_CHARS);
    let source_type = sanitize_text(&triple.source_type, MAX_SOURCE_CHARS);

    if [&subject, &predicate, &object, &source, &source_type]
        .iter()
        .any(|s| s.is_empty())
    {
        return None;
    }

    Some(Triple {
        subject,
        predicate,
        object,
        source,
        source_type,
        confidence: clamp_confidence(triple.confidence),
        ..triple.clone()
    })
}

pub fn sanitize_concept(concept: &ConceptNode) -> Option<ConceptNode> {
    let label = sanitize_text(&concept.concept, MAX_ELEMENT_CHARS);
    let source = sanitize_text(&concept.source, MAX_SOURCE_CHARS);
    let source_type = sanitize_text(&concept.source_type, MAX_SOURCE_CHARS);

    if label.is_empty() || source.is_empty() || source_type.is_empty() {
        return None;
    }

    Some(ConceptNode {
        concept: label,
        source,
        source_type,
        confidence: clamp_confidence(concept.confidence),
        ..concept.clone()
    })
}

pub fn sanitize_conceptualization(
    relationship: &ConceptualizationRelationship,
) -> Option<ConceptualizationRelationship> {
    let source_element = sanitize_text(&relationship.source_element, MAX_ELEMENT_CHARS);
    let concept = sanitize_text(&relationship.concept, MAX_ELEMENT_CHARS);
    let source = sanitize_text(&relationship.source, MAX_SOURCE_CHARS);
    let source_type = sanitize_text(&relationship.source_type, MAX_SOURCE_CHARS);

    if [&source_element, &concept, &source, &source_type]
        .iter()
        .any(|s| s.is_empty())
    {
        return None;
    }

    Some(ConceptualizationRelationship {
        source_element,
        concept,
        source,
        source_type,
        confidence: clamp_confidence(relationship.confidence),
        ..relationship.clone()
    })
}
