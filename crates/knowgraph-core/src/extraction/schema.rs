//! Response shapes the model is asked to produce
//!
//! Raw records are lenient on input (every field optional, camelCase
//! aliases accepted) and strict on validation.

use serde::Deserialize;
use serde_json::Value;

use crate::error::FieldError;
use crate::knowledge::{
    AbstractionLevel, ConceptNode, ConceptualizationRelationship, ElementType, Provenance, Triple,
    TripleType,
};
use crate::llm::{StructuredOutput, scan_json_objects};

fn is_blank(field: &Option<String>) -> bool {
    field.as_deref().is_none_or(|s| s.trim().is_empty())
}

fn text(field: Option<String>) -> String {
    field.map(|s| s.trim().to_string()).unwrap_or_default()
}

fn confidence_or_default(value: Option<f64>) -> f32 {
    value.map(|v| v as f32).unwrap_or(0.5)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTriple {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub predicate: Option<String>,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default, rename = "type", alias = "triple_type", alias = "relationship_type")]
    pub triple_type: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl RawTriple {
    fn is_complete(&self) -> bool {
        !(is_blank(&self.subject) || is_blank(&self.predicate) || is_blank(&self.object))
    }

    fn field_errors(&self, path: &str) -> Vec<FieldError> {
        let mut errors = Vec::new();
        for (name, value) in [
            ("subject", &self.subject),
            ("predicate", &self.predicate),
            ("object", &self.object),
        ] {
            if is_blank(value) {
                errors.push(FieldError::new(format!("{}.{}", path, name), "must not be empty"));
            }
        }
        if let Some(t) = &self.triple_type {
            if TripleType::parse(t).is_none() {
                errors.push(FieldError::new(
                    format!("{}.type", path),
                    format!("unknown triple type '{}'", t),
                ));
            }
        }
        if let Some(c) = self.confidence {
            if !c.is_finite() {
                errors.push(FieldError::new(format!("{}.confidence", path), "must be a finite number"));
            }
        }
        errors
    }

    /// Typed triple; a missing type falls back to `default_type`
    pub fn into_triple(self, default_type: TripleType, provenance: &Provenance) -> Triple {
        let triple_type = self
            .triple_type
            .as_deref()
            .and_then(TripleType::parse)
            .unwrap_or(default_type);
        Triple::new(
            text(self.subject),
            text(self.predicate),
            text(self.object),
            triple_type,
            provenance,
        )
        .with_confidence(confidence_or_default(self.confidence))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TripleResponse {
    #[serde(default, alias = "relationships")]
    pub triples: Vec<RawTriple>,
}

impl StructuredOutput for TripleResponse {
    fn retain_complete(&mut self) -> usize {
        let before = self.triples.len();
        self.triples.retain(RawTriple::is_complete);
        before - self.triples.len()
    }

    fn validate(&self) -> Vec<FieldError> {
        self.triples
            .iter()
            .enumerate()
            .flat_map(|(i, t)| t.field_errors(&format!("triples[{}]", i)))
            .collect()
    }
}

impl TripleResponse {
    pub fn into_triples(self, default_type: TripleType, provenance: &Provenance) -> Vec<Triple> {
        self.triples
            .into_iter()
            .map(|t| t.into_triple(default_type, provenance))
            .collect()
    }
}

/// Best-effort recovery of well-formed triples from a rejected response
///
/// Every JSON object in `raw` is considered; objects carrying a `triples`
/// array contribute its elements. Records that fail any check are dropped.
pub fn salvage_triples(raw: &str, default_type: TripleType, provenance: &Provenance) -> Vec<Triple> {
    let mut candidates: Vec<Value> = Vec::new();
    for value in scan_json_objects(raw) {
        match value.get("triples").or_else(|| value.get("relationships")) {
            Some(Value::Array(items)) => candidates.extend(items.iter().cloned()),
            _ => candidates.push(value),
        }
    }

    candidates
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawTriple>(v).ok())
        .filter(|t| t.is_complete() && t.field_errors("").is_empty())
        .map(|t| t.into_triple(default_type, provenance))
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConcept {
    #[serde(default, alias = "name", alias = "label")]
    pub concept: Option<String>,
    #[serde(default, alias = "abstractionLevel", alias = "level")]
    pub abstraction_level: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConceptualization {
    #[serde(default, alias = "sourceElement", alias = "element")]
    pub source_element: Option<String>,
    #[serde(default, alias = "elementType", alias = "entity_type")]
    pub element_type: Option<String>,
    #[serde(default)]
    pub concept: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConceptResponse {
    #[serde(default)]
    pub concepts: Vec<RawConcept>,
    #[serde(default, alias = "conceptMappings", alias = "mappings")]
    pub conceptualizations: Vec<RawConceptualization>,
}

impl StructuredOutput for ConceptResponse {
    fn retain_complete(&mut self) -> usize {
        let before = self.concepts.len() + self.conceptualizations.len();
        self.concepts.retain(|c| !is_blank(&c.concept));
        self.conceptualizations
            .retain(|m| !is_blank(&m.source_element) && !is_blank(&m.concept));
        before - self.concepts.len() - self.conceptualizations.len()
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        for (i, c) in self.concepts.iter().enumerate() {
            if let Some(level) = &c.abstraction_level {
                if AbstractionLevel::parse(level).is_none() {
                    errors.push(FieldError::new(
                        format!("concepts[{}].abstraction_level", i),
                        format!("expected high, medium or low, got '{}'", level),
                    ));
                }
            }
        }
        for (i, m) in self.conceptualizations.iter().enumerate() {
            match m.element_type.as_deref() {
                None => errors.push(FieldError::new(
                    format!("conceptualizations[{}].element_type", i),
                    "is required",
                )),
                Some(t) if ElementType::parse(t).is_none() => errors.push(FieldError::new(
                    format!("conceptualizations[{}].element_type", i),
                    format!("unknown element type '{}'", t),
                )),
                Some(_) => {}
            }
        }
        errors
    }
}

impl ConceptResponse {
    /// Typed concepts and mappings; every mapping carries `context_triples`
    pub fn into_records(
        self,
        provenance: &Provenance,
        context_triples: &[String],
    ) -> (Vec<ConceptNode>, Vec<ConceptualizationRelationship>) {
        let concepts = self
            .concepts
            .into_iter()
            .map(|c| {
                let level = c
                    .abstraction_level
                    .as_deref()
                    .and_then(AbstractionLevel::parse)
                    .unwrap_or(AbstractionLevel::Medium);
                ConceptNode::new(text(c.concept), level, provenance)
                    .with_confidence(confidence_or_default(c.confidence))
            })
            .collect();

        let mappings = self
            .conceptualizations
            .into_iter()
            .filter_map(|m| {
                let element_type = m.element_type.as_deref().and_then(ElementType::parse)?;
                Some(
                    ConceptualizationRelationship::new(
                        text(m.source_element),
                        element_type,
                        text(m.concept),
                        provenance,
                    )
                    .with_confidence(confidence_or_default(m.confidence))
                    .with_context_triples(context_triples.to_vec()),
                )
            })
            .collect();

        (concepts, mappings)
    }
}
