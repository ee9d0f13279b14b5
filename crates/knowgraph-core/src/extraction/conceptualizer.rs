//! Concept derivation from extracted triples

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::prompts::{CONCEPT_SYSTEM_PROMPT, conceptualization_prompt};
use super::schema::ConceptResponse;
use crate::knowledge::{ConceptNode, ConceptualizationRelationship, Provenance, Triple, TripleType};
use crate::llm::{AiProvider, GenerationConfig, generate_object};
use crate::resilience::Resilience;

/// Triple fingerprints attached to each mapping for traceability
pub const MAX_CONTEXT_TRIPLES: usize = 50;

/// Distinct elements of a triple set, in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConceptInput {
    pub entities: Vec<String>,
    pub events: Vec<String>,
    pub relations: Vec<String>,
    pub triple_ids: Vec<String>,
}

impl ConceptInput {
    pub fn from_triples(triples: &[Triple]) -> Self {
        fn push(seen: &mut HashSet<String>, list: &mut Vec<String>, value: &str) {
            let value = value.trim();
            if !value.is_empty() && seen.insert(value.to_lowercase()) {
                list.push(value.to_string());
            }
        }

        let mut input = Self::default();
        let (mut seen_entities, mut seen_events, mut seen_relations) =
            (HashSet::new(), HashSet::new(), HashSet::new());

        for triple in triples {
            if triple.triple_type.subject_is_event() {
                push(&mut seen_events, &mut input.events, &triple.subject);
            } else {
                push(&mut seen_entities, &mut input.entities, &triple.subject);
            }

            if triple.triple_type.object_is_event() {
                push(&mut seen_events, &mut input.events, &triple.object);
            } else if triple.triple_type != TripleType::EmotionalContext {
                push(&mut seen_entities, &mut input.entities, &triple.object);
            }

            push(&mut seen_relations, &mut input.relations, &triple.predicate);
        }

        input.triple_ids = triples.iter().take(MAX_CONTEXT_TRIPLES).map(Triple::id).collect();
        input
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.events.is_empty() && self.relations.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConceptualizationOutcome {
    pub concepts: Vec<ConceptNode>,
    pub conceptualizations: Vec<ConceptualizationRelationship>,
    /// Set when the call failed and an empty result was substituted
    pub degraded: bool,
}

pub struct Conceptualizer {
    provider: Arc<dyn AiProvider>,
    resilience: Resilience,
}

impl Conceptualizer {
    pub fn new(provider: Arc<dyn AiProvider>, resilience: Resilience) -> Self {
        Self { provider, resilience }
    }

    /// Derive concepts from `triples`; never fails
    pub async fn conceptualize(&self, triples: &[Triple], provenance: &Provenance) -> ConceptualizationOutcome {
        let input = ConceptInput::from_triples(triples);
        if input.is_empty() {
            return ConceptualizationOutcome::default();
        }

        let prompt = conceptualization_prompt(&input.entities, &input.events, &input.relations);
        let config = GenerationConfig::json().with_system_prompt(CONCEPT_SYSTEM_PROMPT);
        let key = format!("{}:conceptualization", provenance.source);

        let result = self
            .resilience
            .execute(&key, || {
                generate_object::<ConceptResponse>(self.provider.as_ref(), &prompt, &config, "conceptualize")
            })
            .await;

        match result {
            Ok(response) => {
                let (concepts, conceptualizations) =
                    response.content.into_records(provenance, &input.triple_ids);
                info!(
                    source = %provenance.source,
                    concepts = concepts.len(),
                    mappings = conceptualizations.len(),
                    "Conceptualization complete"
                );
                ConceptualizationOutcome {
                    concepts,
                    conceptualizations,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(
                    source = %provenance.source,
                    error = %e,
                    "Conceptualization failed, continuing without concepts"
                );
                ConceptualizationOutcome {
                    degraded: true,
                    ..Default::default()
                }
            }
        }
    }
}
