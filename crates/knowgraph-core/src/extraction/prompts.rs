//! Prompt text for extraction and conceptualization

use crate::knowledge::TripleType;

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You extract structured knowledge from text. \
Respond with a single JSON object and nothing else. Use short, canonical names for \
subjects and objects. Only state facts supported by the text.";

const TRIPLE_FORMAT: &str = r#"{"triples": [{"subject": "...", "predicate": "...", "object": "...", "type": "<type>", "confidence": 0.0-1.0}]}"#;

fn describe(triple_type: TripleType) -> &'static str {
    match triple_type {
        TripleType::EntityEntity => {
            "entity-entity: relationships between people, organizations, places or things"
        }
        TripleType::EntityEvent => {
            "entity-event: an entity's involvement in an event (object is the event)"
        }
        TripleType::EventEvent => {
            "event-event: temporal or causal links between events (subject and object are events)"
        }
        TripleType::EmotionalContext => {
            "emotional-context: feelings, attitudes or sentiment an entity holds toward something"
        }
    }
}

/// One call covering every relationship type
pub fn single_pass_prompt(text: &str) -> String {
    let types = TripleType::ALL
        .iter()
        .map(|t| format!("- {}", describe(*t)))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Extract knowledge triples of these types:\n{types}\n\n\
         Set \"type\" on every triple to one of: entity-entity, entity-event, event-event, emotional-context.\n\
         Return JSON shaped as {TRIPLE_FORMAT}\n\n\
         Text:\n\"\"\"\n{text}\n\"\"\""
    )
}

/// One call restricted to `triple_type`
pub fn stage_prompt(triple_type: TripleType, text: &str) -> String {
    format!(
        "Extract only triples of this type:\n- {}\n\n\
         Set \"type\" to \"{}\" on every triple.\n\
         Return JSON shaped as {TRIPLE_FORMAT}\n\n\
         Text:\n\"\"\"\n{text}\n\"\"\"",
        describe(triple_type),
        triple_type.as_str(),
    )
}

pub const CONCEPT_SYSTEM_PROMPT: &str = "You abstract concrete knowledge into higher-level \
concepts. Respond with a single JSON object and nothing else.";

/// Conceptualization request over the distinct elements of a triple set
pub fn conceptualization_prompt(entities: &[String], events: &[String], relations: &[String]) -> String {
    let list = |items: &[String]| {
        if items.is_empty() {
            "(none)".to_string()
        } else {
            items.join(", ")
        }
    };

    format!(
        "Group the elements below under abstract concepts.\n\n\
         Entities: {}\nEvents: {}\nRelations: {}\n\n\
         For each concept give an abstraction_level of high, medium or low. Map every element \
         you can onto a concept, with element_type entity, event or relation.\n\
         Return JSON shaped as {{\"concepts\": [{{\"concept\": \"...\", \"abstraction_level\": \"high\", \
         \"confidence\": 0.0-1.0}}], \"conceptualizations\": [{{\"source_element\": \"...\", \
         \"element_type\": \"entity\", \"concept\": \"...\", \"confidence\": 0.0-1.0}}]}}",
        list(entities),
        list(events),
        list(relations),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_embed_text_and_types() {
        let p = single_pass_prompt("Alice founded Acme.");
        assert!(p.contains("Alice founded Acme."));
        for t in TripleType::ALL {
            assert!(p.contains(t.as_str()));
        }

        let p = stage_prompt(TripleType::EventEvent, "x");
        assert!(p.contains("\"event-event\""));
        assert!(!p.contains("emotional-context"));
    }

    #[test]
    fn test_conceptualization_prompt_lists_elements() {
        let p = conceptualization_prompt(&["Acme".into()], &[], &["founded".into()]);
        assert!(p.contains("Entities: Acme"));
        assert!(p.contains("Events: (none)"));
        assert!(p.contains("Relations: founded"));
    }
}
