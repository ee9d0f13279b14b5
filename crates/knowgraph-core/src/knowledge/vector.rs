use serde::{Deserialize, Serialize};
use std::fmt;

use super::triple::fingerprint;

/// What a stored vector represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VectorType {
    /// Subject or object of a triple
    Entity,
    /// Predicate of a triple
    Relationship,
    /// Whole `"subject predicate object"` sentence
    Semantic,
    /// Concept label
    Concept,
}

impl VectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "ENTITY",
            Self::Relationship => "RELATIONSHIP",
            Self::Semantic => "SEMANTIC",
            Self::Concept => "CONCEPT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "ENTITY" => Some(Self::Entity),
            "RELATIONSHIP" => Some(Self::Relationship),
            "SEMANTIC" => Some(Self::Semantic),
            "CONCEPT" => Some(Self::Concept),
            _ => None,
        }
    }
}

impl fmt::Display for VectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single record a vector belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum VectorOwner {
    Triple(String),
    Concept(String),
}

impl VectorOwner {
    pub fn id(&self) -> &str {
        match self {
            Self::Triple(id) | Self::Concept(id) => id,
        }
    }

    pub fn triple_id(&self) -> Option<&str> {
        match self {
            Self::Triple(id) => Some(id),
            Self::Concept(_) => None,
        }
    }

    pub fn concept_id(&self) -> Option<&str> {
        match self {
            Self::Concept(id) => Some(id),
            Self::Triple(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEmbedding {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub vector_type: VectorType,
    pub owner: VectorOwner,
}

impl VectorEmbedding {
    /// Build a vector with an id derived from owner, type and text
    pub fn new(
        owner: VectorOwner,
        vector_type: VectorType,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let text = text.into();
        let id = fingerprint(&[owner.id(), vector_type.as_str(), &text]);
        Self {
            id,
            text,
            embedding,
            vector_type,
            owner,
        }
    }
}
