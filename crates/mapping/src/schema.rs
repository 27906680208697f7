use ingest::{RawEntity, RawRelationship};
use refine::RefinedTerm;
use serde::{Deserialize, Serialize};

/// Best candidate seen for a term that fell below the floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub uri: String,
    pub score: f64,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MappingOutcome {
    Mapped {
        uri: String,
        confidence: f64,
        rationale: String,
        /// Confidence below the configured threshold; kept, never promoted
        low_confidence: bool,
    },
    /// No candidate reached the floor. `literal` is the label to fall back on.
    Unmapped {
        literal: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        best_candidate: Option<Candidate>,
    },
}

impl MappingOutcome {
    pub fn uri(&self) -> Option<&str> {
        match self {
            MappingOutcome::Mapped { uri, .. } => Some(uri),
            MappingOutcome::Unmapped { .. } => None,
        }
    }

    pub fn is_low_confidence(&self) -> bool {
        matches!(
            self,
            MappingOutcome::Mapped {
                low_confidence: true,
                ..
            }
        )
    }

    pub fn is_unmapped(&self) -> bool {
        matches!(self, MappingOutcome::Unmapped { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedTerm {
    #[serde(flatten)]
    pub term: RefinedTerm,
    pub outcome: MappingOutcome,
}

impl MappedTerm {
    pub fn is_entity(&self) -> bool {
        self.term.is_entity()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappedData {
    /// Name of the ontology the terms were matched against
    pub ontology: String,
    pub threshold: f64,
    pub floor: f64,
    /// Embedding model that scored labels; absent when matching was lexical only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    pub entities: Vec<RawEntity>,
    pub relationships: Vec<RawRelationship>,
    pub terms: Vec<MappedTerm>,
}

impl MappedData {
    pub fn mapped_count(&self) -> usize {
        self.terms
            .iter()
            .filter(|t| matches!(t.outcome, MappingOutcome::Mapped { .. }))
            .count()
    }

    pub fn low_confidence_count(&self) -> usize {
        self.terms
            .iter()
            .filter(|t| t.outcome.is_low_confidence())
            .count()
    }

    pub fn unmapped_count(&self) -> usize {
        self.terms.iter().filter(|t| t.outcome.is_unmapped()).count()
    }

    pub fn degraded_count(&self) -> usize {
        self.terms.iter().filter(|t| t.term.degraded).count()
    }
}
