use ingest::{Provenance, RawEntity, RawRelationship};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedTerm {
    pub provenance: Provenance,
    /// Class name for entities, property name for relationships
    pub type_label: String,
    pub description: String,
    pub disambiguation: String,
    /// Entity type or relation description as extracted
    pub original_label: String,
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degradation_reason: Option<String>,
}

impl RefinedTerm {
    pub fn is_entity(&self) -> bool {
        self.provenance.is_entity()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefinedData {
    pub prompt_version: String,
    pub entities: Vec<RawEntity>,
    pub relationships: Vec<RawRelationship>,
    /// One term per entity and relationship, sorted by provenance
    pub terms: Vec<RefinedTerm>,
}

impl RefinedData {
    pub fn degraded_count(&self) -> usize {
        self.terms.iter().filter(|t| t.degraded).count()
    }
}

/// The JSON object the model is asked to produce.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RefinementResponse {
    #[serde(rename = "type", alias = "label")]
    pub type_label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "hint")]
    pub disambiguation: String,
}
