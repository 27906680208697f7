use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Link from a derived record back to the raw record it came from.
///
/// Serialized as `entity:<id>` / `relationship:<id>` so checkpoints stay
/// readable. The derived ordering (entities first, then by id) is the
/// canonical order of every stage's output list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Provenance {
    Entity(String),
    Relationship(String),
}

impl Provenance {
    pub fn is_entity(&self) -> bool {
        matches!(self, Provenance::Entity(_))
    }

    pub fn record_id(&self) -> &str {
        match self {
            Provenance::Entity(id) | Provenance::Relationship(id) => id,
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Entity(id) => write!(f, "entity:{}", id),
            Provenance::Relationship(id) => write!(f, "relationship:{}", id),
        }
    }
}

impl From<Provenance> for String {
    fn from(p: Provenance) -> Self {
        p.to_string()
    }
}

impl TryFrom<String> for Provenance {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.split_once(':') {
            Some(("entity", id)) if !id.is_empty() => Ok(Provenance::Entity(id.to_string())),
            Some(("relationship", id)) if !id.is_empty() => {
                Ok(Provenance::Relationship(id.to_string()))
            }
            _ => Err(format!("invalid provenance id: {:?}", value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub description: String,
    pub provenance: Provenance,
}

impl RawEntity {
    pub fn new(id: String, name: String, entity_type: String, description: String) -> Self {
        let provenance = Provenance::Entity(id.clone());
        Self {
            id,
            name,
            entity_type,
            description,
            provenance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRelationship {
    pub id: String,
    pub source: String,
    pub target: String,
    pub description: String,
    pub weight: f64,
    pub provenance: Provenance,
    /// Both endpoints name an extracted entity
    pub resolved: bool,
}

impl RawRelationship {
    pub fn new(
        row: usize,
        source: String,
        target: String,
        description: String,
        weight: f64,
        resolved: bool,
    ) -> Self {
        let id = Self::generate_id(row, &source, &target, &description);
        let provenance = Provenance::Relationship(id.clone());
        Self {
            id,
            source,
            target,
            description,
            weight,
            provenance,
            resolved,
        }
    }

    // Row index is part of the hash so duplicate edges stay distinct records
    fn generate_id(row: usize, source: &str, target: &str, description: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(row.to_string().as_bytes());
        hasher.update(source.as_bytes());
        hasher.update(target.as_bytes());
        hasher.update(description.as_bytes());
        let result = hasher.finalize();
        format!("r{:06}-{}", row, hex::encode(&result[..6]))
    }
}

/// Two input rows that canonicalize to the same entity name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCollision {
    pub canonical: String,
    pub kept_id: String,
    pub dropped_id: String,
    pub dropped_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRow {
    pub artifact: String,
    pub row: usize,
    pub reason: String,
}

/// Occurrence census of a free-text label (entity type or relation description).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelCount {
    pub count: usize,
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedData {
    pub entities: Vec<RawEntity>,
    pub relationships: Vec<RawRelationship>,
    pub collisions: Vec<CanonicalCollision>,
    pub rejected_rows: Vec<RejectedRow>,
    pub types: BTreeMap<String, LabelCount>,
    pub predicates: BTreeMap<String, LabelCount>,
}

impl ExtractedData {
    pub fn record_count(&self) -> usize {
        self.entities.len() + self.relationships.len()
    }

    pub fn dangling_relationships(&self) -> usize {
        self.relationships.iter().filter(|r| !r.resolved).count()
    }
}
