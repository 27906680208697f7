use oxrdf::{Literal, NamedNode};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const RDFS_NS: &str = "http://www.w3.org/2000/01/rdf-schema#";
pub const GR_NS: &str = "http://graphrag.local/ontology/";

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const RDFS_LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";
pub const RDFS_COMMENT: &str = "http://www.w3.org/2000/01/rdf-schema#comment";
pub const GR_ORIGINAL_TYPE: &str = "http://graphrag.local/ontology/originalType";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Term {
    Iri(String),
    Literal(String),
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Term::Iri(value.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal(value.into())
    }
}

/// A single statement. Field order gives the sort order of the output graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: Term) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object,
        }
    }
}

impl Triple {
    /// The same statement as an `oxrdf` triple. Fails on any IRI that does not parse.
    pub fn to_oxrdf(&self) -> Result<oxrdf::Triple, String> {
        let iri = |role: &str, value: &str| {
            NamedNode::new(value)
                .map_err(|e| format!("{} {:?} is not an absolute IRI: {}", role, value, e))
        };
        let object: oxrdf::Term = match &self.object {
            Term::Iri(value) => iri("object", value)?.into(),
            Term::Literal(text) => Literal::new_simple_literal(text).into(),
        };
        Ok(oxrdf::Triple::new(
            iri("subject", &self.subject)?,
            iri("predicate", &self.predicate)?,
            object,
        ))
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_oxrdf() {
            Ok(triple) => write!(f, "{}", triple),
            Err(_) => write!(f, "<{}> <{}> {:?}", self.subject, self.predicate, self.object),
        }
    }
}
