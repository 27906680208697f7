use ingest::{Provenance, RawEntity};
use mapping::{MappedData, MappedTerm, MappingOutcome};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{info, warn};
use url::form_urlencoded;

use crate::model::{GR_ORIGINAL_TYPE, RDF_TYPE, RDFS_COMMENT, RDFS_LABEL, Term, Triple};
use crate::namespaces::Namespaces;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub entities: usize,
    pub typed_entities: usize,
    pub untyped_entities: usize,
    pub relationships: usize,
    /// Edges written with the fallback predicate
    pub fallback_edges: usize,
    /// Edges dropped because an endpoint is not an extracted entity
    pub skipped_relationships: usize,
}

#[derive(Debug, Clone, Default)]
pub struct GraphBuild {
    pub triples: BTreeSet<Triple>,
    pub stats: GraphStats,
}

impl GraphBuild {
    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }
}

/// `<entity_ns><name, spaces as _, percent-encoded>_<id>`
pub fn entity_iri(namespaces: &Namespaces, entity: &RawEntity) -> String {
    let name = entity.name.trim().replace(char::is_whitespace, "_");
    format!(
        "{}{}_{}",
        namespaces.entity,
        encode(&name),
        encode(&entity.id)
    )
}

fn encode(segment: &str) -> String {
    form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

/// Turn the mapped data into a sorted triple set.
pub fn build_triples(data: &MappedData, namespaces: &Namespaces) -> GraphBuild {
    let outcomes: HashMap<&Provenance, &MappedTerm> =
        data.terms.iter().map(|t| (&t.term.provenance, t)).collect();
    let iris: HashMap<&str, String> = data
        .entities
        .iter()
        .map(|e| (e.id.as_str(), entity_iri(namespaces, e)))
        .collect();

    let mut build = GraphBuild::default();

    for entity in &data.entities {
        let subject = entity_iri(namespaces, entity);
        build.stats.entities += 1;

        match outcomes.get(&entity.provenance).map(|t| &t.outcome) {
            Some(MappingOutcome::Mapped { uri, .. }) => {
                build.stats.typed_entities += 1;
                build
                    .triples
                    .insert(Triple::new(&subject, RDF_TYPE, Term::iri(uri)));
            }
            Some(MappingOutcome::Unmapped { literal, .. }) => {
                build.stats.untyped_entities += 1;
                if !literal.trim().is_empty() {
                    build.triples.insert(Triple::new(
                        &subject,
                        GR_ORIGINAL_TYPE,
                        Term::literal(literal),
                    ));
                }
            }
            None => {
                build.stats.untyped_entities += 1;
                if !entity.entity_type.trim().is_empty() {
                    build.triples.insert(Triple::new(
                        &subject,
                        GR_ORIGINAL_TYPE,
                        Term::literal(&entity.entity_type),
                    ));
                }
            }
        }

        build
            .triples
            .insert(Triple::new(&subject, RDFS_LABEL, Term::literal(&entity.name)));

        let description = outcomes
            .get(&entity.provenance)
            .map(|t| t.term.description.as_str())
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(entity.description.as_str());
        if !description.trim().is_empty() {
            build.triples.insert(Triple::new(
                &subject,
                RDFS_COMMENT,
                Term::literal(description),
            ));
        }
    }

    for relationship in &data.relationships {
        let endpoints = (
            iris.get(relationship.source.as_str()),
            iris.get(relationship.target.as_str()),
        );
        let (Some(source), Some(target)) = endpoints else {
            build.stats.skipped_relationships += 1;
            continue;
        };

        let predicate = match outcomes
            .get(&relationship.provenance)
            .and_then(|t| t.outcome.uri())
        {
            Some(uri) => uri.to_string(),
            None => {
                build.stats.fallback_edges += 1;
                namespaces.fallback_predicate.clone()
            }
        };

        build.stats.relationships += 1;
        build
            .triples
            .insert(Triple::new(source, predicate, Term::iri(target)));
    }

    if build.stats.skipped_relationships > 0 {
        warn!(
            skipped = build.stats.skipped_relationships,
            "Relationships with dangling endpoints left out of the graph"
        );
    }
    info!(
        triples = build.triples.len(),
        entities = build.stats.entities,
        relationships = build.stats.relationships,
        fallback_edges = build.stats.fallback_edges,
        "Graph built"
    );

    build
}
