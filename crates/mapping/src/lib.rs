pub mod embeddings;
pub mod ontology;
pub mod schema;
pub mod similarity;
pub mod sparql;

pub use embeddings::{
    EmbeddingCache, EmbeddingClient, EmbeddingError, EmbeddingService, SemanticIndex,
};
pub use ontology::{OntologyIndex, OntologyTerm, TermKind};
pub use sparql::{
    DBPEDIA_NAMESPACE, DBPEDIA_SPARQL_ENDPOINT, OntologySource, SparqlFetcher,
    load_cached_or_builtin, load_or_fetch,
};
pub use schema::{Candidate, MappedData, MappedTerm, MappingOutcome};

use anyhow::{Result, bail};
use refine::{RefinedData, RefinedTerm};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.75;
pub const DEFAULT_FLOOR: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappingSettings {
    pub confidence_threshold: f64,
    pub floor: f64,
}

impl Default for MappingSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            floor: DEFAULT_FLOOR,
        }
    }
}

impl MappingSettings {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            bail!(
                "confidence threshold must be in [0, 1], got {}",
                self.confidence_threshold
            );
        }
        if !(0.0..=self.confidence_threshold).contains(&self.floor) {
            bail!(
                "mapping floor must be in [0, {}], got {}",
                self.confidence_threshold,
                self.floor
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Scored<'a> {
    term: &'a OntologyTerm,
    label: f64,
    context: f64,
    score: f64,
}

/// Aligns refined terms with ontology classes (entities) and properties (relationships).
pub struct Mapper {
    ontology: Arc<OntologyIndex>,
    settings: MappingSettings,
    semantic: Option<Arc<SemanticIndex>>,
}

impl Mapper {
    pub fn new(ontology: Arc<OntologyIndex>, settings: MappingSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            ontology,
            settings,
            semantic: None,
        })
    }

    /// Score labels by embedding similarity as well. Terms without a vector
    /// in the index are scored lexically only.
    pub fn with_embeddings(mut self, semantic: Arc<SemanticIndex>) -> Self {
        self.semantic = Some(semantic);
        self
    }

    pub fn ontology(&self) -> &OntologyIndex {
        &self.ontology
    }

    /// Every text `map` looks up in the semantic index: one per ontology term
    /// and one per refined label.
    pub fn embedding_texts(&self, data: &RefinedData) -> Vec<String> {
        self.ontology
            .classes()
            .iter()
            .chain(self.ontology.properties())
            .map(|t| t.embedding_text().to_string())
            .chain(data.terms.iter().map(|t| t.type_label.clone()))
            .filter(|text| !text.trim().is_empty())
            .collect()
    }

    /// Map every term. Order of the output matches the input.
    pub fn map(&self, data: &RefinedData) -> MappedData {
        let terms = self.map_all(&data.terms);

        let mapped = MappedData {
            ontology: self.ontology.name().to_string(),
            threshold: self.settings.confidence_threshold,
            floor: self.settings.floor,
            embedding_model: self.semantic.as_ref().map(|s| s.model().to_string()),
            entities: data.entities.clone(),
            relationships: data.relationships.clone(),
            terms,
        };

        info!(
            ontology = %mapped.ontology,
            mapped = mapped.mapped_count(),
            low_confidence = mapped.low_confidence_count(),
            unmapped = mapped.unmapped_count(),
            "Mapping complete"
        );
        mapped
    }

    fn map_all(&self, terms: &[RefinedTerm]) -> Vec<MappedTerm> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let chunk_size = terms.len().div_ceil(workers).max(1);

        std::thread::scope(|scope| {
            let handles: Vec<_> = terms
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk.iter().map(|t| self.map_term(t)).collect::<Vec<_>>()
                    })
                })
                .collect();

            let mut out = Vec::with_capacity(terms.len());
            for handle in handles {
                match handle.join() {
                    Ok(chunk) => out.extend(chunk),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            out
        })
    }

    pub fn map_term(&self, term: &RefinedTerm) -> MappedTerm {
        let kind = if term.is_entity() {
            TermKind::Class
        } else {
            TermKind::Property
        };

        let query = similarity::tokens(&term.type_label);
        let mut context: HashSet<String> = similarity::tokens(&term.description)
            .into_iter()
            .collect();
        context.extend(similarity::tokens(&term.disambiguation));

        let semantic = self.semantic.as_deref();

        let best = self
            .ontology
            .terms(kind)
            .iter()
            .map(|candidate| {
                let lexical = similarity::label_similarity(&query, &candidate.label_tokens);
                let label = semantic
                    .and_then(|s| s.similarity(&term.type_label, candidate.embedding_text()))
                    .map_or(lexical, |cosine| lexical.max(cosine));
                let overlap = similarity::context_overlap(&context, &candidate.context_tokens);
                Scored {
                    term: candidate,
                    label,
                    context: overlap,
                    score: similarity::combine(label, overlap),
                }
            })
            .min_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then_with(|| b.term.depth.cmp(&a.term.depth))
                    .then_with(|| a.term.uri.cmp(&b.term.uri))
            });

        let outcome = match best {
            Some(best) if best.score >= self.settings.floor => {
                let low_confidence = best.score < self.settings.confidence_threshold;
                if low_confidence {
                    debug!(
                        provenance = %term.provenance,
                        uri = %best.term.uri,
                        score = best.score,
                        "Low-confidence mapping"
                    );
                }
                MappingOutcome::Mapped {
                    uri: best.term.uri.clone(),
                    confidence: best.score,
                    rationale: format!(
                        "{:?} ~ {} {:?}: label {:.4}, context {:.4}",
                        term.type_label,
                        kind_name(kind),
                        best.term.label,
                        best.label,
                        best.context
                    ),
                    low_confidence,
                }
            }
            best => MappingOutcome::Unmapped {
                literal: literal_for(term),
                best_candidate: best.filter(|b| b.score > 0.0).map(|b| Candidate {
                    uri: b.term.uri.clone(),
                    score: b.score,
                    depth: b.term.depth,
                }),
            },
        };

        MappedTerm {
            term: term.clone(),
            outcome,
        }
    }
}

fn kind_name(kind: TermKind) -> &'static str {
    match kind {
        TermKind::Class => "class",
        TermKind::Property => "property",
    }
}

fn literal_for(term: &RefinedTerm) -> String {
    if term.original_label.trim().is_empty() {
        term.type_label.clone()
    } else {
        term.original_label.clone()
    }
}
