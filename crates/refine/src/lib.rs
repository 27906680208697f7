pub mod cache;
pub mod error;
pub mod labels;
pub mod llm;
pub mod prompt;
pub mod retry;
pub mod schema;

pub use cache::{CacheKey, RefinementCache};
pub use error::{ModelError, RefineError};
pub use llm::{ModelService, OllamaClient};
pub use prompt::PROMPT_VERSION;
pub use retry::RetryPolicy;
pub use schema::{RefinedData, RefinedTerm, RefinementResponse};

use anyhow::Result;
use ingest::{ExtractedData, Provenance};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    Entity,
    Relationship,
}

/// One raw record, ready to be sent to the model.
#[derive(Debug, Clone)]
struct RefineJob {
    provenance: Provenance,
    kind: RecordKind,
    prompt: String,
    cache_key: CacheKey,
    original_label: String,
    original_description: String,
}

impl RefineJob {
    /// Pass-through refinement used when the model cannot be consulted.
    fn fallback(&self, reason: String) -> RefinedTerm {
        RefinedTerm {
            provenance: self.provenance.clone(),
            type_label: self.original_label.clone(),
            description: self.original_description.clone(),
            disambiguation: String::new(),
            original_label: self.original_label.clone(),
            degraded: true,
            degradation_reason: Some(reason),
        }
    }

    fn refined(&self, response: RefinementResponse) -> RefinedTerm {
        RefinedTerm {
            provenance: self.provenance.clone(),
            type_label: response.type_label,
            description: response.description,
            disambiguation: response.disambiguation,
            original_label: self.original_label.clone(),
            degraded: false,
            degradation_reason: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefineStats {
    pub refined: usize,
    pub cache_hits: usize,
    pub degraded: usize,
    pub model_available: bool,
}

#[derive(Debug, Clone)]
pub struct RefinementOutcome {
    pub data: RefinedData,
    pub stats: RefineStats,
}

pub struct Refiner {
    model: Arc<dyn ModelService>,
    cache: Option<RefinementCache>,
    retry: RetryPolicy,
    worker_cap: usize,
    fallback_enabled: bool,
}

impl Refiner {
    pub fn new(model: Arc<dyn ModelService>, retry: RetryPolicy, worker_cap: usize) -> Self {
        Self {
            model,
            cache: None,
            retry,
            worker_cap: worker_cap.max(1),
            fallback_enabled: true,
        }
    }

    pub fn with_cache(mut self, cache: RefinementCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    /// Refine every entity and relationship. Output terms are sorted by provenance.
    pub async fn refine(
        &self,
        data: &ExtractedData,
        cancel: &CancellationToken,
    ) -> Result<RefinementOutcome> {
        let jobs = build_jobs(data);
        let total = jobs.len();
        let mut stats = RefineStats::default();
        let mut terms = Vec::with_capacity(total);
        let mut pending = Vec::new();

        // Serve cache hits without touching the network
        for job in jobs {
            match self.cache.as_ref().and_then(|c| c.get(&job.cache_key)) {
                Some(response) => {
                    stats.cache_hits += 1;
                    terms.push(job.refined(response));
                }
                None => pending.push(job),
            }
        }

        info!(
            total,
            cache_hits = stats.cache_hits,
            pending = pending.len(),
            model = self.model.model_name(),
            "Refining records"
        );

        if !pending.is_empty() {
            match self.model.health_check().await {
                Ok(()) => {
                    stats.model_available = true;
                    self.dispatch(pending, &mut terms, &mut stats, cancel, total)
                        .await?;
                }
                Err(e) if self.fallback_enabled => {
                    warn!(error = %e, "Model service unavailable, using pass-through refinement");
                    let reason = format!("model service unavailable: {}", e);
                    for job in pending {
                        stats.degraded += 1;
                        terms.push(job.fallback(reason.clone()));
                    }
                }
                Err(e) => {
                    return Err(RefineError::ModelUnavailable {
                        record: "health check".to_string(),
                        reason: e.to_string(),
                    }
                    .into());
                }
            }
        }

        stats.refined = terms.len() - stats.degraded;
        terms.sort_by(|a, b| a.provenance.cmp(&b.provenance));

        info!(
            refined = stats.refined,
            degraded = stats.degraded,
            cache_hits = stats.cache_hits,
            "Refinement complete"
        );

        Ok(RefinementOutcome {
            data: RefinedData {
                prompt_version: PROMPT_VERSION.to_string(),
                entities: data.entities.clone(),
                relationships: data.relationships.clone(),
                terms,
            },
            stats,
        })
    }

    async fn dispatch(
        &self,
        jobs: Vec<RefineJob>,
        terms: &mut Vec<RefinedTerm>,
        stats: &mut RefineStats,
        cancel: &CancellationToken,
        total: usize,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.worker_cap));
        let mut workers = JoinSet::new();

        for job in jobs {
            let semaphore = semaphore.clone();
            let model = self.model.clone();
            let policy = self.retry;

            workers.spawn(async move {
                // Closed semaphore never happens here; treat it like an exhausted call
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let err = retry::Exhausted {
                            attempts: 0,
                            last_error: ModelError::Transport(e.to_string()),
                        };
                        return (job, Err(err));
                    }
                };

                let operation = job.provenance.to_string();
                let result = policy
                    .retry(&operation, || request(model.as_ref(), &job))
                    .await;
                (job, result)
            });
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    workers.abort_all();
                    warn!(completed = terms.len(), total, "Refinement cancelled");
                    return Err(RefineError::Cancelled {
                        completed: terms.len(),
                        total,
                    }
                    .into());
                }
                next = workers.join_next() => next,
            };

            let Some(joined) = next else { break };
            let (job, result) = joined?;

            match result {
                Ok(response) => {
                    if let Some(cache) = &self.cache {
                        cache.insert(&job.cache_key, response.clone());
                    }
                    terms.push(job.refined(response));
                }
                Err(exhausted) if self.fallback_enabled => {
                    stats.degraded += 1;
                    terms.push(job.fallback(exhausted.to_string()));
                }
                Err(exhausted) => {
                    workers.abort_all();
                    return Err(RefineError::ModelUnavailable {
                        record: job.provenance.to_string(),
                        reason: exhausted.to_string(),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }
}

/// One model call plus validation of its answer.
async fn request(
    model: &dyn ModelService,
    job: &RefineJob,
) -> Result<RefinementResponse, ModelError> {
    let raw = model.generate_json(&job.prompt).await?;
    let response: RefinementResponse = serde_json::from_str(&raw)
        .map_err(|e| ModelError::InvalidResponse(format!("unexpected shape: {}", e)))?;
    normalize_response(job, response)
}

fn normalize_response(
    job: &RefineJob,
    response: RefinementResponse,
) -> Result<RefinementResponse, ModelError> {
    let type_label = match job.kind {
        RecordKind::Entity => labels::to_class_name(&response.type_label),
        RecordKind::Relationship => labels::to_property_name(&response.type_label),
    };
    if type_label.is_empty() {
        return Err(ModelError::InvalidResponse(format!(
            "empty type label {:?}",
            response.type_label
        )));
    }

    let description = match response.description.trim() {
        "" => job.original_description.clone(),
        text => text.to_string(),
    };

    Ok(RefinementResponse {
        type_label,
        description,
        disambiguation: response.disambiguation.trim().to_string(),
    })
}

fn build_jobs(data: &ExtractedData) -> Vec<RefineJob> {
    let names: HashMap<&str, &str> = data
        .entities
        .iter()
        .map(|e| (e.id.as_str(), e.name.as_str()))
        .collect();

    let entity_jobs = data.entities.iter().map(|e| RefineJob {
        provenance: e.provenance.clone(),
        kind: RecordKind::Entity,
        prompt: prompt::build_entity_prompt(&e.name, &e.entity_type, &e.description),
        cache_key: CacheKey::new(
            &["entity", e.name.as_str(), e.entity_type.as_str(), e.description.as_str()],
            PROMPT_VERSION,
        ),
        original_label: e.entity_type.clone(),
        original_description: e.description.clone(),
    });

    let relationship_jobs = data.relationships.iter().map(|r| {
        let source = names.get(r.source.as_str()).copied().unwrap_or(r.source.as_str());
        let target = names.get(r.target.as_str()).copied().unwrap_or(r.target.as_str());
        RefineJob {
            provenance: r.provenance.clone(),
            kind: RecordKind::Relationship,
            prompt: prompt::build_relationship_prompt(source, target, &r.description),
            cache_key: CacheKey::new(
                &["relationship", source, target, r.description.as_str()],
                PROMPT_VERSION,
            ),
            original_label: r.description.clone(),
            original_description: r.description.clone(),
        }
    });

    entity_jobs.chain(relationship_jobs).collect()
}
