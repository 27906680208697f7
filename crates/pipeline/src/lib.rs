pub mod checkpoint;
pub mod config;
pub mod error;
pub mod report;

pub use checkpoint::{Stage, StagePayload, load_checkpoint, write_checkpoint};
pub use config::PipelineConfig;
pub use error::{PipelineError, exit_code};
pub use report::{RunReport, StageCounts, StageReport, TimedOperation};

use anyhow::{Context, Result};
use ingest::ExtractedData;
use mapping::{
    EmbeddingCache, EmbeddingClient, EmbeddingError, EmbeddingService, MappedData, Mapper,
    OntologyIndex, SemanticIndex, SparqlFetcher,
};
use refine::{ModelService, OllamaClient, RefinedData, RefinementCache, Refiner};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs the four stages in order, resuming from checkpoints as configured.
pub struct Pipeline {
    config: PipelineConfig,
    model: Arc<dyn ModelService>,
    embeddings: Option<Arc<dyn EmbeddingService>>,
    /// Set when the configuration names an ontology file
    ontology: Option<Arc<OntologyIndex>>,
}

impl Pipeline {
    /// Validate the configuration and connect to the configured model and
    /// embedding services.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let model = OllamaClient::new(
            &config.model.endpoint,
            &config.model.name,
            config.request_timeout(),
            config.model.temperature,
        )
        .context("Failed to create model client")?;

        let mut pipeline = Self::with_model(config, Arc::new(model))?;
        if pipeline.config.embedding.enabled {
            let client = EmbeddingClient::new(
                pipeline.config.embedding_endpoint(),
                &pipeline.config.embedding.model,
                pipeline.config.request_timeout(),
            )
            .context("Failed to create embedding client")?;
            pipeline = pipeline.with_embeddings(Arc::new(client));
        }
        Ok(pipeline)
    }

    /// Same as `new`, with a caller-supplied model service and no embeddings.
    pub fn with_model(config: PipelineConfig, model: Arc<dyn ModelService>) -> Result<Self> {
        config.validate()?;
        let ontology = match &config.ontology_path {
            Some(path) => {
                let index = OntologyIndex::load(path)
                    .map_err(|e| PipelineError::Config(format!("ontology: {:#}", e)))?;
                Some(Arc::new(index))
            }
            None => None,
        };

        Ok(Self {
            config,
            model,
            embeddings: None,
            ontology,
        })
    }

    /// Score stage 3 labels with this embedding service as well.
    pub fn with_embeddings(mut self, service: Arc<dyn EmbeddingService>) -> Self {
        self.embeddings = Some(service);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let run_timer = TimedOperation::start();
        let mut report = RunReport::new();
        let from = self.config.resume_from_stage;
        let to = self.config.stop_after_stage;
        let dir = self.config.output_dir.as_path();

        info!(
            run_id = %report.run_id,
            from,
            to,
            output = %dir.display(),
            "Starting pipeline run"
        );

        let active = |stage: Stage| (from..=to).contains(&stage.number());

        // Stage 1
        let mut extracted = None;
        if active(Stage::Extract) {
            check_cancelled(cancel, Stage::Extract)?;
            let timer = TimedOperation::start();
            let data = ingest::extract(&self.config.artifacts_path)
                .await
                .context("Extraction failed")?;
            let path = write_checkpoint(dir, &data)?;
            let counts = StageCounts {
                succeeded: data.record_count(),
                failed: data.rejected_rows.len(),
                ..Default::default()
            };
            report
                .stages
                .push(StageReport::completed(Stage::Extract, counts, &timer, path));
            extracted = Some(data);
        } else {
            report.stages.push(StageReport::skipped(Stage::Extract));
        }

        // Stage 2
        let mut refined = None;
        if active(Stage::Refine) {
            check_cancelled(cancel, Stage::Refine)?;
            let input = match extracted.take() {
                Some(data) => data,
                None => load_checkpoint::<ExtractedData>(dir)?,
            };
            let timer = TimedOperation::start();
            let data = self.refine(&input, cancel).await?;
            let path = write_checkpoint(dir, &data)?;
            let degraded = data.degraded_count();
            let counts = StageCounts {
                succeeded: data.terms.len() - degraded,
                degraded,
                ..Default::default()
            };
            report
                .stages
                .push(StageReport::completed(Stage::Refine, counts, &timer, path));
            refined = Some(data);
        } else if from > Stage::Refine.number() {
            report.stages.push(StageReport::skipped(Stage::Refine));
        }

        // Stage 3
        let mut mapped = None;
        if active(Stage::Map) {
            check_cancelled(cancel, Stage::Map)?;
            let input = match refined.take() {
                Some(data) => data,
                None => load_checkpoint::<RefinedData>(dir)?,
            };
            let timer = TimedOperation::start();
            let mut mapper = Mapper::new(self.ontology().await?, self.config.mapping_settings())?;
            if let Some(semantic) = self.semantic_index(&mapper, &input, cancel).await? {
                mapper = mapper.with_embeddings(semantic);
            }
            let data = mapper.map(&input);
            let path = write_checkpoint(dir, &data)?;
            let counts = StageCounts {
                succeeded: data.mapped_count() - data.low_confidence_count(),
                degraded: data.degraded_count(),
                low_confidence: data.low_confidence_count(),
                unmapped: data.unmapped_count(),
                failed: 0,
            };
            report
                .stages
                .push(StageReport::completed(Stage::Map, counts, &timer, path));
            mapped = Some(data);
        } else if from > Stage::Map.number() {
            report.stages.push(StageReport::skipped(Stage::Map));
        }

        // Stage 4
        if active(Stage::Serialize) {
            check_cancelled(cancel, Stage::Serialize)?;
            let input = match mapped.take() {
                Some(data) => data,
                None => load_checkpoint::<MappedData>(dir)?,
            };
            let timer = TimedOperation::start();
            let graph = rdf::build_triples(&input, &self.config.namespaces);
            let path = self.config.graph_path();
            rdf::write_turtle(&graph, &self.config.namespaces, &path)
                .context("Serialization failed")?;

            // Records, like the other stages: typed entities and mapped edges
            // succeed, untyped entities and fallback edges count as unmapped
            let stats = &graph.stats;
            let counts = StageCounts {
                succeeded: stats.typed_entities + (stats.relationships - stats.fallback_edges),
                unmapped: stats.untyped_entities + stats.fallback_edges,
                failed: stats.skipped_relationships,
                ..Default::default()
            };
            report.triples = Some(graph.len());
            report.entities_written = Some(stats.entities);
            report.edges_written = Some(stats.relationships);
            report.graph_path = Some(path.clone());
            report
                .stages
                .push(StageReport::completed(Stage::Serialize, counts, &timer, path));
        }

        report.elapsed_ms = run_timer.elapsed_ms();
        report.save(&self.config.report_path())?;

        info!(
            run_id = %report.run_id,
            elapsed_ms = report.elapsed_ms,
            triples = report.triples,
            "Pipeline run complete"
        );
        Ok(report)
    }

    async fn refine(&self, input: &ExtractedData, cancel: &CancellationToken) -> Result<RefinedData> {
        let cache_path = self.config.cache_path();
        let cache = if self.config.cache.enabled {
            Some(RefinementCache::load(&cache_path)?)
        } else {
            None
        };

        let mut refiner = Refiner::new(
            self.model.clone(),
            self.config.retry_policy(),
            self.config.concurrency.refine_worker_cap,
        )
        .with_fallback(self.config.model.fallback_enabled);
        if let Some(cache) = &cache {
            refiner = refiner.with_cache(cache.clone());
        }

        let result = refiner.refine(input, cancel).await;

        // Keep whatever was refined, even when the run stops here
        if let Some(cache) = &cache {
            if let Err(e) = cache.save(&cache_path) {
                warn!(error = %e, path = %cache_path.display(), "Failed to persist refinement cache");
            }
        }

        let outcome = result?;
        info!(
            refined = outcome.stats.refined,
            cache_hits = outcome.stats.cache_hits,
            degraded = outcome.stats.degraded,
            model_available = outcome.stats.model_available,
            "Refine stage finished"
        );
        Ok(outcome.data)
    }
}

impl Pipeline {
    /// The configured ontology file, else the remote ontology (cached under
    /// the output directory), else the bundled subset. Without remote fetching
    /// only an existing cache is consulted.
    async fn ontology(&self) -> Result<Arc<OntologyIndex>> {
        let (index, source) = match &self.ontology {
            Some(index) => return Ok(index.clone()),
            None if self.config.ontology.fetch_remote => {
                let fetcher = SparqlFetcher::new(
                    &self.config.ontology.sparql_endpoint,
                    self.config.ontology_timeout(),
                )?
                .with_namespace(&self.config.namespaces.ontology);
                mapping::load_or_fetch(&fetcher, &self.config.ontology_cache_path()).await?
            }
            None => mapping::load_cached_or_builtin(&self.config.ontology_cache_path())?,
        };

        info!(
            ontology = index.name(),
            source = ?source,
            classes = index.classes().len(),
            properties = index.properties().len(),
            "Ontology loaded"
        );
        Ok(Arc::new(index))
    }

    /// Embed every ontology term and refined label once. `None` means lexical
    /// scoring only: no service configured, or the service failed.
    async fn semantic_index(
        &self,
        mapper: &Mapper,
        input: &RefinedData,
        cancel: &CancellationToken,
    ) -> Result<Option<Arc<SemanticIndex>>> {
        let Some(service) = &self.embeddings else {
            return Ok(None);
        };

        let cache_path = self.config.embedding_cache_path();
        let cache = if self.config.cache.enabled {
            EmbeddingCache::load(&cache_path)
        } else {
            EmbeddingCache::new()
        };

        let result = SemanticIndex::build(
            service.clone(),
            &cache,
            mapper.embedding_texts(input),
            self.config.concurrency.refine_worker_cap,
            cancel,
        )
        .await;

        if self.config.cache.enabled && !cache.is_empty() {
            if let Err(e) = cache.save(&cache_path) {
                warn!(error = %e, path = %cache_path.display(), "Failed to persist embedding cache");
            }
        }

        match result {
            Ok(index) => Ok(Some(Arc::new(index))),
            Err(EmbeddingError::Cancelled { .. }) => Err(PipelineError::Cancelled {
                stage: Stage::Map.number(),
            }
            .into()),
            Err(e) => {
                warn!(error = %e, model = service.model_name(), "Embeddings unavailable, using lexical matching");
                Ok(None)
            }
        }
    }
}

fn check_cancelled(cancel: &CancellationToken, stage: Stage) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        warn!(stage = stage.number(), "Run cancelled");
        return Err(PipelineError::Cancelled {
            stage: stage.number(),
        });
    }
    Ok(())
}
