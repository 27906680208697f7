use mapping::{DBPEDIA_SPARQL_ENDPOINT, DEFAULT_FLOOR, MappingSettings};
use rdf::Namespaces;
use refine::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checkpoint::Stage;
use crate::error::PipelineError;

pub const CACHE_FILE: &str = "cache/refine_cache.json";
pub const EMBEDDING_CACHE_FILE: &str = "cache/embeddings.json";
pub const ONTOLOGY_CACHE_FILE: &str = "cache/ontology_dbpedia.json";
pub const REPORT_FILE: &str = "run_report.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub artifacts_path: PathBuf,
    pub output_dir: PathBuf,
    pub graph_name: String,
    /// Ontology JSON; overrides the remote ontology and the bundled subset
    pub ontology_path: Option<PathBuf>,
    pub ontology: OntologyConfig,
    pub model: ModelConfig,
    pub embedding: EmbeddingConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub mapping: MappingConfig,
    pub namespaces: Namespaces,
    pub resume_from_stage: u8,
    pub stop_after_stage: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// `host:port` or a full URL
    pub endpoint: String,
    pub name: String,
    pub request_timeout_secs: u64,
    pub temperature: f32,
    /// Degrade to pass-through refinement instead of failing the run
    pub fallback_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OntologyConfig {
    /// Fetch the ontology from `sparql_endpoint` when no cached copy exists
    pub fetch_remote: bool,
    pub sparql_endpoint: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Score labels by embedding similarity; lexical scoring is used when the service is down
    pub enabled: bool,
    pub model: String,
    /// Defaults to the model service endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub refine_worker_cap: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub retry_count: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub confidence_threshold: f64,
    /// Unset means the default floor, lowered to the threshold when that is smaller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floor: Option<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifacts_path: PathBuf::from("artifacts"),
            output_dir: PathBuf::from("output"),
            graph_name: "graphrag_dbo".to_string(),
            ontology_path: None,
            ontology: OntologyConfig::default(),
            model: ModelConfig::default(),
            embedding: EmbeddingConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            mapping: MappingConfig::default(),
            namespaces: Namespaces::default(),
            resume_from_stage: 1,
            stop_after_stage: 4,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:11434".to_string(),
            name: "llama3".to_string(),
            request_timeout_secs: 120,
            temperature: 0.1,
            fallback_enabled: true,
        }
    }
}

impl Default for OntologyConfig {
    fn default() -> Self {
        Self {
            fetch_remote: true,
            sparql_endpoint: DBPEDIA_SPARQL_ENDPOINT.to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "nomic-embed-text".to_string(),
            endpoint: None,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            refine_worker_cap: 4,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: MappingSettings::default().confidence_threshold,
            floor: None,
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("cannot read {:?}: {}", path, e)))?;
        serde_json::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("cannot parse {:?}: {}", path, e)))
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |msg: String| Err(PipelineError::Config(msg));

        for (field, stage) in [
            ("resume_from_stage", self.resume_from_stage),
            ("stop_after_stage", self.stop_after_stage),
        ] {
            if Stage::from_number(stage).is_none() {
                return fail(format!("{} must be between 1 and 4, got {}", field, stage));
            }
        }
        if self.stop_after_stage < self.resume_from_stage {
            return fail(format!(
                "stop_after_stage ({}) is before resume_from_stage ({})",
                self.stop_after_stage, self.resume_from_stage
            ));
        }

        if self.graph_name.trim().is_empty()
            || self.graph_name.contains(['/', '\\'])
        {
            return fail(format!("graph_name must be a plain file stem, got {:?}", self.graph_name));
        }
        if self.model.endpoint.trim().is_empty() {
            return fail("model.endpoint is empty".to_string());
        }
        if self.model.name.trim().is_empty() {
            return fail("model.name is empty".to_string());
        }
        if self.model.request_timeout_secs == 0 {
            return fail("model.request_timeout_secs must be positive".to_string());
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return fail(format!(
                "model.temperature must be in [0, 2], got {}",
                self.model.temperature
            ));
        }
        if self.ontology.fetch_remote && self.ontology.sparql_endpoint.trim().is_empty() {
            return fail("ontology.sparql_endpoint is empty".to_string());
        }
        if self.ontology.timeout_secs == 0 {
            return fail("ontology.timeout_secs must be positive".to_string());
        }
        if self.embedding.enabled && self.embedding.model.trim().is_empty() {
            return fail("embedding.model is empty".to_string());
        }
        if self.concurrency.refine_worker_cap == 0 {
            return fail("concurrency.refine_worker_cap must be at least 1".to_string());
        }
        if self.retry.retry_max_delay_ms < self.retry.retry_base_delay_ms {
            return fail("retry.retry_max_delay_ms is below retry.retry_base_delay_ms".to_string());
        }

        self.mapping_settings()
            .validate()
            .map_err(|e| PipelineError::Config(format!("mapping: {}", e)))?;
        self.namespaces
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        Ok(())
    }

    pub fn mapping_settings(&self) -> MappingSettings {
        MappingSettings {
            confidence_threshold: self.mapping.confidence_threshold,
            floor: self
                .mapping
                .floor
                .unwrap_or_else(|| DEFAULT_FLOOR.min(self.mapping.confidence_threshold)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.retry_count,
            self.retry.retry_base_delay_ms,
            self.retry.retry_max_delay_ms,
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.model.request_timeout_secs)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.output_dir.join(CACHE_FILE)
    }

    pub fn embedding_cache_path(&self) -> PathBuf {
        self.output_dir.join(EMBEDDING_CACHE_FILE)
    }

    pub fn ontology_cache_path(&self) -> PathBuf {
        self.output_dir.join(ONTOLOGY_CACHE_FILE)
    }

    pub fn embedding_endpoint(&self) -> &str {
        self.embedding
            .endpoint
            .as_deref()
            .unwrap_or(&self.model.endpoint)
    }

    pub fn ontology_timeout(&self) -> Duration {
        Duration::from_secs(self.ontology.timeout_secs)
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(REPORT_FILE)
    }

    pub fn graph_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.ttl", self.graph_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.graph_path(), PathBuf::from("output/graphrag_dbo.ttl"));
        assert_eq!(
            config.cache_path(),
            PathBuf::from("output/cache/refine_cache.json")
        );
        assert_eq!(
            config.ontology_cache_path(),
            PathBuf::from("output/cache/ontology_dbpedia.json")
        );
        assert_eq!(config.embedding_endpoint(), "localhost:11434");
        assert!(config.ontology.fetch_remote);
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"output_dir": "out", "mapping": {"confidence_threshold": 0.9}}"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.mapping.confidence_threshold, 0.9);
        assert_eq!(config.mapping.floor, None);
        assert_eq!(config.mapping_settings().floor, 0.4);
        assert_eq!(config.model.name, "llama3");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = PipelineConfig::default();
        config.mapping.floor = Some(0.8);
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let mut config = PipelineConfig::default();
        config.resume_from_stage = 3;
        config.stop_after_stage = 2;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.resume_from_stage = 5;
        config.stop_after_stage = 5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.concurrency.refine_worker_cap = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.embedding.model = " ".to_string();
        assert!(config.validate().is_err());
        config.embedding.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_low_threshold_lowers_default_floor() {
        let mut config = PipelineConfig::default();
        config.mapping.confidence_threshold = 0.3;
        config.validate().unwrap();
        assert_eq!(
            config.mapping_settings(),
            MappingSettings {
                confidence_threshold: 0.3,
                floor: 0.3,
            }
        );

        config.mapping.confidence_threshold = 0.9;
        assert_eq!(config.mapping_settings().floor, DEFAULT_FLOOR);
    }

    #[test]
    fn test_explicit_floor_above_threshold_rejected() {
        let mut config = PipelineConfig::default();
        config.mapping.confidence_threshold = 0.3;
        config.mapping.floor = Some(0.4);
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        config.mapping.floor = Some(0.2);
        config.validate().unwrap();
        assert_eq!(config.mapping_settings().floor, 0.2);
    }

    #[test]
    fn test_unparsable_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(PipelineError::Config(_))
        ));
    }
}
