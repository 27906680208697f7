use async_trait::async_trait;
use mapping::{EmbeddingError, EmbeddingService};
use pipeline::error::{EXIT_INPUT, EXIT_MODEL_UNAVAILABLE, EXIT_OUTPUT_INVALID, EXIT_RESUME};
use pipeline::{Pipeline, PipelineConfig, PipelineError, Stage, exit_code};
use refine::{ModelError, ModelService};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

struct ScriptedModel {
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelService for ScriptedModel {
    async fn generate_json(&self, prompt: &str) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = if prompt.contains("RELATIONSHIP:") {
            json!({"type": "capital", "description": "Paris is the capital of France.", "disambiguation": "capital city"})
        } else if prompt.contains("\"Paris\"") {
            json!({"type": "City", "description": "Paris is the capital of France.", "disambiguation": "city in France"})
        } else if prompt.contains("\"France\"") {
            json!({"type": "Country", "description": "France is a country in Europe.", "disambiguation": "European country"})
        } else {
            json!({"type": "Thing", "description": "", "disambiguation": ""})
        };
        Ok(response.to_string())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Texts are embedded by their leading word.
struct KeywordEmbeddings;

#[async_trait]
impl EmbeddingService for KeywordEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let lower = text.to_lowercase();
        Ok(vec![
            if lower.starts_with("city") { 1.0 } else { 0.0 },
            if lower.starts_with("country") { 1.0 } else { 0.0 },
            0.1,
        ])
    }

    fn model_name(&self) -> &str {
        "keywords"
    }
}

struct OfflineEmbeddings;

#[async_trait]
impl EmbeddingService for OfflineEmbeddings {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Transport("connection refused".to_string()))
    }

    fn model_name(&self) -> &str {
        "offline"
    }
}

struct UnreachableModel;

#[async_trait]
impl ModelService for UnreachableModel {
    async fn generate_json(&self, _prompt: &str) -> Result<String, ModelError> {
        Err(ModelError::Transport("connection refused".to_string()))
    }

    async fn health_check(&self) -> Result<(), ModelError> {
        Err(ModelError::Transport("connection refused".to_string()))
    }

    fn model_name(&self) -> &str {
        "unreachable"
    }
}

fn write_artifacts(dir: &Path, entities: Value, relationships: Value) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("create_final_entities.json"),
        serde_json::to_string(&entities).unwrap(),
    )
    .unwrap();
    std::fs::write(
        dir.join("create_final_relationships.json"),
        serde_json::to_string(&relationships).unwrap(),
    )
    .unwrap();
}

fn paris_only(dir: &Path) {
    write_artifacts(
        dir,
        json!([{"id": "1", "name": "Paris", "type": "location", "description": "capital of France"}]),
        json!([]),
    );
}

fn paris_and_france(dir: &Path) {
    write_artifacts(
        dir,
        json!([
            {"id": "1", "name": "Paris", "type": "location", "description": "capital of France"},
            {"id": "2", "name": "France", "type": "geo", "description": "country in Europe"},
            {"id": "3", "name": "Blorptangle", "type": "zzqx", "description": ""}
        ]),
        json!([
            {"source": "Paris", "target": "France", "description": "is the capital of", "weight": 9.0},
            {"source": "Paris", "target": "Atlantis", "description": "is near", "weight": 1.0}
        ]),
    );
}

fn config(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig {
        artifacts_path: root.join("artifacts"),
        output_dir: root.join("output"),
        ..PipelineConfig::default()
    };
    config.retry.retry_count = 1;
    config.retry.retry_base_delay_ms = 1;
    config.retry.retry_max_delay_ms = 2;
    config.ontology.fetch_remote = false;
    config
}

async fn run(config: PipelineConfig, model: Arc<dyn ModelService>) -> anyhow::Result<pipeline::RunReport> {
    let pipeline = Pipeline::with_model(config, model)?;
    pipeline.run(&CancellationToken::new()).await
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

fn checkpoint(config: &PipelineConfig, stem: &str) -> Value {
    serde_json::from_str(&read(&config.output_dir.join(format!("{}.json", stem)))).unwrap()
}

#[tokio::test]
async fn test_paris_becomes_a_city() {
    let root = tempfile::tempdir().unwrap();
    paris_only(&root.path().join("artifacts"));
    let config = config(root.path());

    let report = run(config.clone(), ScriptedModel::new()).await.unwrap();

    let mapped = checkpoint(&config, "step3_mapped");
    let outcome = &mapped["payload"]["terms"][0]["outcome"];
    assert_eq!(outcome["status"], "mapped");
    assert_eq!(outcome["uri"], "http://dbpedia.org/ontology/City");
    assert!(outcome["confidence"].as_f64().unwrap() >= 0.8);

    let turtle = read(&config.graph_path());
    assert!(turtle.contains("<http://graphrag.local/entity/Paris_1> a dbo:City"));
    assert!(turtle.contains("rdfs:label \"Paris\""));

    assert_eq!(report.stage(Stage::Map).unwrap().counts.succeeded, 1);
    assert!(config.report_path().exists());
}

#[tokio::test]
async fn test_unreachable_model_degrades_and_completes() {
    let root = tempfile::tempdir().unwrap();
    paris_only(&root.path().join("artifacts"));
    let config = config(root.path());

    let report = run(config.clone(), Arc::new(UnreachableModel)).await.unwrap();

    let refined = checkpoint(&config, "step2_refined");
    let term = &refined["payload"]["terms"][0];
    assert_eq!(term["degraded"], true);
    assert_eq!(term["type_label"], "location");
    assert_eq!(report.stage(Stage::Refine).unwrap().counts.degraded, 1);

    let turtle = read(&config.graph_path());
    assert!(turtle.contains("rdfs:label \"Paris\""));
}

#[tokio::test]
async fn test_unreachable_model_without_fallback_fails() {
    let root = tempfile::tempdir().unwrap();
    paris_only(&root.path().join("artifacts"));
    let mut config = config(root.path());
    config.model.fallback_enabled = false;

    let err = run(config.clone(), Arc::new(UnreachableModel)).await.unwrap_err();
    assert_eq!(exit_code(&err), EXIT_MODEL_UNAVAILABLE);
    assert!(config.output_dir.join("step1_extracted.json").exists());
    assert!(!config.output_dir.join("step2_refined.json").exists());
}

#[tokio::test]
async fn test_every_entity_is_in_the_graph() {
    let root = tempfile::tempdir().unwrap();
    paris_and_france(&root.path().join("artifacts"));
    let config = config(root.path());

    let report = run(config.clone(), ScriptedModel::new()).await.unwrap();
    let turtle = read(&config.graph_path());

    for name in ["Paris", "France", "Blorptangle"] {
        assert!(
            turtle.contains(&format!("rdfs:label \"{}\"", name)),
            "{} missing from graph",
            name
        );
    }
    assert!(turtle.contains("dbo:capital <http://graphrag.local/entity/France_2>"));
    assert!(turtle.contains("a dbo:Country"));

    let serialize = report.stage(Stage::Serialize).unwrap();
    assert_eq!(serialize.counts.failed, 1);
    assert_eq!(serialize.counts.succeeded + serialize.counts.unmapped, 4);
    assert_eq!(report.entities_written, Some(3));
    assert_eq!(report.edges_written, Some(1));
    assert!(report.triples.unwrap() > 4);
}

#[tokio::test]
async fn test_repeated_entity_id_survives_resume() {
    let root = tempfile::tempdir().unwrap();
    write_artifacts(
        &root.path().join("artifacts"),
        json!([
            {"id": "1", "name": "Paris", "type": "location", "description": "capital of France"},
            {"id": "1", "name": "Paris Metro", "type": "system", "description": "transit"},
            {"id": "2", "name": "France", "type": "geo", "description": "country in Europe"}
        ]),
        json!([{"source": "Paris", "target": "France", "description": "is the capital of", "weight": 9.0}]),
    );
    let config = config(root.path());

    let report = run(config.clone(), ScriptedModel::new()).await.unwrap();
    assert_eq!(report.stage(Stage::Extract).unwrap().counts.failed, 1);
    let full = read(&config.graph_path());
    assert!(!full.contains("Paris Metro"));

    let mut resumed = config.clone();
    resumed.resume_from_stage = 3;
    run(resumed, ScriptedModel::new()).await.unwrap();
    assert_eq!(read(&config.graph_path()), full);
}

#[tokio::test]
async fn test_non_finite_weight_survives_resume() {
    let root = tempfile::tempdir().unwrap();
    write_artifacts(
        &root.path().join("artifacts"),
        json!([
            {"id": "1", "name": "Paris", "type": "location", "description": "capital of France"},
            {"id": "2", "name": "France", "type": "geo", "description": "country in Europe"}
        ]),
        json!([
            {"source": "Paris", "target": "France", "description": "is the capital of", "weight": "NaN"},
            {"source": "France", "target": "Paris", "description": "has capital", "weight": 2.0}
        ]),
    );
    let config = config(root.path());

    let report = run(config.clone(), ScriptedModel::new()).await.unwrap();
    assert_eq!(report.stage(Stage::Extract).unwrap().counts.failed, 1);
    let full = read(&config.graph_path());

    let mut resumed = config.clone();
    resumed.resume_from_stage = 2;
    run(resumed, ScriptedModel::new()).await.unwrap();
    assert_eq!(read(&config.graph_path()), full);
}

#[tokio::test]
async fn test_rerun_is_idempotent_and_served_from_cache() {
    let root = tempfile::tempdir().unwrap();
    paris_and_france(&root.path().join("artifacts"));
    let config = config(root.path());

    let first_model = ScriptedModel::new();
    run(config.clone(), first_model.clone()).await.unwrap();
    assert_eq!(first_model.calls(), 5);

    let files = [
        config.output_dir.join("step1_extracted.json"),
        config.output_dir.join("step2_refined.json"),
        config.output_dir.join("step3_mapped.json"),
        config.graph_path(),
    ];
    let before: Vec<String> = files.iter().map(|f| read(f)).collect();

    let second_model = ScriptedModel::new();
    run(config.clone(), second_model.clone()).await.unwrap();
    assert_eq!(second_model.calls(), 0);

    let after: Vec<String> = files.iter().map(|f| read(f)).collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_resume_matches_full_run() {
    let root = tempfile::tempdir().unwrap();
    paris_and_france(&root.path().join("artifacts"));
    let config = config(root.path());

    run(config.clone(), ScriptedModel::new()).await.unwrap();
    let full = read(&config.graph_path());
    std::fs::remove_file(config.graph_path()).unwrap();

    let mut resumed = config.clone();
    resumed.resume_from_stage = 3;
    let model = ScriptedModel::new();
    let report = run(resumed, model.clone()).await.unwrap();

    assert_eq!(read(&config.graph_path()), full);
    assert_eq!(model.calls(), 0);
    assert!(report.stage(Stage::Extract).unwrap().skipped);
    assert!(report.stage(Stage::Refine).unwrap().skipped);
    assert!(!report.stage(Stage::Map).unwrap().skipped);
}

#[tokio::test]
async fn test_resume_without_checkpoint_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    paris_only(&root.path().join("artifacts"));
    let mut config = config(root.path());
    config.resume_from_stage = 3;

    let err = run(config.clone(), ScriptedModel::new()).await.unwrap_err();
    assert_eq!(exit_code(&err), EXIT_RESUME);
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::Resume { path, .. }) => assert!(path.ends_with("step2_refined.json")),
        other => panic!("expected resume error, got {:?}", other),
    }
    assert!(!config.graph_path().exists());
}

#[tokio::test]
async fn test_missing_column_stops_before_any_output() {
    let root = tempfile::tempdir().unwrap();
    write_artifacts(
        &root.path().join("artifacts"),
        json!([{"id": "1", "name": "Paris", "type": "location"}]),
        json!([]),
    );
    let config = config(root.path());

    let err = run(config.clone(), ScriptedModel::new()).await.unwrap_err();
    assert_eq!(exit_code(&err), EXIT_INPUT);
    assert!(format!("{:#}", err).contains("description"));
    assert!(!config.output_dir.join("step1_extracted.json").exists());
}

#[tokio::test]
async fn test_invalid_graph_is_never_written() {
    let root = tempfile::tempdir().unwrap();
    paris_only(&root.path().join("artifacts"));
    let mut config = config(root.path());
    config.stop_after_stage = 3;
    run(config.clone(), ScriptedModel::new()).await.unwrap();
    assert!(!config.graph_path().exists());

    let path = config.output_dir.join("step3_mapped.json");
    let broken = read(&path).replace("http://dbpedia.org/ontology/City", "not an iri");
    std::fs::write(&path, broken).unwrap();

    config.resume_from_stage = 4;
    config.stop_after_stage = 4;
    let err = run(config.clone(), ScriptedModel::new()).await.unwrap_err();
    assert_eq!(exit_code(&err), EXIT_OUTPUT_INVALID);
    assert!(!config.graph_path().exists());
}

#[tokio::test]
async fn test_cancelled_run_keeps_completed_checkpoints() {
    let root = tempfile::tempdir().unwrap();
    paris_only(&root.path().join("artifacts"));
    let config = config(root.path());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let pipeline = Pipeline::with_model(config.clone(), ScriptedModel::new()).unwrap();
    let err = pipeline.run(&cancel).await.unwrap_err();

    assert_eq!(exit_code(&err), pipeline::error::EXIT_CANCELLED);
    assert!(!config.output_dir.join("step1_extracted.json").exists());
}

#[tokio::test]
async fn test_embeddings_are_recorded_and_cached() {
    let root = tempfile::tempdir().unwrap();
    paris_only(&root.path().join("artifacts"));
    let config = config(root.path());

    let pipeline = Pipeline::with_model(config.clone(), ScriptedModel::new())
        .unwrap()
        .with_embeddings(Arc::new(KeywordEmbeddings));
    pipeline.run(&CancellationToken::new()).await.unwrap();

    let mapped = checkpoint(&config, "step3_mapped");
    assert_eq!(mapped["payload"]["embedding_model"], "keywords");
    assert_eq!(
        mapped["payload"]["terms"][0]["outcome"]["uri"],
        "http://dbpedia.org/ontology/City"
    );
    assert!(config.embedding_cache_path().exists());
}

#[tokio::test]
async fn test_offline_embeddings_fall_back_to_lexical() {
    let root = tempfile::tempdir().unwrap();
    paris_only(&root.path().join("artifacts"));
    let config = config(root.path());

    let pipeline = Pipeline::with_model(config.clone(), ScriptedModel::new())
        .unwrap()
        .with_embeddings(Arc::new(OfflineEmbeddings));
    let report = pipeline.run(&CancellationToken::new()).await.unwrap();

    let mapped = checkpoint(&config, "step3_mapped");
    assert!(mapped["payload"].get("embedding_model").is_none());
    assert_eq!(
        mapped["payload"]["terms"][0]["outcome"]["uri"],
        "http://dbpedia.org/ontology/City"
    );
    assert_eq!(report.stage(Stage::Map).unwrap().counts.succeeded, 1);
}

#[tokio::test]
async fn test_cached_remote_ontology_is_used_offline() {
    let root = tempfile::tempdir().unwrap();
    paris_only(&root.path().join("artifacts"));
    let mut config = config(root.path());
    config.ontology.fetch_remote = true;
    config.ontology.sparql_endpoint = "http://127.0.0.1:9/sparql".to_string();
    config.ontology.timeout_secs = 1;

    let cached = json!({
        "name": "dbpedia",
        "namespace": "http://dbpedia.org/ontology/",
        "classes": [{"name": "Place"}, {"name": "City", "parent": "Place"}]
    });
    let cache_path = config.ontology_cache_path();
    std::fs::create_dir_all(cache_path.parent().unwrap()).unwrap();
    std::fs::write(&cache_path, cached.to_string()).unwrap();

    run(config.clone(), ScriptedModel::new()).await.unwrap();

    let mapped = checkpoint(&config, "step3_mapped");
    assert_eq!(mapped["payload"]["ontology"], "dbpedia");
    assert_eq!(
        mapped["payload"]["terms"][0]["outcome"]["uri"],
        "http://dbpedia.org/ontology/City"
    );
}

#[tokio::test]
async fn test_unreachable_endpoint_without_cache_uses_bundled_ontology() {
    let root = tempfile::tempdir().unwrap();
    paris_only(&root.path().join("artifacts"));
    let mut config = config(root.path());
    config.ontology.fetch_remote = true;
    config.ontology.sparql_endpoint = "http://127.0.0.1:9/sparql".to_string();
    config.ontology.timeout_secs = 1;

    run(config.clone(), ScriptedModel::new()).await.unwrap();

    let mapped = checkpoint(&config, "step3_mapped");
    assert_eq!(mapped["payload"]["ontology"], "dbpedia-core");
    assert!(!config.ontology_cache_path().exists());
}
