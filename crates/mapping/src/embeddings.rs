use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding service unreachable: {0}")]
    Transport(String),

    #[error("embedding service returned status {0}")]
    Status(u16),

    #[error("embedding service returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("embedding cancelled after {completed} of {total} texts")]
    Cancelled { completed: usize, total: usize },
}

/// Turns text into a dense vector.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn model_name(&self) -> &str;
}

#[derive(Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    /// `endpoint` is either `host:port` or a full base URL.
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for the embedding service")?;

        let endpoint = endpoint.trim().trim_end_matches('/');
        let base_url = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{}", endpoint)
        };

        Ok(Self {
            base_url,
            model: model.to_string(),
            client,
        })
    }
}

#[async_trait]
impl EmbeddingService for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/api/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Status(response.status().as_u16()));
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if embedding_response.embedding.is_empty() {
            return Err(EmbeddingError::InvalidResponse("empty embedding".to_string()));
        }
        Ok(embedding_response.embedding)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn cache_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((model.len() as u64).to_le_bytes());
    hasher.update(model.as_bytes());
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: BTreeMap<String, Vec<f32>>,
}

/// Vectors keyed by model and text, shared across tasks and persisted between runs.
#[derive(Clone, Default)]
pub struct EmbeddingCache {
    entries: Arc<DashMap<String, Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a persisted cache; a missing or unreadable file is an empty cache.
    pub fn load(path: &Path) -> Self {
        let cache = Self::new();
        let Ok(content) = std::fs::read_to_string(path) else {
            return cache;
        };

        match serde_json::from_str::<CacheFile>(&content) {
            Ok(file) if file.version == CACHE_FORMAT_VERSION => {
                for (key, value) in file.entries {
                    cache.entries.insert(key, value);
                }
            }
            Ok(file) => warn!(
                found = file.version,
                expected = CACHE_FORMAT_VERSION,
                "Ignoring embedding cache with unknown format"
            ),
            Err(e) => warn!(error = %e, path = %path.display(), "Ignoring unreadable embedding cache"),
        }
        cache
    }

    /// Persist atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).context(format!("Failed to create {:?}", dir))?;

        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            entries: self
                .entries
                .iter()
                .map(|r| (r.key().clone(), r.value().clone()))
                .collect(),
        };
        let json = serde_json::to_string(&file)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(path)
            .context(format!("Failed to write embedding cache: {:?}", path))?;
        Ok(())
    }

    pub fn get(&self, model: &str, text: &str) -> Option<Vec<f32>> {
        self.entries
            .get(&cache_key(model, text))
            .map(|r| r.value().clone())
    }

    pub fn insert(&self, model: &str, text: &str, vector: Vec<f32>) {
        self.entries.insert(cache_key(model, text), vector);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cosine similarity; 0 for mismatched lengths or zero vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Vectors for every text the mapper compares, computed once before scoring.
#[derive(Debug, Clone, Default)]
pub struct SemanticIndex {
    model: String,
    vectors: HashMap<String, Vec<f32>>,
}

impl SemanticIndex {
    /// Embed each distinct text once. Cached vectors are reused; new ones are
    /// added to `cache`. Any failed request fails the whole build.
    pub async fn build(
        service: Arc<dyn EmbeddingService>,
        cache: &EmbeddingCache,
        texts: impl IntoIterator<Item = String>,
        worker_cap: usize,
        cancel: &CancellationToken,
    ) -> Result<Self, EmbeddingError> {
        let model = service.model_name().to_string();
        let distinct: BTreeSet<String> = texts.into_iter().collect();
        let total = distinct.len();

        let mut vectors = HashMap::with_capacity(total);
        let mut pending = Vec::new();
        for text in distinct {
            match cache.get(&model, &text) {
                Some(vector) => {
                    vectors.insert(text, vector);
                }
                None => pending.push(text),
            }
        }
        debug!(cached = vectors.len(), pending = pending.len(), "Embedding texts");

        let semaphore = Arc::new(Semaphore::new(worker_cap.max(1)));
        let mut workers = JoinSet::new();
        for text in pending {
            let semaphore = semaphore.clone();
            let service = service.clone();
            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| EmbeddingError::Transport(e.to_string()))?;
                let vector = service.embed(&text).await?;
                Ok::<_, EmbeddingError>((text, vector))
            });
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    workers.abort_all();
                    return Err(EmbeddingError::Cancelled { completed: vectors.len(), total });
                }
                next = workers.join_next() => next,
            };

            let Some(joined) = next else { break };
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(EmbeddingError::Transport(e.to_string())),
            };
            let (text, vector) = match result {
                Ok(embedded) => embedded,
                Err(e) => {
                    workers.abort_all();
                    return Err(e);
                }
            };

            cache.insert(&model, &text, vector.clone());
            vectors.insert(text, vector);
        }

        info!(model = %model, texts = total, "Embeddings ready");
        Ok(Self { model, vectors })
    }

    /// Index over vectors computed elsewhere.
    pub fn from_vectors(model: &str, vectors: impl IntoIterator<Item = (String, Vec<f32>)>) -> Self {
        Self {
            model: model.to_string(),
            vectors: vectors.into_iter().collect(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn vector(&self, text: &str) -> Option<&[f32]> {
        self.vectors.get(text).map(Vec::as_slice)
    }

    /// Cosine similarity of two embedded texts, clamped to [0, 1].
    pub fn similarity(&self, a: &str, b: &str) -> Option<f64> {
        let (a, b) = (self.vector(a)?, self.vector(b)?);
        Some(cosine(a, b).clamp(0.0, 1.0))
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Deterministic vectors from a lookup table; unknown texts fail.
    struct TableEmbeddings {
        table: HashMap<&'static str, Vec<f32>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingService for TableEmbeddings {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.table
                .get(text)
                .cloned()
                .ok_or_else(|| EmbeddingError::Status(404))
        }

        fn model_name(&self) -> &str {
            "table"
        }
    }

    fn table() -> Arc<TableEmbeddings> {
        Arc::new(TableEmbeddings {
            table: HashMap::from([
                ("metropolis", vec![1.0, 0.0]),
                ("City", vec![0.9, 0.1]),
                ("Animal", vec![-1.0, 0.0]),
            ]),
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_cosine() {
        assert!((cosine(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine(&[1.0, 0.0], &[0.0, 3.0]).abs() < 1e-9);
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_each_text_is_embedded_once() {
        let service = table();
        let cache = EmbeddingCache::new();
        let texts = ["metropolis", "City", "City", "Animal"].map(String::from);

        let cancel = CancellationToken::new();
        let index = SemanticIndex::build(service.clone(), &cache, texts.clone(), 2, &cancel)
            .await
            .unwrap();
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
        assert_eq!(index.len(), 3);
        assert!(index.similarity("metropolis", "City").unwrap() > 0.9);
        assert_eq!(index.similarity("metropolis", "Animal"), Some(0.0));

        // Second build is served from the cache
        SemanticIndex::build(service.clone(), &cache, texts, 2, &cancel)
            .await
            .unwrap();
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_text_fails_the_build() {
        let texts = ["metropolis", "unknown"].map(String::from);
        let cancel = CancellationToken::new();
        let err = SemanticIndex::build(table(), &EmbeddingCache::new(), texts, 1, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::Status(404)));
    }

    #[tokio::test]
    async fn test_cancelled_build() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let texts = ["metropolis"].map(String::from);
        let err = SemanticIndex::build(table(), &EmbeddingCache::new(), texts, 1, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::Cancelled { .. }));
    }

    #[test]
    fn test_cache_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("embeddings.json");

        let cache = EmbeddingCache::new();
        cache.insert("nomic-embed-text", "City", vec![0.5, 0.25]);
        cache.save(&path).unwrap();

        let loaded = EmbeddingCache::load(&path);
        assert_eq!(loaded.get("nomic-embed-text", "City"), Some(vec![0.5, 0.25]));
        assert_eq!(loaded.get("other-model", "City"), None);
        assert!(EmbeddingCache::load(&dir.path().join("absent.json")).is_empty());
    }

    #[tokio::test]
    async fn test_client_posts_model_and_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .and(body_partial_json(json!({"model": "nomic-embed-text", "prompt": "City"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embedding": [0.1, 0.2]})))
            .mount(&server)
            .await;

        let client =
            EmbeddingClient::new(&server.uri(), "nomic-embed-text", Duration::from_secs(5)).unwrap();
        assert_eq!(client.embed("City").await.unwrap(), vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_client_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = EmbeddingClient::new(&server.uri(), "missing", Duration::from_secs(5)).unwrap();
        assert!(matches!(client.embed("City").await, Err(EmbeddingError::Status(404))));
    }
}
