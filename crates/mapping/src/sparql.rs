use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ontology::{OntologyFile, OntologyIndex, TermEntry};

pub const DBPEDIA_SPARQL_ENDPOINT: &str = "https://dbpedia.org/sparql";
pub const DBPEDIA_NAMESPACE: &str = "http://dbpedia.org/ontology/";

const CLASS_QUERY: &str = r#"
PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>
PREFIX owl: <http://www.w3.org/2002/07/owl#>
SELECT DISTINCT ?term ?label ?comment ?parent WHERE {
    ?term a owl:Class .
    FILTER(STRSTARTS(STR(?term), "{ns}"))
    OPTIONAL { ?term rdfs:label ?label . FILTER(LANG(?label) = "en") }
    OPTIONAL { ?term rdfs:comment ?comment . FILTER(LANG(?comment) = "en") }
    OPTIONAL { ?term rdfs:subClassOf ?parent . FILTER(STRSTARTS(STR(?parent), "{ns}")) }
}
"#;

const PROPERTY_QUERY: &str = r#"
PREFIX rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#>
PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>
PREFIX owl: <http://www.w3.org/2002/07/owl#>
SELECT DISTINCT ?term ?label ?comment WHERE {
    { ?term a owl:ObjectProperty } UNION { ?term a rdf:Property }
    FILTER(STRSTARTS(STR(?term), "{ns}"))
    OPTIONAL { ?term rdfs:label ?label . FILTER(LANG(?label) = "en") }
    OPTIONAL { ?term rdfs:comment ?comment . FILTER(LANG(?comment) = "en") }
}
"#;

/// Where the run's ontology came from.
#[derive(Debug, Clone, PartialEq)]
pub enum OntologySource {
    Cache(PathBuf),
    Remote(String),
    Builtin,
}

#[derive(Deserialize)]
struct SparqlResults {
    results: ResultSet,
}

#[derive(Deserialize)]
struct ResultSet {
    bindings: Vec<HashMap<String, BindingValue>>,
}

#[derive(Deserialize)]
struct BindingValue {
    value: String,
}

/// Reads ontology classes and properties from a SPARQL endpoint.
#[derive(Clone)]
pub struct SparqlFetcher {
    endpoint: String,
    namespace: String,
    client: reqwest::Client,
}

impl SparqlFetcher {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for the SPARQL endpoint")?;

        Ok(Self {
            endpoint: endpoint.trim().to_string(),
            namespace: DBPEDIA_NAMESPACE.to_string(),
            client,
        })
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch every class and property under the namespace.
    pub async fn fetch(&self) -> Result<OntologyFile> {
        let class_rows = self.select(&CLASS_QUERY.replace("{ns}", &self.namespace)).await?;
        let property_rows = self
            .select(&PROPERTY_QUERY.replace("{ns}", &self.namespace))
            .await?;

        let classes = self.entries(class_rows, true);
        let mut properties = self.entries(property_rows, false);
        // A name can only refer to one term
        properties.retain(|p| classes.iter().all(|c| c.name != p.name));

        if classes.is_empty() {
            bail!("SPARQL endpoint {} returned no classes", self.endpoint);
        }

        info!(
            endpoint = %self.endpoint,
            classes = classes.len(),
            properties = properties.len(),
            "Ontology fetched"
        );

        Ok(OntologyFile {
            name: "dbpedia".to_string(),
            namespace: self.namespace.clone(),
            classes,
            properties,
        })
    }

    async fn select(&self, query: &str) -> Result<Vec<HashMap<String, BindingValue>>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("query", query)])
            .header(reqwest::header::ACCEPT, "application/sparql-results+json")
            .send()
            .await
            .context(format!("SPARQL request to {} failed", self.endpoint))?;

        if !response.status().is_success() {
            bail!("SPARQL endpoint {} returned {}", self.endpoint, response.status());
        }

        let results: SparqlResults = response
            .json()
            .await
            .context("Failed to parse SPARQL results")?;
        Ok(results.results.bindings)
    }

    /// One entry per local name, in name order. Rows repeat when a term has
    /// several labels or parents; the first row wins.
    fn entries(&self, rows: Vec<HashMap<String, BindingValue>>, with_parent: bool) -> Vec<TermEntry> {
        let mut entries: BTreeMap<String, TermEntry> = BTreeMap::new();

        for row in rows {
            let Some(name) = row.get("term").and_then(|t| self.local_name(&t.value)) else {
                continue;
            };
            if entries.contains_key(&name) {
                continue;
            }

            let label = row
                .get("label")
                .map(|l| l.value.trim().to_string())
                .filter(|l| !l.is_empty() && *l != name);
            let comment = row
                .get("comment")
                .map(|c| c.value.trim().to_string())
                .unwrap_or_default();
            let parent = if with_parent {
                row.get("parent")
                    .and_then(|p| self.local_name(&p.value))
                    .filter(|p| *p != name)
            } else {
                None
            };

            entries.insert(
                name.clone(),
                TermEntry {
                    name,
                    uri: None,
                    label,
                    comment,
                    parent,
                },
            );
        }

        debug!(terms = entries.len(), "SPARQL rows collapsed");
        entries.into_values().collect()
    }

    fn local_name(&self, uri: &str) -> Option<String> {
        let name = uri.strip_prefix(&self.namespace)?;
        if name.is_empty() || name.contains(['/', '(', ')', '#']) {
            return None;
        }
        Some(name.to_string())
    }
}

/// The cached copy of the remote ontology when present, else fetch and cache
/// it. Falls back to the bundled subset when the endpoint cannot be used.
pub async fn load_or_fetch(
    fetcher: &SparqlFetcher,
    cache_path: &Path,
) -> Result<(OntologyIndex, OntologySource)> {
    if let Some(index) = cached(cache_path) {
        return Ok((index, OntologySource::Cache(cache_path.to_path_buf())));
    }

    let fetched = match fetcher.fetch().await {
        Ok(file) => OntologyIndex::build(file.clone()).map(|index| (file, index)),
        Err(e) => Err(e),
    };

    match fetched {
        Ok((file, index)) => {
            if let Err(e) = save_ontology(&file, cache_path) {
                warn!(error = %format!("{:#}", e), path = %cache_path.display(), "Failed to cache ontology");
            }
            Ok((index, OntologySource::Remote(fetcher.endpoint().to_string())))
        }
        Err(e) => {
            warn!(
                error = %format!("{:#}", e),
                endpoint = %fetcher.endpoint(),
                "Ontology fetch failed, using the bundled subset"
            );
            Ok((OntologyIndex::builtin()?, OntologySource::Builtin))
        }
    }
}

/// The cached remote ontology when present, else the bundled subset.
/// Never touches the network.
pub fn load_cached_or_builtin(cache_path: &Path) -> Result<(OntologyIndex, OntologySource)> {
    match cached(cache_path) {
        Some(index) => Ok((index, OntologySource::Cache(cache_path.to_path_buf()))),
        None => Ok((OntologyIndex::builtin()?, OntologySource::Builtin)),
    }
}

fn cached(cache_path: &Path) -> Option<OntologyIndex> {
    if !cache_path.exists() {
        return None;
    }
    match OntologyIndex::load(cache_path) {
        Ok(index) => {
            info!(path = %cache_path.display(), "Ontology loaded from cache");
            Some(index)
        }
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Ignoring unusable ontology cache");
            None
        }
    }
}

fn save_ontology(file: &OntologyFile, path: &Path) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).context(format!("Failed to create {:?}", dir))?;

    let json = serde_json::to_string_pretty(file)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.persist(path)
        .context(format!("Failed to write ontology cache: {:?}", path))?;
    Ok(())
}
