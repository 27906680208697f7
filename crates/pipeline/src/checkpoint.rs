use anyhow::{Context, Result};
use ingest::{ExtractedData, Provenance};
use mapping::MappedData;
use refine::RefinedData;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

pub const CHECKPOINT_VERSION: u32 = 1;
const SCHEMA_PREFIX: &str = "rdf-pipeline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Extract = 1,
    Refine = 2,
    Map = 3,
    Serialize = 4,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Extract, Stage::Refine, Stage::Map, Stage::Serialize];

    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.number() == n)
    }

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Refine => "refine",
            Stage::Map => "map",
            Stage::Serialize => "serialize",
        }
    }

    /// File stem of the checkpoint this stage writes; the last stage writes the graph instead.
    pub fn checkpoint_stem(self) -> Option<&'static str> {
        match self {
            Stage::Extract => Some("step1_extracted"),
            Stage::Refine => Some("step2_refined"),
            Stage::Map => Some("step3_mapped"),
            Stage::Serialize => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    schema: String,
    version: u32,
    stage: u8,
    payload: T,
}

/// Output of a stage that is persisted as a checkpoint.
pub trait StagePayload: Serialize + DeserializeOwned {
    const STAGE: Stage;

    /// Structural checks run before every write and after every load,
    /// beyond what deserialization enforces.
    fn check(&self) -> Result<(), String>;

    fn file_stem() -> &'static str {
        Self::STAGE.checkpoint_stem().unwrap_or("step4_graph")
    }

    fn schema() -> String {
        format!("{}/{}", SCHEMA_PREFIX, Self::file_stem())
    }
}

pub fn checkpoint_path<T: StagePayload>(dir: &Path) -> PathBuf {
    dir.join(format!("{}.json", T::file_stem()))
}

/// Check, then write atomically. Same payload in, same bytes out. A payload
/// that fails its checks is never written, so every checkpoint on disk can be
/// resumed from.
pub fn write_checkpoint<T: StagePayload>(dir: &Path, payload: &T) -> Result<PathBuf> {
    let path = checkpoint_path::<T>(dir);
    payload.check().map_err(|reason| PipelineError::Checkpoint {
        path: path.clone(),
        reason,
    })?;

    std::fs::create_dir_all(dir).context(format!("Failed to create {:?}", dir))?;

    let envelope = Envelope {
        schema: T::schema(),
        version: CHECKPOINT_VERSION,
        stage: T::STAGE.number(),
        payload,
    };
    let json = serde_json::to_string_pretty(&envelope)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.persist(&path)
        .context(format!("Failed to write checkpoint: {:?}", path))?;

    tracing::info!(path = %path.display(), stage = T::STAGE.number(), "Checkpoint written");
    Ok(path)
}

/// Load and validate a checkpoint. Every failure is a resume error naming the file.
pub fn load_checkpoint<T: StagePayload>(dir: &Path) -> Result<T, PipelineError> {
    let path = checkpoint_path::<T>(dir);
    let resume_error = |reason: String| PipelineError::Resume {
        path: path.clone(),
        reason,
    };

    if !path.is_file() {
        return Err(resume_error("checkpoint not found".to_string()));
    }
    let content = std::fs::read_to_string(&path).map_err(|e| resume_error(e.to_string()))?;

    let envelope: Envelope<serde_json::Value> = serde_json::from_str(&content)
        .map_err(|e| resume_error(format!("not a checkpoint: {}", e)))?;
    if envelope.schema != T::schema() {
        return Err(resume_error(format!(
            "schema {:?}, expected {:?}",
            envelope.schema,
            T::schema()
        )));
    }
    if envelope.version != CHECKPOINT_VERSION {
        return Err(resume_error(format!(
            "version {}, expected {}",
            envelope.version, CHECKPOINT_VERSION
        )));
    }
    if envelope.stage != T::STAGE.number() {
        return Err(resume_error(format!(
            "stage {}, expected {}",
            envelope.stage,
            T::STAGE.number()
        )));
    }

    let payload: T = serde_json::from_value(envelope.payload)
        .map_err(|e| resume_error(format!("payload does not match schema: {}", e)))?;
    payload.check().map_err(resume_error)?;

    tracing::info!(path = %path.display(), stage = T::STAGE.number(), "Checkpoint loaded");
    Ok(payload)
}

// Every record has exactly one term and every term points at a record
fn check_records(
    entities: usize,
    provenances: &[&Provenance],
    records: &HashSet<&Provenance>,
) -> Result<(), String> {
    if entities == 0 {
        return Err("no entities".to_string());
    }
    if provenances.len() != records.len() {
        return Err(format!(
            "{} terms for {} records",
            provenances.len(),
            records.len()
        ));
    }
    let mut seen = HashSet::new();
    for provenance in provenances {
        if !records.contains(provenance) {
            return Err(format!("term {} has no source record", provenance));
        }
        if !seen.insert(*provenance) {
            return Err(format!("record {} refined twice", provenance));
        }
    }
    Ok(())
}

impl StagePayload for ExtractedData {
    const STAGE: Stage = Stage::Extract;

    fn check(&self) -> Result<(), String> {
        if self.entities.is_empty() {
            return Err("no entities".to_string());
        }
        let mut ids = HashSet::new();
        for entity in &self.entities {
            if !ids.insert(entity.id.as_str()) {
                return Err(format!("duplicate entity id {:?}", entity.id));
            }
        }
        Ok(())
    }
}

impl StagePayload for RefinedData {
    const STAGE: Stage = Stage::Refine;

    fn check(&self) -> Result<(), String> {
        if self.prompt_version.is_empty() {
            return Err("missing prompt_version".to_string());
        }
        let records: HashSet<&Provenance> = self
            .entities
            .iter()
            .map(|e| &e.provenance)
            .chain(self.relationships.iter().map(|r| &r.provenance))
            .collect();
        let provenances: Vec<&Provenance> = self.terms.iter().map(|t| &t.provenance).collect();
        check_records(self.entities.len(), &provenances, &records)
    }
}

impl StagePayload for MappedData {
    const STAGE: Stage = Stage::Map;

    fn check(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.threshold) || !(0.0..=self.threshold).contains(&self.floor) {
            return Err(format!(
                "threshold {} / floor {} out of range",
                self.threshold, self.floor
            ));
        }
        for term in &self.terms {
            if let mapping::MappingOutcome::Mapped { confidence, .. } = term.outcome {
                if !(0.0..=1.0).contains(&confidence) {
                    return Err(format!(
                        "confidence {} out of range for {}",
                        confidence, term.term.provenance
                    ));
                }
            }
        }
        let records: HashSet<&Provenance> = self
            .entities
            .iter()
            .map(|e| &e.provenance)
            .chain(self.relationships.iter().map(|r| &r.provenance))
            .collect();
        let provenances: Vec<&Provenance> =
            self.terms.iter().map(|t| &t.term.provenance).collect();
        check_records(self.entities.len(), &provenances, &records)
    }
}
