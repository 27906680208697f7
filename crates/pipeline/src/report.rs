use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::checkpoint::Stage;

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageCounts {
    pub succeeded: usize,
    pub degraded: usize,
    pub low_confidence: usize,
    pub unmapped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: u8,
    pub name: String,
    /// Output came from an existing checkpoint
    pub skipped: bool,
    pub counts: StageCounts,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl StageReport {
    pub fn skipped(stage: Stage) -> Self {
        Self {
            stage: stage.number(),
            name: stage.name().to_string(),
            skipped: true,
            counts: StageCounts::default(),
            elapsed_ms: 0,
            output: None,
        }
    }

    pub fn completed(stage: Stage, counts: StageCounts, timer: &TimedOperation, output: PathBuf) -> Self {
        Self {
            stage: stage.number(),
            name: stage.name().to_string(),
            skipped: false,
            counts,
            elapsed_ms: timer.elapsed_ms(),
            output: Some(output),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub stages: Vec<StageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triples: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities_written: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edges_written: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_path: Option<PathBuf>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            stages: Vec::new(),
            triples: None,
            entities_written: None,
            edges_written: None,
            graph_path: None,
            elapsed_ms: 0,
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage.number())
    }

    pub fn summary_table(&self) -> String {
        let mut out = format!("run {}\n", self.run_id);
        out.push_str(&format!(
            "{:<5} {:<10} {:>8} {:>9} {:>9} {:>9} {:>9} {:>6} {:>10}\n",
            "stage", "name", "status", "ok", "degraded", "low-conf", "unmapped", "failed", "ms"
        ));
        for s in &self.stages {
            out.push_str(&format!(
                "{:<5} {:<10} {:>8} {:>9} {:>9} {:>9} {:>9} {:>6} {:>10}\n",
                s.stage,
                s.name,
                if s.skipped { "skipped" } else { "done" },
                s.counts.succeeded,
                s.counts.degraded,
                s.counts.low_confidence,
                s.counts.unmapped,
                s.counts.failed,
                s.elapsed_ms
            ));
        }
        if let (Some(triples), Some(path)) = (self.triples, &self.graph_path) {
            out.push_str(&format!(
                "{} triples ({} entities, {} edges) -> {}\n",
                triples,
                self.entities_written.unwrap_or(0),
                self.edges_written.unwrap_or(0),
                path.display()
            ));
        }
        out
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).context(format!("Failed to create {:?}", dir))?;

        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(path)
            .context(format!("Failed to write run report: {:?}", path))?;
        Ok(())
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
