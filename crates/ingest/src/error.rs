use std::path::PathBuf;

/// Failures that stop the pipeline before any stage output is written.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("schema error in {artifact}: {detail}")]
    Schema { artifact: String, detail: String },

    #[error("{artifact} yielded no usable rows ({total} rows read)")]
    EmptyInput { artifact: String, total: usize },

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to read parquet {path:?}: {source}")]
    Parquet {
        path: PathBuf,
        source: parquet::errors::ParquetError,
    },

    #[error("failed to decode columns of {path:?}: {source}")]
    Arrow {
        path: PathBuf,
        source: arrow::error::ArrowError,
    },
}

impl IngestError {
    pub fn missing_fields(artifact: &str, fields: &[&str]) -> Self {
        Self::Schema {
            artifact: artifact.to_string(),
            detail: format!("missing required fields: {}", fields.join(", ")),
        }
    }
}
