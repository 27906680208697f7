use ingest::IngestError;
use rdf::OutputValidationError;
use refine::RefineError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A checkpoint needed to resume is missing or does not match its schema.
    #[error("cannot resume from checkpoint {path:?}: {reason}")]
    Resume { path: PathBuf, reason: String },

    /// A stage produced output that breaks its checkpoint invariants.
    #[error("stage output for {path:?} is inconsistent: {reason}")]
    Checkpoint { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("run cancelled before stage {stage}")]
    Cancelled { stage: u8 },
}

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_INPUT: i32 = 2;
pub const EXIT_MODEL_UNAVAILABLE: i32 = 3;
pub const EXIT_OUTPUT_INVALID: i32 = 4;
pub const EXIT_RESUME: i32 = 5;
pub const EXIT_CONFIG: i32 = 6;
pub const EXIT_CANCELLED: i32 = 130;

/// Process exit code for a failed run. Looks through the whole context chain.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.downcast_ref::<IngestError>().is_some() {
            return EXIT_INPUT;
        }
        if let Some(e) = cause.downcast_ref::<RefineError>() {
            return match e {
                RefineError::ModelUnavailable { .. } => EXIT_MODEL_UNAVAILABLE,
                RefineError::Cancelled { .. } => EXIT_CANCELLED,
            };
        }
        if cause.downcast_ref::<OutputValidationError>().is_some() {
            return EXIT_OUTPUT_INVALID;
        }
        if let Some(e) = cause.downcast_ref::<PipelineError>() {
            return match e {
                PipelineError::Resume { .. } => EXIT_RESUME,
                PipelineError::Checkpoint { .. } => EXIT_FAILURE,
                PipelineError::Config(_) => EXIT_CONFIG,
                PipelineError::Cancelled { .. } => EXIT_CANCELLED,
            };
        }
    }
    EXIT_FAILURE
}
