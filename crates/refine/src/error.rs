/// A single failed model call. Always considered transient by the refiner.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model service unreachable: {0}")]
    Transport(String),

    #[error("model service returned status {0}")]
    Status(u16),

    #[error("model returned an unusable response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RefineError {
    /// Retries exhausted while the local fallback is disabled.
    #[error("model service unavailable for {record}: {reason}")]
    ModelUnavailable { record: String, reason: String },

    #[error("refinement cancelled after {completed} of {total} records")]
    Cancelled { completed: usize, total: usize },
}
