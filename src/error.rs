use thiserror::Error;

/// Engine error taxonomy.
///
/// `Validation`, `CircularReference` and `NotFound` are caller errors and
/// never retried. `TransientEvaluation` marks refresh failures worth
/// retrying; `PersistentEvaluation` marks a collection that exhausted its
/// retry budget and was parked in stale-error state.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("circular reference: {0}")]
    CircularReference(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient evaluation failure: {0}")]
    TransientEvaluation(String),

    #[error("collection {collection_id} failed after {retries} retries")]
    PersistentEvaluation { collection_id: String, retries: u32 },
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientEvaluation(_))
    }
}
