//! Errors surfaced by the plan service.

use thiserror::Error;

/// Failure of a store operation, classified for the retry wrapper.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Contention or connectivity; the whole transaction may be re-run.
    #[error("transient store failure: {0:#}")]
    Transient(anyhow::Error),

    #[error("store failure: {0:#}")]
    Fatal(anyhow::Error),
}

impl StoreError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(anyhow::anyhow!(msg.into()))
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(anyhow::anyhow!(msg.into()))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Failure of a plan service call.
///
/// Conflicts are not errors; see [`crate::plan::ConflictList`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{operation} gave up after {attempts} attempts: {last:#}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        last: anyhow::Error,
    },

    #[error("{operation} failed: {cause:#}")]
    Store {
        operation: &'static str,
        cause: anyhow::Error,
    },
}

impl ServiceError {
    /// Whether the caller may reasonably try again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}
