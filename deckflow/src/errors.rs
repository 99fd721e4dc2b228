//! Error types for the deckflow engine.
//!
//! Executor failures are a separate type (`ExecutorError`) because they are
//! caught at the stage-invocation boundary and converted into retry or
//! terminal job state; they never propagate out of a worker.

use thiserror::Error;
use uuid::Uuid;

/// The main error type for deckflow operations.
#[derive(Debug, Error)]
pub enum DeckflowError {
    /// A submission referenced a template with no pipeline definition.
    #[error("unknown template kind: {kind}")]
    UnknownTemplate {
        /// The requested template kind.
        kind: String,
    },

    /// A stage references a capability with no registered executor.
    #[error("no executor registered for capability '{capability}'")]
    UnknownCapability {
        /// The unresolved capability name.
        capability: String,
    },

    /// The requested job does not exist.
    #[error("job not found: {id}")]
    JobNotFound {
        /// The missing job id.
        id: Uuid,
    },

    /// An optimistic store write lost against a concurrent update.
    ///
    /// At most one writer (the orchestrator) is expected per job, so this
    /// surfaces double-processing rather than real contention.
    #[error("version conflict for job {id}: wrote version {attempted}, store holds {actual}")]
    VersionConflict {
        /// The job whose write was rejected.
        id: Uuid,
        /// The version the writer attempted to commit.
        attempted: u64,
        /// The version currently held by the store.
        actual: u64,
    },

    /// A pipeline definition failed validation at construction.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A stage failed and its retry budget is spent; the whole job fails.
    #[error("stage '{stage}' exhausted after {attempts} attempts: {last_error}")]
    StageExhausted {
        /// The failed stage name.
        stage: String,
        /// Total execution attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last_error: String,
    },

    /// The orchestrator cannot accept work (e.g. shut down).
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),
}

/// Error raised when a pipeline definition violates a construction invariant.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// A failure reported by a stage executor.
///
/// Transient by contract: the orchestrator retries per the stage's policy
/// until the budget is spent.
#[derive(Debug, Clone, Error)]
#[error("executor failed: {message}")]
pub struct ExecutorError {
    /// Human-readable failure description.
    pub message: String,
}

impl ExecutorError {
    /// Creates a new executor error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_template_display() {
        let err = DeckflowError::UnknownTemplate {
            kind: "biotech".to_string(),
        };
        assert_eq!(err.to_string(), "unknown template kind: biotech");
    }

    #[test]
    fn test_validation_error_converts() {
        let inner = PipelineValidationError::new("stage orders must be strictly increasing")
            .with_stages(vec!["research".to_string(), "export".to_string()]);
        let err: DeckflowError = inner.into();
        assert!(err.to_string().contains("strictly increasing"));
    }

    #[test]
    fn test_executor_error_display() {
        let err = ExecutorError::new("rate limited");
        assert_eq!(err.to_string(), "executor failed: rate limited");
    }

    #[test]
    fn test_stage_exhausted_display() {
        let err = DeckflowError::StageExhausted {
            stage: "financials".to_string(),
            attempts: 3,
            last_error: "upstream timeout".to_string(),
        };
        assert!(err.to_string().contains("financials"));
        assert!(err.to_string().contains("3 attempts"));
    }
}
