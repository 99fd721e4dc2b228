//! Stage specifications and the executor capability registry.

use crate::core::{DeckArtifact, StageOutput};
use crate::errors::ExecutorError;
use crate::pipeline::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Trait for stage executors.
///
/// Implementations are host-supplied and opaque to the engine: content
/// generation, market research, financial modeling, design, and export are
/// all swappable behind this boundary. Executors may await external calls;
/// the worker suspends only inside this invocation.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Produces this stage's output from the accumulated artifact and the
    /// job's submission input.
    async fn execute(
        &self,
        artifact: &DeckArtifact,
        input: &serde_json::Value,
    ) -> Result<StageOutput, ExecutorError>;
}

/// Immutable definition of one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage name, unique within its pipeline.
    pub name: String,
    /// Position in the pipeline; strictly increasing across stages.
    pub order: u32,
    /// Hard bound on one execution attempt. Exceeding it is treated
    /// identically to an executor failure.
    pub timeout: Duration,
    /// Expected duration, used for the completion estimate returned at
    /// submission time.
    pub estimated_duration: Duration,
    /// Retry policy for transient executor failures.
    pub retry: RetryPolicy,
    /// Name of the executor capability that runs this stage.
    pub capability: String,
}

impl StageSpec {
    /// Creates a stage spec with default timeout, estimate, and retries.
    #[must_use]
    pub fn new(name: impl Into<String>, order: u32, capability: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order,
            timeout: Duration::from_secs(120),
            estimated_duration: Duration::from_secs(45),
            retry: RetryPolicy::default(),
            capability: capability.into(),
        }
    }

    /// Sets the attempt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the expected duration.
    #[must_use]
    pub const fn with_estimate(mut self, estimate: Duration) -> Self {
        self.estimated_duration = estimate;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Registry of named executor capabilities, supplied by the host.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    executors: HashMap<String, Arc<dyn StageExecutor>>,
}

impl CapabilityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under a capability name, replacing any
    /// previous registration.
    pub fn register(&mut self, capability: impl Into<String>, executor: Arc<dyn StageExecutor>) {
        self.executors.insert(capability.into(), executor);
    }

    /// Resolves an executor by capability name.
    #[must_use]
    pub fn resolve(&self, capability: &str) -> Option<Arc<dyn StageExecutor>> {
        self.executors.get(capability).cloned()
    }

    /// Returns the registered capability names.
    #[must_use]
    pub fn capabilities(&self) -> Vec<&str> {
        self.executors.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
