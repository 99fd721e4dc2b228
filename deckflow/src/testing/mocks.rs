//! Scripted stage executors.

use crate::core::{DeckArtifact, StageOutput};
use crate::errors::ExecutorError;
use crate::pipeline::StageExecutor;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

/// An executor that follows a fixed script: fail the first N calls, then
/// succeed with a configured output. Records how often it was invoked.
#[derive(Debug)]
pub struct ScriptedExecutor {
    output: StageOutput,
    error: String,
    failures: u32,
    delay: Option<Duration>,
    calls: Mutex<u32>,
}

impl ScriptedExecutor {
    /// An executor that always succeeds with `output`.
    #[must_use]
    pub fn succeeding(output: StageOutput) -> Self {
        Self {
            output,
            error: String::new(),
            failures: 0,
            delay: None,
            calls: Mutex::new(0),
        }
    }

    /// An executor that fails every call with `error`.
    #[must_use]
    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            output: StageOutput::MarketResearch(serde_json::Value::Null),
            error: error.into(),
            failures: u32::MAX,
            delay: None,
            calls: Mutex::new(0),
        }
    }

    /// An executor that fails its first `failures` calls, then succeeds
    /// with `output`.
    #[must_use]
    pub fn flaky(failures: u32, output: StageOutput) -> Self {
        Self {
            output,
            error: "transient failure".to_string(),
            failures,
            delay: None,
            calls: Mutex::new(0),
        }
    }

    /// Makes every call sleep first, for exercising stage timeouts.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times `execute` was invoked.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        *self.calls.lock()
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _artifact: &DeckArtifact,
        _input: &serde_json::Value,
    ) -> Result<StageOutput, ExecutorError> {
        let call = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if call <= self.failures {
            Err(ExecutorError::new(self.error.clone()))
        } else {
            Ok(self.output.clone())
        }
    }
}
