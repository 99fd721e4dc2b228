//! Job and stage status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted and waiting for a worker slot.
    Queued,
    /// Claimed by a worker; stages are executing.
    Running,
    /// Every stage succeeded.
    Completed,
    /// A stage exhausted its retries.
    Failed,
    /// Cooperative cancellation took effect at a stage boundary.
    Cancelled,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl JobStatus {
    /// Returns true if the status is final. Terminal jobs are never resumed;
    /// retrying the pipeline means creating a new job.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The execution state of one stage record within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Not yet reached.
    Pending,
    /// Executor invocation in flight.
    Running,
    /// Output merged into the artifact.
    Succeeded,
    /// Retries exhausted (or cancelled while retrying).
    Failed,
    /// Failed an attempt; waiting out the backoff delay.
    Retrying,
}

impl Default for StageState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Retrying => write!(f, "retrying"),
        }
    }
}

impl StageState {
    /// Returns true if the state is terminal for the stage.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}
