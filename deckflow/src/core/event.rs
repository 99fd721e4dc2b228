//! Progress events published on every committed job state transition.
//!
//! Events are a notification of a durable change, never the source of
//! truth: each one is published only after the corresponding job mutation
//! has been written to the job store. Delivery is best-effort, so clients
//! gate merges on `version` and fall back to polling.

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// The kind of state transition an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// A stage began its first execution attempt.
    StageStarted,
    /// A stage's output was merged into the artifact.
    StageSucceeded,
    /// A stage exhausted its retries.
    StageFailed,
    /// A stage attempt failed; another attempt follows after backoff.
    StageRetrying,
    /// All stages succeeded; the job is done.
    JobCompleted,
    /// The job aborted after a stage exhausted retries.
    JobFailed,
    /// Synthetic current-state event carrying a full job snapshot.
    ///
    /// Sent on subscribe so a late-joining client is not stuck waiting for
    /// the next real transition, and on cancellation commit so subscribers
    /// observe the terminal state.
    Snapshot,
}

/// A progress notification for one job state transition.
///
/// Wire shape: `{type, jobId, version, payload, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The transition kind.
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// The job this event belongs to.
    #[serde(rename = "jobId")]
    pub job_id: Uuid,

    /// The job version after the committed transition.
    pub version: u64,

    /// Kind-specific payload data.
    pub payload: serde_json::Value,

    /// When the event was created (ISO 8601).
    pub timestamp: String,
}

impl ProgressEvent {
    /// Creates a new progress event.
    #[must_use]
    pub fn new(kind: EventKind, job_id: Uuid, version: u64, payload: serde_json::Value) -> Self {
        Self {
            kind,
            job_id,
            version,
            payload,
            timestamp: crate::utils::iso_timestamp(),
        }
    }

    /// Creates a `stageStarted` event.
    #[must_use]
    pub fn stage_started(job_id: Uuid, version: u64, stage: &str) -> Self {
        Self::new(
            EventKind::StageStarted,
            job_id,
            version,
            json!({ "stage": stage }),
        )
    }

    /// Creates a `stageSucceeded` event.
    #[must_use]
    pub fn stage_succeeded(
        job_id: Uuid,
        version: u64,
        stage: &str,
        attempts: u32,
        output_ref: &str,
    ) -> Self {
        Self::new(
            EventKind::StageSucceeded,
            job_id,
            version,
            json!({ "stage": stage, "attempts": attempts, "outputRef": output_ref }),
        )
    }

    /// Creates a `stageRetrying` event.
    #[must_use]
    pub fn stage_retrying(
        job_id: Uuid,
        version: u64,
        stage: &str,
        attempt: u32,
        delay_ms: u64,
        error: &str,
    ) -> Self {
        Self::new(
            EventKind::StageRetrying,
            job_id,
            version,
            json!({ "stage": stage, "attempt": attempt, "delayMs": delay_ms, "error": error }),
        )
    }

    /// Creates a `stageFailed` event.
    #[must_use]
    pub fn stage_failed(job_id: Uuid, version: u64, stage: &str, attempts: u32, error: &str) -> Self {
        Self::new(
            EventKind::StageFailed,
            job_id,
            version,
            json!({ "stage": stage, "attempts": attempts, "error": error }),
        )
    }

    /// Creates a `jobCompleted` event with the final artifact reference.
    #[must_use]
    pub fn job_completed(job_id: Uuid, version: u64, payload: serde_json::Value) -> Self {
        Self::new(EventKind::JobCompleted, job_id, version, payload)
    }

    /// Creates a `jobFailed` event naming the failed stage.
    #[must_use]
    pub fn job_failed(job_id: Uuid, version: u64, stage: &str, error: &str) -> Self {
        Self::new(
            EventKind::JobFailed,
            job_id,
            version,
            json!({ "stage": stage, "error": error }),
        )
    }

    /// Creates a synthetic snapshot event from a serialized job snapshot.
    #[must_use]
    pub fn snapshot(job_id: Uuid, version: u64, snapshot: serde_json::Value) -> Self {
        Self::new(EventKind::Snapshot, job_id, version, snapshot)
    }

    /// Returns the stage name from the payload, if present.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        self.payload.get("stage").and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_camel_case() {
        let json = serde_json::to_string(&EventKind::StageRetrying).unwrap();
        assert_eq!(json, r#""stageRetrying""#);
    }

    #[test]
    fn test_wire_shape() {
        let event = ProgressEvent::stage_started(Uuid::new_v4(), 3, "research");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "stageStarted");
        assert!(value["jobId"].is_string());
        assert_eq!(value["version"], 3);
        assert_eq!(value["payload"]["stage"], "research");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_stage_accessor() {
        let event = ProgressEvent::stage_failed(Uuid::new_v4(), 7, "export", 3, "disk full");
        assert_eq!(event.stage(), Some("export"));

        let snapshot = ProgressEvent::snapshot(Uuid::new_v4(), 1, json!({}));
        assert_eq!(snapshot.stage(), None);
    }

    #[test]
    fn test_roundtrip() {
        let event = ProgressEvent::job_failed(Uuid::new_v4(), 9, "content", "llm unavailable");
        let json = serde_json::to_string(&event).unwrap();
        let back: ProgressEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(back.kind, EventKind::JobFailed);
        assert_eq!(back.version, 9);
        assert_eq!(back.stage(), Some("content"));
    }
}
