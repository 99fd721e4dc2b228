//! Jobs: one instantiated pipeline run per generation request.
//!
//! A job is owned exclusively by the orchestrator for writes. Every
//! mutation goes through a method here that bumps `version`, so a client
//! holding an older version can always detect a missed update.

use crate::core::{DeckArtifact, JobStatus, ProgressEvent, StageState};
use crate::pipeline::PipelineDefinition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Per-stage progress record within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// The stage this record tracks.
    pub stage_name: String,
    /// Current execution state.
    pub state: StageState,
    /// Execution attempts made so far.
    pub attempts: u32,
    /// When the first attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Error from the most recent failed attempt.
    pub error: Option<String>,
    /// Where the stage's output landed in the artifact.
    pub output_ref: Option<String>,
}

impl StageRecord {
    fn pending(stage_name: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            state: StageState::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            error: None,
            output_ref: None,
        }
    }
}

/// One run of a pipeline definition against one user request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id.
    pub id: Uuid,
    /// The already-authenticated owner.
    pub owner_id: String,
    /// Id of the pipeline definition this job runs.
    pub pipeline_id: String,
    /// Template kind, kept for definition re-resolution on claim.
    pub template_kind: crate::pipeline::TemplateKind,
    /// Submission input (the startup profile).
    pub input: Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Per-stage records, in pipeline order.
    pub stage_results: Vec<StageRecord>,
    /// The accumulating deck.
    pub artifact: DeckArtifact,
    /// Monotonically increasing; bumped on every mutation.
    pub version: u64,
}

impl Job {
    /// Creates a queued job for a pipeline definition.
    #[must_use]
    pub fn new(owner_id: impl Into<String>, definition: &PipelineDefinition, input: Value) -> Self {
        Self {
            id: crate::utils::generate_uuid(),
            owner_id: owner_id.into(),
            pipeline_id: definition.id.clone(),
            template_kind: definition.template_kind,
            input,
            created_at: crate::utils::now(),
            status: JobStatus::Queued,
            stage_results: definition
                .stages()
                .iter()
                .map(|s| StageRecord::pending(&s.name))
                .collect(),
            artifact: DeckArtifact::new(),
            version: 1,
        }
    }

    /// Derived progress: `100 * succeeded / total`. Never stored.
    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        progress_of(&self.stage_results)
    }

    /// Count of succeeded stages.
    #[must_use]
    pub fn succeeded_count(&self) -> usize {
        self.stage_results
            .iter()
            .filter(|r| r.state == StageState::Succeeded)
            .count()
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    /// Marks the job claimed by a worker.
    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.bump();
    }

    /// Begins an execution attempt for the stage at `index`.
    pub fn stage_attempt_started(&mut self, index: usize) {
        if let Some(record) = self.stage_results.get_mut(index) {
            record.state = StageState::Running;
            record.attempts += 1;
            if record.started_at.is_none() {
                record.started_at = Some(crate::utils::now());
            }
        }
        self.bump();
    }

    /// Records a failed attempt that will be retried after backoff.
    pub fn stage_retrying(&mut self, index: usize, error: impl Into<String>) {
        if let Some(record) = self.stage_results.get_mut(index) {
            record.state = StageState::Retrying;
            record.error = Some(error.into());
        }
        self.bump();
    }

    /// Merges the stage output into the artifact and marks the record
    /// succeeded, as one mutation: readers never see the merge without the
    /// record, or vice versa.
    pub fn stage_succeeded(&mut self, index: usize, output: crate::core::StageOutput) {
        let output_ref = output.section_ref();
        self.artifact.merge(output);
        if let Some(record) = self.stage_results.get_mut(index) {
            record.state = StageState::Succeeded;
            record.finished_at = Some(crate::utils::now());
            record.error = None;
            record.output_ref = Some(output_ref);
        }
        self.bump();
    }

    /// Marks the stage failed after its retry budget is spent.
    pub fn stage_failed(&mut self, index: usize, error: impl Into<String>) {
        if let Some(record) = self.stage_results.get_mut(index) {
            record.state = StageState::Failed;
            record.finished_at = Some(crate::utils::now());
            record.error = Some(error.into());
        }
        self.bump();
    }

    /// Completes the job. Valid only when every record succeeded.
    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.bump();
    }

    /// Fails the job and flags the partial artifact not-deliverable.
    pub fn fail(&mut self) {
        self.status = JobStatus::Failed;
        self.artifact.flag_not_deliverable();
        self.bump();
    }

    /// Cancels the job at a stage boundary. A record still waiting out a
    /// retry is marked failed with the cancellation as its error; records
    /// that finished naturally keep their outcome.
    pub fn cancel(&mut self) {
        for record in &mut self.stage_results {
            if matches!(record.state, StageState::Retrying | StageState::Running) {
                record.state = StageState::Failed;
                record.finished_at = Some(crate::utils::now());
                record.error = Some("cancelled".to_string());
            }
        }
        self.status = JobStatus::Cancelled;
        self.bump();
    }

    /// Builds the client-facing snapshot of this job.
    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            status: self.status,
            progress_percent: self.progress_percent(),
            stage_results: self.stage_results.clone(),
            artifact: self.artifact.clone(),
            version: self.version,
        }
    }

    /// Builds the owner-listing summary of this job.
    #[must_use]
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            status: self.status,
            progress_percent: self.progress_percent(),
            created_at: self.created_at,
        }
    }
}

/// Point-in-time view of a job, returned by polling and carried in
/// synthetic snapshot events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Job id.
    pub id: Uuid,
    /// Lifecycle status at snapshot time.
    pub status: JobStatus,
    /// Derived progress at snapshot time.
    pub progress_percent: f64,
    /// Stage records at snapshot time.
    pub stage_results: Vec<StageRecord>,
    /// Artifact at snapshot time.
    pub artifact: DeckArtifact,
    /// Job version at snapshot time.
    pub version: u64,
}

impl JobSnapshot {
    /// Wraps this snapshot in a synthetic progress event.
    #[must_use]
    pub fn to_event(&self) -> ProgressEvent {
        let payload = serde_json::to_value(self).unwrap_or(Value::Null);
        ProgressEvent::snapshot(self.id, self.version, payload)
    }

    /// Recomputes `progress_percent` from the stage records, for use after
    /// client-side patching.
    pub fn recompute_progress(&mut self) {
        self.progress_percent = progress_of(&self.stage_results);
    }
}

/// Summary row for owner listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Job id.
    pub id: Uuid,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Derived progress.
    pub progress_percent: f64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

fn progress_of(records: &[StageRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let succeeded = records
        .iter()
        .filter(|r| r.state == StageState::Succeeded)
        .count();
    #[allow(clippy::cast_precision_loss)]
    {
        100.0 * succeeded as f64 / records.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageOutput;
    use crate::pipeline::{PipelineRegistry, TemplateKind};
    use serde_json::json;

    fn saas_job() -> Job {
        let registry = PipelineRegistry::builtin();
        let def = registry.resolve(TemplateKind::Saas).unwrap();
        Job::new("owner-1", def, json!({"name": "Acme"}))
    }

    #[test]
    fn test_new_job_is_queued_with_pending_records() {
        let job = saas_job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.version, 1);
        assert_eq!(job.stage_results.len(), 4);
        assert!(job.stage_results.iter().all(|r| r.state == StageState::Pending));
        assert!((job.progress_percent() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_records_follow_pipeline_order() {
        let job = saas_job();
        let names: Vec<_> = job.stage_results.iter().map(|r| r.stage_name.as_str()).collect();
        assert_eq!(names, vec!["research", "financials", "content", "export"]);
    }

    #[test]
    fn test_every_mutation_bumps_version() {
        let mut job = saas_job();
        let mut last = job.version;

        job.mark_running();
        assert_eq!(job.version, last + 1);
        last = job.version;

        job.stage_attempt_started(0);
        assert_eq!(job.version, last + 1);
        last = job.version;

        job.stage_succeeded(0, StageOutput::MarketResearch(json!({"tam": 1})));
        assert_eq!(job.version, last + 1);
    }

    #[test]
    fn test_progress_derived_from_records() {
        let mut job = saas_job();
        job.mark_running();
        job.stage_attempt_started(0);
        job.stage_succeeded(0, StageOutput::MarketResearch(json!({})));
        assert!((job.progress_percent() - 25.0).abs() < f64::EPSILON);

        job.stage_attempt_started(1);
        job.stage_succeeded(1, StageOutput::FinancialModel(json!({})));
        assert!((job.progress_percent() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_retry_then_success_keeps_attempts() {
        let mut job = saas_job();
        job.mark_running();
        job.stage_attempt_started(0);
        job.stage_retrying(0, "transient");
        job.stage_attempt_started(0);
        job.stage_succeeded(0, StageOutput::MarketResearch(json!({})));

        let record = &job.stage_results[0];
        assert_eq!(record.attempts, 2);
        assert_eq!(record.state, StageState::Succeeded);
        assert!(record.error.is_none());
        assert_eq!(record.output_ref.as_deref(), Some("artifact.market_research"));
    }

    #[test]
    fn test_fail_flags_artifact() {
        let mut job = saas_job();
        job.mark_running();
        job.stage_attempt_started(0);
        job.stage_failed(0, "exhausted");
        job.fail();

        assert_eq!(job.status, JobStatus::Failed);
        assert!(!job.artifact.deliverable);
        assert_eq!(job.stage_results[0].error.as_deref(), Some("exhausted"));
    }

    #[test]
    fn test_cancel_marks_in_flight_record_failed() {
        let mut job = saas_job();
        job.mark_running();
        job.stage_attempt_started(0);
        job.stage_retrying(0, "transient");
        job.cancel();

        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.stage_results[0].state, StageState::Failed);
        assert_eq!(job.stage_results[0].error.as_deref(), Some("cancelled"));
        // Untouched stages stay pending.
        assert_eq!(job.stage_results[1].state, StageState::Pending);
    }

    #[test]
    fn test_cancel_keeps_natural_outcomes() {
        let mut job = saas_job();
        job.mark_running();
        job.stage_attempt_started(0);
        job.stage_succeeded(0, StageOutput::MarketResearch(json!({})));
        job.cancel();

        assert_eq!(job.stage_results[0].state, StageState::Succeeded);
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[test]
    fn test_snapshot_round_trips_through_event() {
        let mut job = saas_job();
        job.mark_running();
        let snapshot = job.snapshot();
        let event = snapshot.to_event();

        assert_eq!(event.version, job.version);
        let back: JobSnapshot = serde_json::from_value(event.payload).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_summary_fields() {
        let job = saas_job();
        let summary = job.summary();
        assert_eq!(summary.id, job.id);
        assert_eq!(summary.status, JobStatus::Queued);
    }
}
