//! Durable registry of jobs with optimistic versioning.
//!
//! Reads hand out clones, never live references. The version check on
//! `update` exists to surface double-processing, not to arbitrate real
//! contention: at most one writer (the orchestrator) is expected per job.

use crate::errors::DeckflowError;
use crate::job::{Job, JobSummary};
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// Storage contract for jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Registers a newly created job.
    async fn create(&self, job: Job) -> Result<(), DeckflowError>;

    /// Returns a snapshot copy of the job.
    async fn get(&self, job_id: Uuid) -> Result<Job, DeckflowError>;

    /// Writes an updated job. The write carries the caller's bumped
    /// version; it is rejected with `VersionConflict` unless it advances
    /// the stored version by exactly one.
    async fn update(&self, job: &Job) -> Result<(), DeckflowError>;

    /// Lists summaries of the owner's jobs, newest first.
    async fn list_by_owner(&self, owner_id: &str) -> Vec<JobSummary>;
}

/// In-memory job store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<Uuid, Job>,
}

impl InMemoryJobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if no jobs are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<(), DeckflowError> {
        self.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Job, DeckflowError> {
        self.jobs
            .get(&job_id)
            .map(|entry| entry.clone())
            .ok_or(DeckflowError::JobNotFound { id: job_id })
    }

    async fn update(&self, job: &Job) -> Result<(), DeckflowError> {
        let mut entry = self
            .jobs
            .get_mut(&job.id)
            .ok_or(DeckflowError::JobNotFound { id: job.id })?;

        if job.version != entry.version + 1 {
            return Err(DeckflowError::VersionConflict {
                id: job.id,
                attempted: job.version,
                actual: entry.version,
            });
        }

        *entry = job.clone();
        Ok(())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Vec<JobSummary> {
        let mut summaries: Vec<JobSummary> = self
            .jobs
            .iter()
            .filter(|entry| entry.owner_id == owner_id)
            .map(|entry| entry.summary())
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobStatus;
    use crate::pipeline::{PipelineRegistry, TemplateKind};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn new_job(owner: &str) -> Job {
        let registry = PipelineRegistry::builtin();
        let def = registry.resolve(TemplateKind::Saas).unwrap();
        Job::new(owner, def, json!({}))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryJobStore::new();
        let job = new_job("owner-1");
        let id = job.id;

        store.create(job).await.unwrap();
        let fetched = store.get(id).await.unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_get_missing_job() {
        let store = InMemoryJobStore::new();
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DeckflowError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_returns_snapshot_not_live_reference() {
        let store = InMemoryJobStore::new();
        let job = new_job("owner-1");
        let id = job.id;
        store.create(job).await.unwrap();

        let mut copy = store.get(id).await.unwrap();
        copy.mark_running();

        // The store still holds the original state until update() commits.
        assert_eq!(store.get(id).await.unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_update_advances_version() {
        let store = InMemoryJobStore::new();
        let job = new_job("owner-1");
        let id = job.id;
        store.create(job).await.unwrap();

        let mut copy = store.get(id).await.unwrap();
        copy.mark_running();
        store.update(&copy).await.unwrap();

        let fetched = store.get(id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Running);
        assert_eq!(fetched.version, 2);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = InMemoryJobStore::new();
        let job = new_job("owner-1");
        let id = job.id;
        store.create(job).await.unwrap();

        let mut first = store.get(id).await.unwrap();
        let mut second = store.get(id).await.unwrap();

        first.mark_running();
        store.update(&first).await.unwrap();

        // A duplicate worker writing from the stale copy must be rejected.
        second.mark_running();
        let err = store.update(&second).await.unwrap_err();
        assert!(matches!(
            err,
            DeckflowError::VersionConflict { attempted: 2, actual: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_list_by_owner_filters_and_sorts() {
        let store = InMemoryJobStore::new();
        let a = new_job("alice");
        let b = new_job("alice");
        let c = new_job("bob");
        let b_id = b.id;

        store.create(a).await.unwrap();
        store.create(b).await.unwrap();
        store.create(c).await.unwrap();

        let listed = store.list_by_owner("alice").await;
        assert_eq!(listed.len(), 2);
        // Newest first.
        assert_eq!(listed[0].id, b_id);
        assert!(store.list_by_owner("carol").await.is_empty());
    }
}
