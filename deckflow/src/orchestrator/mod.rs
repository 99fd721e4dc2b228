//! Drives jobs through their stages on a fixed worker pool.
//!
//! Each worker runs one job at a time; stages within a job are strictly
//! sequential because later stages consume earlier outputs. Every job
//! mutation is committed to the store before its event is published, so
//! events are notifications of durable changes, never the source of truth.


use crate::cancellation::CancellationToken;
use crate::core::ProgressEvent;
use crate::errors::DeckflowError;
use crate::hub::NotificationHub;
use crate::job::Job;
use crate::pipeline::{CapabilityRegistry, PipelineRegistry, StageSpec, TemplateKind};
use crate::store::JobStore;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Number of concurrent worker slots.
    pub workers: usize,
    /// Capacity of the FIFO submission queue.
    pub queue_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
        }
    }
}

/// Immediate response to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// The created job's id.
    pub job_id: Uuid,
    /// Sum of the pipeline's per-stage expected durations.
    pub estimated_completion_seconds: u64,
}

struct Inner {
    store: Arc<dyn JobStore>,
    hub: Arc<NotificationHub>,
    pipelines: Arc<PipelineRegistry>,
    capabilities: Arc<CapabilityRegistry>,
    tokens: DashMap<Uuid, Arc<CancellationToken>>,
}

/// The generation pipeline orchestrator.
pub struct Orchestrator {
    inner: Arc<Inner>,
    tx: mpsc::Sender<Uuid>,
    workers: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Starts the worker pool.
    #[must_use]
    pub fn start(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        hub: Arc<NotificationHub>,
        pipelines: Arc<PipelineRegistry>,
        capabilities: Arc<CapabilityRegistry>,
    ) -> Self {
        let inner = Arc::new(Inner {
            store,
            hub,
            pipelines,
            capabilities,
            tokens: DashMap::new(),
        });

        let (tx, rx) = mpsc::channel::<Uuid>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                let inner = Arc::clone(&inner);
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        // Hold the lock only while waiting for the next id,
                        // not while running the job.
                        let next = { rx.lock().await.recv().await };
                        let Some(job_id) = next else { break };
                        debug!(worker_id, %job_id, "worker claimed job");
                        if let Err(err) = run_job(&inner, job_id).await {
                            error!(worker_id, %job_id, error = %err, "job aborted on infrastructure error");
                        }
                    }
                })
            })
            .collect();

        Self { inner, tx, workers }
    }

    /// Creates a queued job and enqueues it, returning immediately.
    ///
    /// Rejected before any job exists when the template has no pipeline or
    /// a stage's capability has no registered executor.
    pub async fn submit(
        &self,
        owner_id: impl Into<String>,
        template_kind: TemplateKind,
        input: serde_json::Value,
    ) -> Result<SubmitReceipt, DeckflowError> {
        let definition = self.inner.pipelines.resolve(template_kind)?;
        for stage in definition.stages() {
            if self.inner.capabilities.resolve(&stage.capability).is_none() {
                return Err(DeckflowError::UnknownCapability {
                    capability: stage.capability.clone(),
                });
            }
        }

        let job = Job::new(owner_id, definition, input);
        let job_id = job.id;
        let estimated_completion_seconds = definition.estimated_total().as_secs();

        self.inner.store.create(job).await?;
        self.inner
            .tokens
            .insert(job_id, Arc::new(CancellationToken::new()));

        if self.tx.send(job_id).await.is_err() {
            return Err(DeckflowError::Unavailable(
                "submission queue closed".to_string(),
            ));
        }

        info!(%job_id, template = %template_kind, "job submitted");
        Ok(SubmitReceipt {
            job_id,
            estimated_completion_seconds,
        })
    }

    /// Requests cooperative cancellation of a job.
    ///
    /// Takes effect at the next stage boundary; a stage already in flight
    /// runs to completion or its own timeout first. Cancelling a terminal
    /// job is a no-op.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), DeckflowError> {
        let job = self.inner.store.get(job_id).await?;
        if job.status.is_terminal() {
            return Ok(());
        }
        if let Some(token) = self.inner.tokens.get(&job_id) {
            token.cancel("cancellation requested");
            info!(%job_id, "cancellation requested");
        }
        Ok(())
    }

    /// Closes the submission queue, waits for in-flight jobs to finish,
    /// and drains the notification hub.
    pub async fn shutdown(mut self) {
        drop(self.tx);
        futures::future::join_all(self.workers.drain(..)).await;
        self.inner.hub.drain();
        info!("orchestrator stopped");
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workers", &self.workers.len())
            .finish()
    }
}

/// Writes the job, retrying once with a fresh read on a version conflict.
///
/// A conflict here means double-processing, which the retry papers over
/// while the log line surfaces it.
async fn commit(inner: &Inner, job: &mut Job) -> Result<(), DeckflowError> {
    match inner.store.update(job).await {
        Err(DeckflowError::VersionConflict {
            attempted, actual, ..
        }) => {
            warn!(
                job_id = %job.id,
                attempted,
                actual,
                "version conflict on job write; retrying with fresh read"
            );
            let current = inner.store.get(job.id).await?;
            job.version = current.version + 1;
            inner.store.update(job).await
        }
        other => other,
    }
}

async fn run_job(inner: &Inner, job_id: Uuid) -> Result<(), DeckflowError> {
    let mut job = inner.store.get(job_id).await?;
    let token = inner
        .tokens
        .get(&job_id)
        .map(|entry| Arc::clone(&entry))
        .unwrap_or_default();
    let definition = inner.pipelines.resolve(job.template_kind)?.clone();

    // Cancelled while still queued: no stage ever starts.
    if token.is_cancelled() {
        return finish_cancelled(inner, &mut job).await;
    }

    job.mark_running();
    commit(inner, &mut job).await?;
    // No dedicated event kind for the claim; a snapshot keeps the stream
    // version-dense so clients can detect lost deliveries.
    inner.hub.publish(&job.snapshot().to_event());
    info!(%job_id, pipeline = %job.pipeline_id, "job running");

    for (index, stage) in definition.stages().iter().enumerate() {
        if token.is_cancelled() {
            return finish_cancelled(inner, &mut job).await;
        }

        let Some(executor) = inner.capabilities.resolve(&stage.capability) else {
            // Checked at submit time; only a capability set swapped at
            // runtime can make this fire.
            let message = format!("capability '{}' is no longer registered", stage.capability);
            return fail_job(inner, &mut job, index, stage, message).await;
        };

        job.stage_attempt_started(index);
        commit(inner, &mut job).await?;
        inner
            .hub
            .publish(&ProgressEvent::stage_started(job.id, job.version, &stage.name));

        loop {
            let attempt = tokio::time::timeout(
                stage.timeout,
                executor.execute(&job.artifact, &job.input),
            )
            .await;

            let last_error = match attempt {
                Ok(Ok(output)) => {
                    let attempts = job.stage_results[index].attempts;
                    let output_ref = output.section_ref();
                    job.stage_succeeded(index, output);
                    commit(inner, &mut job).await?;
                    inner.hub.publish(&ProgressEvent::stage_succeeded(
                        job.id,
                        job.version,
                        &stage.name,
                        attempts,
                        &output_ref,
                    ));
                    info!(%job_id, stage = %stage.name, attempts, "stage succeeded");
                    break;
                }
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!("timed out after {:?}", stage.timeout),
            };

            let attempts = job.stage_results[index].attempts;
            if attempts < stage.retry.attempts_allowed() {
                let delay = stage.retry.delay(attempts - 1);
                job.stage_retrying(index, last_error.clone());
                commit(inner, &mut job).await?;
                inner.hub.publish(&ProgressEvent::stage_retrying(
                    job.id,
                    job.version,
                    &stage.name,
                    attempts,
                    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    &last_error,
                ));
                warn!(%job_id, stage = %stage.name, attempts, error = %last_error, "stage attempt failed; retrying");

                tokio::time::sleep(delay).await;
                if token.is_cancelled() {
                    return finish_cancelled(inner, &mut job).await;
                }

                job.stage_attempt_started(index);
                commit(inner, &mut job).await?;
                // The re-attempt has no dedicated event kind; a snapshot
                // keeps the stream version-dense.
                inner.hub.publish(&job.snapshot().to_event());
            } else {
                return fail_job(inner, &mut job, index, stage, last_error).await;
            }
        }
    }

    let payload = json!({
        "exportRef": job.artifact.export_ref,
        "slides": job.artifact.slides.len(),
        "stages": job.stage_results.len(),
    });
    job.complete();
    commit(inner, &mut job).await?;
    inner
        .hub
        .publish(&ProgressEvent::job_completed(job.id, job.version, payload));
    inner.tokens.remove(&job_id);
    info!(%job_id, "job completed");
    Ok(())
}

/// Fails the stage and aborts the job; no later stage runs. The partial
/// artifact is retained for inspection but flagged not-deliverable.
async fn fail_job(
    inner: &Inner,
    job: &mut Job,
    index: usize,
    stage: &StageSpec,
    last_error: String,
) -> Result<(), DeckflowError> {
    let attempts = job.stage_results[index].attempts;
    let exhausted = DeckflowError::StageExhausted {
        stage: stage.name.clone(),
        attempts,
        last_error: last_error.clone(),
    };

    job.stage_failed(index, &last_error);
    commit(inner, job).await?;
    inner.hub.publish(&ProgressEvent::stage_failed(
        job.id,
        job.version,
        &stage.name,
        attempts,
        &last_error,
    ));

    job.fail();
    commit(inner, job).await?;
    inner.hub.publish(&ProgressEvent::job_failed(
        job.id,
        job.version,
        &stage.name,
        &exhausted.to_string(),
    ));

    error!(job_id = %job.id, error = %exhausted, "job failed");
    inner.tokens.remove(&job.id);
    Ok(())
}

/// Commits the cancelled state and tells live subscribers via a terminal
/// snapshot event (cancellation has no dedicated event kind).
async fn finish_cancelled(inner: &Inner, job: &mut Job) -> Result<(), DeckflowError> {
    job.cancel();
    commit(inner, job).await?;
    inner.hub.publish(&job.snapshot().to_event());
    inner.tokens.remove(&job.id);
    info!(job_id = %job.id, "job cancelled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobStatus;
    use crate::store::InMemoryJobStore;
    use crate::testing::succeeding_capabilities;
    use serde_json::json;

    fn harness(
        capabilities: CapabilityRegistry,
    ) -> (Orchestrator, Arc<InMemoryJobStore>, Arc<NotificationHub>) {
        let store = Arc::new(InMemoryJobStore::new());
        let hub = Arc::new(NotificationHub::new(Arc::clone(&store) as Arc<dyn JobStore>));
        let orchestrator = Orchestrator::start(
            OrchestratorConfig::default(),
            Arc::clone(&store) as Arc<dyn JobStore>,
            Arc::clone(&hub),
            Arc::new(PipelineRegistry::builtin()),
            Arc::new(capabilities),
        );
        (orchestrator, store, hub)
    }

    #[tokio::test]
    async fn test_submit_rejects_missing_capability() {
        let (orchestrator, store, _hub) = harness(CapabilityRegistry::new());

        let err = orchestrator
            .submit("owner-1", TemplateKind::Saas, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DeckflowError::UnknownCapability { .. }));
        // Rejected before any job was created.
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_submit_returns_estimate_immediately() {
        let (orchestrator, _store, _hub) = harness(succeeding_capabilities());

        let receipt = orchestrator
            .submit("owner-1", TemplateKind::Saas, json!({"name": "Acme"}))
            .await
            .unwrap();
        // 45 + 30 + 90 + 15 from the builtin SaaS stage estimates.
        assert_eq!(receipt.estimated_completion_seconds, 180);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let (orchestrator, _store, _hub) = harness(succeeding_capabilities());
        let err = orchestrator.cancel(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DeckflowError::JobNotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_terminal_job_is_noop() {
        let (orchestrator, store, _hub) = harness(succeeding_capabilities());
        let receipt = orchestrator
            .submit("owner-1", TemplateKind::Saas, json!({}))
            .await
            .unwrap();

        // Let the job run to completion.
        loop {
            let job = store.get(receipt.job_id).await.unwrap();
            if job.status.is_terminal() {
                assert_eq!(job.status, JobStatus::Completed);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        orchestrator.cancel(receipt.job_id).await.unwrap();
        assert_eq!(
            store.get(receipt.job_id).await.unwrap().status,
            JobStatus::Completed
        );
        orchestrator.shutdown().await;
    }

    fn bare_inner(store: Arc<dyn JobStore>) -> Inner {
        Inner {
            store: Arc::clone(&store),
            hub: Arc::new(NotificationHub::new(Arc::clone(&store))),
            pipelines: Arc::new(PipelineRegistry::builtin()),
            capabilities: Arc::new(succeeding_capabilities()),
            tokens: DashMap::new(),
        }
    }

    fn saas_job(owner: &str) -> Job {
        let registry = PipelineRegistry::builtin();
        let def = registry.resolve(TemplateKind::Saas).unwrap();
        Job::new(owner, def, json!({}))
    }

    #[tokio::test]
    async fn test_commit_retries_stale_write_with_fresh_read() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let inner = bare_inner(Arc::clone(&store));

        let job = saas_job("owner-1");
        let id = job.id;
        store.create(job).await.unwrap();

        // Two copies of the same version; the interloper commits first.
        let mut worker_copy = store.get(id).await.unwrap();
        let mut interloper = store.get(id).await.unwrap();
        interloper.mark_running();
        store.update(&interloper).await.unwrap();

        // The worker's write now conflicts; commit must re-read and land
        // exactly one version ahead of the store.
        worker_copy.mark_running();
        commit(&inner, &mut worker_copy).await.unwrap();

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.version, 3);
        assert_eq!(stored.status, JobStatus::Running);
    }

    /// A store whose writes always lose the version race.
    struct ContendedStore {
        jobs: InMemoryJobStore,
    }

    #[async_trait::async_trait]
    impl JobStore for ContendedStore {
        async fn create(&self, job: Job) -> Result<(), DeckflowError> {
            self.jobs.create(job).await
        }

        async fn get(&self, job_id: Uuid) -> Result<Job, DeckflowError> {
            self.jobs.get(job_id).await
        }

        async fn update(&self, job: &Job) -> Result<(), DeckflowError> {
            let current = self.jobs.get(job.id).await?;
            Err(DeckflowError::VersionConflict {
                id: job.id,
                attempted: job.version,
                actual: current.version,
            })
        }

        async fn list_by_owner(&self, owner_id: &str) -> Vec<crate::job::JobSummary> {
            self.jobs.list_by_owner(owner_id).await
        }
    }

    #[tokio::test]
    async fn test_commit_propagates_conflict_after_single_retry() {
        let store: Arc<dyn JobStore> = Arc::new(ContendedStore {
            jobs: InMemoryJobStore::new(),
        });
        let inner = bare_inner(Arc::clone(&store));

        let job = saas_job("owner-1");
        let id = job.id;
        store.create(job).await.unwrap();

        let mut copy = store.get(id).await.unwrap();
        copy.mark_running();
        let err = commit(&inner, &mut copy).await.unwrap_err();
        assert!(matches!(err, DeckflowError::VersionConflict { .. }));
    }
}
