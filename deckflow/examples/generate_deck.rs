//! Generates a SaaS deck end to end with stubbed executors, printing every
//! progress event as it arrives.
//!
//! Run with: `cargo run --example generate_deck`

use deckflow::prelude::*;
use deckflow::testing::{startup_profile, succeeding_capabilities};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deckflow=debug".into()),
        )
        .init();

    let store = Arc::new(InMemoryJobStore::new());
    let hub = Arc::new(NotificationHub::new(
        Arc::clone(&store) as Arc<dyn JobStore>
    ));
    let orchestrator = Orchestrator::start(
        OrchestratorConfig::default(),
        Arc::clone(&store) as Arc<dyn JobStore>,
        Arc::clone(&hub),
        Arc::new(PipelineRegistry::builtin()),
        Arc::new(succeeding_capabilities()),
    );

    let receipt = orchestrator
        .submit("founder-42", TemplateKind::Saas, startup_profile())
        .await?;
    println!(
        "submitted job {} (estimated {}s)",
        receipt.job_id, receipt.estimated_completion_seconds
    );

    let mut subscription = hub.subscribe(receipt.job_id).await?;
    while let Some(event) = subscription.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        if matches!(event.kind, EventKind::JobCompleted | EventKind::JobFailed) {
            break;
        }
    }

    let job = store.get(receipt.job_id).await?;
    println!(
        "final status: {} ({:.0}% complete, export: {:?})",
        job.status,
        job.progress_percent(),
        job.artifact.export_ref
    );

    orchestrator.shutdown().await;
    Ok(())
}
