//! # Deckflow
//!
//! A pitch-deck generation pipeline and progress-synchronization engine.
//!
//! Deckflow turns a founder's startup profile into an investor deck through
//! a staged pipeline, and keeps clients in sync with generation progress
//! over a best-effort push channel:
//!
//! - **Template pipelines**: SaaS, fintech, and healthcare templates, each
//!   an ordered sequence of stages (research, financials, content, design,
//!   export)
//! - **Orchestrated execution**: a fixed worker pool with per-stage
//!   timeouts, deterministic exponential-backoff retries, and cooperative
//!   cancellation at stage boundaries
//! - **Versioned jobs**: every mutation bumps a job version, committed to
//!   the store before its event is published
//! - **Progress push**: a notification hub fanning events out to
//!   subscribers, with a synthetic snapshot on subscribe
//! - **Client sync**: an explicit state machine with version-gated merges,
//!   staleness fallback to polling, and layered local edits
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deckflow::prelude::*;
//!
//! let store = Arc::new(InMemoryJobStore::new());
//! let hub = Arc::new(NotificationHub::new(store.clone()));
//! let orchestrator = Orchestrator::start(
//!     OrchestratorConfig::default(),
//!     store,
//!     hub.clone(),
//!     Arc::new(PipelineRegistry::builtin()),
//!     Arc::new(capabilities),
//! );
//!
//! let receipt = orchestrator.submit(owner_id, TemplateKind::Saas, input).await?;
//! let mut subscription = hub.subscribe(receipt.job_id).await?;
//! while let Some(event) = subscription.recv().await { /* ... */ }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod core;
pub mod errors;
pub mod hub;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod store;
pub mod sync;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::core::{
        DeckArtifact, EventKind, JobStatus, ProgressEvent, Slide, SlideType, StageOutput,
        StageState,
    };
    pub use crate::errors::{DeckflowError, ExecutorError, PipelineValidationError};
    pub use crate::hub::{NotificationHub, Subscription};
    pub use crate::job::{Job, JobSnapshot, JobSummary, StageRecord};
    pub use crate::orchestrator::{Orchestrator, OrchestratorConfig, SubmitReceipt};
    pub use crate::pipeline::{
        CapabilityRegistry, PipelineDefinition, PipelineRegistry, RetryPolicy, StageExecutor,
        StageSpec, TemplateKind,
    };
    pub use crate::store::{InMemoryJobStore, JobStore};
    pub use crate::sync::{ClientSync, SyncAction, SyncPhase};
    pub use crate::utils::{generate_uuid, iso_timestamp, now};
}
