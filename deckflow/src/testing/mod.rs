//! Testing utilities.
//!
//! Scripted stage executors and ready-made fixtures for exercising the
//! orchestrator without real content generation.

mod fixtures;
mod mocks;

pub use fixtures::{
    fast_retry, fast_saas_registry, sample_slides, startup_profile, succeeding_capabilities,
};
pub use mocks::ScriptedExecutor;
