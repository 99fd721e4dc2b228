//! Pipeline definitions: stages, retry policy, and the template registry.

mod definition;
mod retry;
mod stage;

pub use definition::{PipelineDefinition, PipelineRegistry, TemplateKind};
pub use retry::RetryPolicy;
pub use stage::{CapabilityRegistry, StageExecutor, StageSpec};
