//! Core types shared across the engine: statuses, events, and the
//! accumulating deck artifact.

mod artifact;
mod event;
mod status;

pub use artifact::{DeckArtifact, Slide, SlideType, StageOutput};
pub use event::{EventKind, ProgressEvent};
pub use status::{JobStatus, StageState};
