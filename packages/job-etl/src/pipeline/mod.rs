//! Pipeline stages and the orchestrator that drives them.

pub mod catalog;
pub mod control;
pub mod orchestrator;
pub mod processor;

pub use catalog::fill_missing_capability_embeddings;
pub use control::{ProgressReporter, RunControl, TracingProgress};
pub use orchestrator::{checkpoint_after, Orchestrator};
pub use processor::{ItemOutcome, Processor};
