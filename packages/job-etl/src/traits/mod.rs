//! Core trait abstractions for the pipeline.
//!
//! These traits are the seams between the pipeline and the outside world:
//! the listings source, the model providers, and the staging/live store.

pub mod ai;
pub mod source;
pub mod store;
