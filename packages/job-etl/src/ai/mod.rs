//! Model provider implementations.
//!
//! Reference implementations of the `LanguageModel` and `EmbeddingModel`
//! traits. Tests use the mocks in [`crate::testing`] instead.

mod openai;

pub use openai::OpenAI;
