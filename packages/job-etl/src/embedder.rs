//! Embedding generator.
//!
//! Wraps an [`EmbeddingModel`] with batching, the retry policy and a
//! dimensionality check. It keeps no cache; capability vectors are cached
//! by [`crate::cache::CapabilityEmbeddingCache`] and persisted by the
//! repository.

use tracing::debug;

use crate::error::EmbeddingError;
use crate::retry::with_retry;
use crate::traits::ai::EmbeddingModel;
use crate::types::config::EmbeddingConfig;

const PREVIEW_CHARS: usize = 40;

/// Fixed-dimension text embedder.
pub struct EmbeddingGenerator<E: EmbeddingModel> {
    model: E,
    config: EmbeddingConfig,
}

impl<E: EmbeddingModel> EmbeddingGenerator<E> {
    pub fn new(model: E, config: EmbeddingConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub fn model(&self) -> &E {
        &self.model
    }

    /// Configured vector size.
    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_chunk(&texts, &preview(text)).await?;
        vectors.pop().ok_or(EmbeddingError::Count {
            sent: 1,
            received: 0,
        })
    }

    /// Embed many texts, `batch_size` per provider call, in input order.
    ///
    /// Batching only amortises call overhead; each vector equals what
    /// [`Self::embed`] returns for the same text.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            let context = format!("batch of {} texts starting '{}'", chunk.len(), preview(&chunk[0]));
            vectors.extend(self.embed_chunk(chunk, &context).await?);
        }
        debug!(count = vectors.len(), "Embedded batch");
        Ok(vectors)
    }

    async fn embed_chunk(
        &self,
        texts: &[String],
        context: &str,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = with_retry(&self.config.retry, context, || {
            self.model.embed_texts(&self.config.model, texts)
        })
        .await
        .map_err(|failure| EmbeddingError::Provider {
            context: context.to_string(),
            attempts: failure.attempts,
            source: failure.error,
        })?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::Count {
                sent: texts.len(),
                received: vectors.len(),
            });
        }

        for vector in &vectors {
            if vector.len() != self.config.dimensions {
                return Err(EmbeddingError::Dimension {
                    context: context.to_string(),
                    expected: self.config.dimensions,
                    actual: vector.len(),
                });
            }
        }

        Ok(vectors)
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::testing::MockEmbeddingModel;
    use crate::types::config::RetryPolicy;

    fn generator(model: MockEmbeddingModel, batch_size: usize) -> EmbeddingGenerator<MockEmbeddingModel> {
        EmbeddingGenerator::new(
            model,
            EmbeddingConfig::default()
                .with_dimensions(8)
                .with_batch_size(batch_size)
                .with_retry(RetryPolicy::immediate(3)),
        )
    }

    #[tokio::test]
    async fn test_batch_matches_single_calls() {
        let generator = generator(MockEmbeddingModel::new(8), 2);
        let texts: Vec<String> = ["alpha", "beta", "gamma"].iter().map(|s| s.to_string()).collect();

        let batch = generator.embed_batch(&texts).await.unwrap();

        assert_eq!(batch.len(), 3);
        for (text, vector) in texts.iter().zip(&batch) {
            assert_eq!(&generator.embed(text).await.unwrap(), vector);
        }
        // 3 texts at batch size 2 -> 2 calls, then 3 single calls
        assert_eq!(generator.model().call_count(), 5);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let generator = EmbeddingGenerator::new(
            MockEmbeddingModel::new(4),
            EmbeddingConfig::default().with_dimensions(8),
        );

        let err = generator.embed("text").await.unwrap_err();

        assert!(matches!(
            err,
            EmbeddingError::Dimension {
                expected: 8,
                actual: 4,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let model = MockEmbeddingModel::new(8).failing_text("cursed", ProviderError::Timeout);
        let generator = generator(model, 4);

        let err = generator.embed("cursed").await.unwrap_err();

        assert!(matches!(err, EmbeddingError::Provider { attempts: 3, .. }));
        assert_eq!(generator.model().call_count(), 3);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_calls() {
        let generator = generator(MockEmbeddingModel::new(8), 4);

        let vectors = generator.embed_batch(&[]).await.unwrap();

        assert!(vectors.is_empty());
        assert_eq!(generator.model().call_count(), 0);
    }
}
