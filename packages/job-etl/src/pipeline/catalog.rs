//! Capability catalog preparation.
//!
//! Before listings are processed, every catalog entry without a valid
//! embedding is embedded once, persisted, and put in the shared cache.

use futures::stream::{self, StreamExt};
use tracing::{info, instrument, warn};

use crate::cache::CapabilityEmbeddingCache;
use crate::embedder::EmbeddingGenerator;
use crate::error::{PipelineError, Result};
use crate::traits::ai::EmbeddingModel;
use crate::traits::store::ReferenceData;
use crate::types::catalog::CapabilityDefinition;

/// Embed and persist every capability missing a valid embedding.
///
/// Entries whose stored hash no longer matches their text are treated as
/// missing. Returns the catalog with those entries filled in. The first
/// failure is returned after in-flight entries finish; entries that did
/// succeed stay persisted and cached.
#[instrument(skip_all, fields(catalog = catalog.len()))]
pub async fn fill_missing_capability_embeddings<R, E>(
    repository: &R,
    generator: &EmbeddingGenerator<E>,
    cache: &CapabilityEmbeddingCache,
    mut catalog: Vec<CapabilityDefinition>,
    concurrency: usize,
) -> Result<Vec<CapabilityDefinition>>
where
    R: ReferenceData + ?Sized,
    E: EmbeddingModel,
{
    let dimensions = generator.dimensions();
    cache.seed(&catalog, dimensions);

    let missing: Vec<usize> = catalog
        .iter()
        .enumerate()
        .filter(|(_, c)| c.needs_embedding(dimensions))
        .map(|(i, _)| i)
        .collect();
    if missing.is_empty() {
        return Ok(catalog);
    }
    info!(missing = missing.len(), "Embedding capabilities without a valid vector");

    let results: Vec<(usize, Result<(Vec<f32>, String)>)> = stream::iter(missing)
        .map(|index| {
            let capability = &catalog[index];
            async move {
                let outcome = embed_and_store(repository, generator, cache, capability).await;
                (index, outcome)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut first_error = None;
    for (index, outcome) in results {
        match outcome {
            Ok((vector, hash)) => {
                catalog[index].embedding = Some(vector);
                catalog[index].embedding_hash = Some(hash);
            }
            Err(e) => {
                warn!(capability_id = %catalog[index].id, error = %e, "Capability embedding failed");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(catalog),
    }
}

async fn embed_and_store<R, E>(
    repository: &R,
    generator: &EmbeddingGenerator<E>,
    cache: &CapabilityEmbeddingCache,
    capability: &CapabilityDefinition,
) -> Result<(Vec<f32>, String)>
where
    R: ReferenceData + ?Sized,
    E: EmbeddingModel,
{
    let hash = capability.content_hash();
    let text = capability.embedding_text();
    let vector = cache
        .get_or_compute(&capability.id, move || async move { generator.embed(&text).await })
        .await
        .map_err(PipelineError::from)?;

    repository
        .store_capability_embedding(&capability.id, &vector, &hash)
        .await?;

    Ok((vector.as_ref().clone(), hash))
}

/// Persist cached vectors for catalog entries still stored without one.
///
/// Used after a run whose catalog fill failed: the processor computes the
/// missing vectors on demand, and this writes them back so the next run
/// does not pay for them again. Returns how many entries were written.
#[instrument(skip_all)]
pub async fn store_cached_capability_embeddings<R>(
    repository: &R,
    cache: &CapabilityEmbeddingCache,
    dimensions: usize,
) -> Result<usize>
where
    R: ReferenceData + ?Sized,
{
    let catalog = repository.get_capability_catalog().await?;
    let mut stored = 0;
    for capability in catalog.iter().filter(|c| c.needs_embedding(dimensions)) {
        let Some(vector) = cache.get(&capability.id) else {
            continue;
        };
        if vector.len() != dimensions {
            continue;
        }
        repository
            .store_capability_embedding(&capability.id, &vector, &capability.content_hash())
            .await?;
        stored += 1;
    }
    if stored > 0 {
        info!(stored, "Stored capability embeddings computed during the run");
    }
    Ok(stored)
}
