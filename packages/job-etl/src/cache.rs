//! Single-flight cache of capability embeddings.
//!
//! Capability vectors are shared by every listing matched to the capability,
//! so they are computed at most once per run. Concurrent misses on the same
//! id wait on one in-flight computation instead of each calling the
//! embedding model.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;
use tracing::debug;

use crate::types::catalog::CapabilityDefinition;

type Slot = Arc<OnceCell<Arc<Vec<f32>>>>;

/// Capability id to embedding, filled lazily.
#[derive(Default)]
pub struct CapabilityEmbeddingCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl CapabilityEmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache holding every still-valid embedding in `catalog`.
    pub fn from_catalog(catalog: &[CapabilityDefinition], dimensions: usize) -> Self {
        let cache = Self::new();
        cache.seed(catalog, dimensions);
        cache
    }

    /// Insert the catalog's valid embeddings.
    ///
    /// Entries already present are kept. Stale, missing or wrong-sized
    /// embeddings are left for [`Self::get_or_compute`].
    pub fn seed(&self, catalog: &[CapabilityDefinition], dimensions: usize) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut seeded = 0;
        for capability in catalog {
            if let Some(vector) = capability.valid_embedding(dimensions) {
                slots.entry(capability.id.clone()).or_insert_with(|| {
                    seeded += 1;
                    Arc::new(OnceCell::new_with(Some(Arc::new(vector.to_vec()))))
                });
            }
        }
        debug!(seeded, total = catalog.len(), "Seeded capability embedding cache");
    }

    /// Cached vector for `capability_id`, if one has been computed.
    pub fn get(&self, capability_id: &str) -> Option<Arc<Vec<f32>>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(capability_id)
            .and_then(|slot| slot.get().cloned())
    }

    /// Return the cached vector or run `compute` to fill it.
    ///
    /// Only one caller per id runs `compute` at a time; the others await its
    /// result. A failed computation leaves the slot empty so a later caller
    /// can try again.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        capability_id: &str,
        compute: F,
    ) -> Result<Arc<Vec<f32>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<f32>, E>>,
    {
        let slot = self.slot(capability_id);
        let vector = slot
            .get_or_try_init(|| async { compute().await.map(Arc::new) })
            .await?;
        Ok(Arc::clone(vector))
    }

    /// Number of ids with a computed vector.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, capability_id: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(capability_id.to_string()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_misses_compute_once() {
        let cache = Arc::new(CapabilityEmbeddingCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("cap-1", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(vec![1.0, 2.0])
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(*handle.await.unwrap().unwrap(), vec![1.0, 2.0]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_compute_can_be_retried() {
        let cache = CapabilityEmbeddingCache::new();

        let first = cache
            .get_or_compute("cap-1", || async { Err::<Vec<f32>, _>("provider down") })
            .await;
        assert!(first.is_err());
        assert!(cache.get("cap-1").is_none());

        let second = cache
            .get_or_compute("cap-1", || async { Ok::<_, &str>(vec![0.5]) })
            .await
            .unwrap();
        assert_eq!(*second, vec![0.5]);
    }

    #[test]
    fn test_seed_skips_stale_embeddings() {
        let fresh = CapabilityDefinition::new("cap-1", "Communicates", "Writes clearly", "People");
        let hash = fresh.content_hash();
        let fresh = fresh.with_hashed_embedding(vec![1.0], hash);
        let stale = CapabilityDefinition::new("cap-2", "Leads", "Sets direction", "People")
            .with_hashed_embedding(vec![2.0], "old-hash");
        let legacy = CapabilityDefinition::new("cap-3", "Plans", "Plans work", "Delivery")
            .with_embedding(vec![3.0]);
        let missing = CapabilityDefinition::new("cap-4", "Builds", "Builds things", "Delivery");

        let cache = CapabilityEmbeddingCache::from_catalog(&[fresh, stale, legacy, missing], 1);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("cap-1").is_some());
        assert!(cache.get("cap-2").is_none());
        assert!(cache.get("cap-3").is_some());
    }

    #[test]
    fn test_seed_skips_wrong_sized_embeddings() {
        let legacy = CapabilityDefinition::new("cap-1", "Plans", "Plans work", "Delivery")
            .with_embedding(vec![0.5; 3]);
        let current = CapabilityDefinition::new("cap-2", "Builds", "Builds things", "Delivery")
            .with_embedding(vec![0.5; 8]);

        let cache = CapabilityEmbeddingCache::from_catalog(&[legacy, current], 8);

        assert!(cache.get("cap-1").is_none());
        assert_eq!(cache.get("cap-2").map(|v| v.len()), Some(8));
    }
}
