//! Content-addressed memo of stage outputs, shared across pipeline runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::cube::{Cube, NoiseMask, OrderMap, PlaneMap};
use crate::error::Result;
use crate::fit::AiryFitResult;
use crate::hash::{ContentHash, ContentHasher};
use crate::rings::RingGeometry;

/// Identity of one stage invocation: stage name, input hashes and parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StageKey(ContentHash);

impl StageKey {
    pub fn new(stage: &str, inputs: &[ContentHash], params: impl FnOnce(&mut ContentHasher)) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.tag("stage").tag(stage).usize(inputs.len());
        for input in inputs {
            hasher.hash(input);
        }
        params(&mut hasher);
        Self(hasher.finish())
    }

    pub fn hash(&self) -> ContentHash {
        self.0
    }
}

#[derive(Clone, Debug)]
pub enum CachedArtifact {
    Cube(Arc<Cube>),
    Map(Arc<PlaneMap>),
    Mask(Arc<NoiseMask>),
    Order(Arc<OrderMap>),
    Rings(Arc<RingGeometry>),
    Airy(Arc<AiryFitResult>),
}

/// Artifacts that can be stored in a [`ResultCache`].
pub trait Cacheable: Sized {
    fn into_artifact(value: Arc<Self>) -> CachedArtifact;
    fn from_artifact(artifact: &CachedArtifact) -> Option<Arc<Self>>;
}

macro_rules! cacheable {
    ($ty:ty, $variant:ident) => {
        impl Cacheable for $ty {
            fn into_artifact(value: Arc<Self>) -> CachedArtifact {
                CachedArtifact::$variant(value)
            }
            fn from_artifact(artifact: &CachedArtifact) -> Option<Arc<Self>> {
                match artifact {
                    CachedArtifact::$variant(v) => Some(Arc::clone(v)),
                    _ => None,
                }
            }
        }
    };
}

cacheable!(Cube, Cube);
cacheable!(PlaneMap, Map);
cacheable!(NoiseMask, Mask);
cacheable!(OrderMap, Order);
cacheable!(RingGeometry, Rings);
cacheable!(AiryFitResult, Airy);

/// Concurrent readers, one writer at a time.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<StageKey, CachedArtifact>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Cacheable>(&self, key: &StageKey) -> Option<Arc<T>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let found = entries.get(key).and_then(T::from_artifact);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub fn insert<T: Cacheable>(&self, key: StageKey, value: Arc<T>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, T::into_artifact(value));
    }

    /// Cached value for `key`, computing and storing it on a miss.
    ///
    /// The lock is not held while `compute` runs; concurrent misses on the
    /// same key compute twice and the last insert wins.
    pub fn get_or_try_insert<T, F>(&self, key: StageKey, compute: F) -> Result<Arc<T>>
    where
        T: Cacheable,
        F: FnOnce() -> Result<T>,
    {
        if let Some(hit) = self.get::<T>(&key) {
            debug!(key = %key.hash().short(), "Cache hit");
            return Ok(hit);
        }
        let value = Arc::new(compute()?);
        self.insert(key, Arc::clone(&value));
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (usize, usize) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }
}
