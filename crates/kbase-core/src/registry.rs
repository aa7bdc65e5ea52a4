//! Registry of supported embedding dimensions.
//!
//! The set of dimensions is data, not a hardcoded enumeration. Readers get
//! an immutable, versioned snapshot and bind to it for the lifetime of a
//! query; `register` publishes a new snapshot atomically (copy-on-write),
//! so the read path never observes a half-updated view and never blocks
//! beyond the pointer swap.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::SearchError;

/// Where a dimension bucket's vectors live: the name of the per-dimension
/// table (or column family) in the backing vector store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocator {
    table: String,
}

impl StorageLocator {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into() }
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

/// A resolved dimension: length plus the concrete storage locator. Handing
/// this to the vector source is the only way to issue a comparison, so a
/// query vector can never be compared against a mismatched partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionHandle {
    dimension: usize,
    locator: StorageLocator,
    snapshot_version: u64,
}

impl DimensionHandle {
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn locator(&self) -> &StorageLocator {
        &self.locator
    }

    /// Version of the registry snapshot this handle was resolved from.
    pub fn snapshot_version(&self) -> u64 {
        self.snapshot_version
    }
}

/// One immutable view of the registered dimensions.
#[derive(Debug, Default)]
pub struct DimensionSnapshot {
    version: u64,
    partitions: BTreeMap<usize, StorageLocator>,
}

impl DimensionSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn dimensions(&self) -> impl Iterator<Item = usize> + '_ {
        self.partitions.keys().copied()
    }

    pub fn resolve(&self, vector_len: usize) -> Result<DimensionHandle, SearchError> {
        let locator = self
            .partitions
            .get(&vector_len)
            .ok_or(SearchError::UnsupportedDimension(vector_len))?;
        Ok(DimensionHandle {
            dimension: vector_len,
            locator: locator.clone(),
            snapshot_version: self.version,
        })
    }
}

/// Hot-swappable registry. Reads clone an `Arc` to the current snapshot;
/// writes build a new snapshot and swap it in under a short write lock.
#[derive(Debug, Default)]
pub struct DimensionRegistry {
    inner: RwLock<Arc<DimensionSnapshot>>,
}

impl DimensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot. Queries should call this once and resolve against
    /// the returned snapshot for their whole lifetime.
    pub fn snapshot(&self) -> Arc<DimensionSnapshot> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Convenience resolve against the current snapshot.
    pub fn resolve(&self, vector_len: usize) -> Result<DimensionHandle, SearchError> {
        self.snapshot().resolve(vector_len)
    }

    /// Register a dimension and its storage partition. The only mutator;
    /// safe to call concurrently with resolution. Re-registering an
    /// existing dimension replaces its locator in the new snapshot.
    pub fn register(
        &self,
        dimension: usize,
        locator: StorageLocator,
    ) -> Result<(), SearchError> {
        if dimension == 0 {
            return Err(SearchError::Validation(
                "embedding dimension must be non-zero".to_string(),
            ));
        }
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut partitions = guard.partitions.clone();
        partitions.insert(dimension, locator);
        *guard = Arc::new(DimensionSnapshot {
            version: guard.version + 1,
            partitions,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;

    #[test]
    fn resolve_routes_to_registered_partition() {
        let registry = DimensionRegistry::new();
        registry
            .register(384, StorageLocator::new("embeddings_384"))
            .expect("register 384");
        registry
            .register(1536, StorageLocator::new("embeddings_1536"))
            .expect("register 1536");

        let handle = registry.resolve(384).expect("resolve 384");
        assert_eq!(handle.dimension(), 384);
        assert_eq!(handle.locator().table(), "embeddings_384");

        let handle = registry.resolve(1536).expect("resolve 1536");
        assert_eq!(handle.locator().table(), "embeddings_1536");
    }

    #[test]
    fn unregistered_length_is_rejected() {
        let registry = DimensionRegistry::new();
        registry
            .register(768, StorageLocator::new("embeddings_768"))
            .expect("register");

        match registry.resolve(767) {
            Err(SearchError::UnsupportedDimension(len)) => assert_eq!(len, 767),
            other => panic!("expected UnsupportedDimension, got {other:?}"),
        }
    }

    #[test]
    fn zero_dimension_is_invalid() {
        let registry = DimensionRegistry::new();
        assert!(matches!(
            registry.register(0, StorageLocator::new("embeddings_0")),
            Err(SearchError::Validation(_))
        ));
    }

    #[test]
    fn snapshots_are_isolated_from_later_registration() {
        let registry = DimensionRegistry::new();
        registry
            .register(384, StorageLocator::new("embeddings_384"))
            .expect("register");

        let before = registry.snapshot();
        registry
            .register(3072, StorageLocator::new("embeddings_3072"))
            .expect("register");
        let after = registry.snapshot();

        // The in-flight snapshot never learns about the new dimension.
        assert!(before.resolve(3072).is_err());
        assert!(after.resolve(3072).is_ok());
        assert_eq!(after.version(), before.version() + 1);
    }

    #[test]
    fn concurrent_registration_and_resolution() {
        let registry = Arc::new(DimensionRegistry::new());
        registry
            .register(128, StorageLocator::new("embeddings_128"))
            .expect("register");

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for dim in [256usize, 512, 1024, 2048] {
                    registry
                        .register(dim, StorageLocator::new(format!("embeddings_{dim}")))
                        .expect("register");
                }
            })
        };

        // Readers always observe a consistent snapshot that contains at
        // least the seed dimension.
        for _ in 0..1000 {
            let snapshot = registry.snapshot();
            assert!(snapshot.resolve(128).is_ok());
        }

        writer.join().expect("writer thread");
        assert!(registry.resolve(2048).is_ok());
    }
}
