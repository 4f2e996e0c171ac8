//! A pluggable caching layer with interchangeable, eviction-aware backends.
//!
//! # Features
//! - **One Contract**: Every backend implements [`CacheDelegate`], so callers can
//!   swap a disk-overflow cache for a volatile, soft-reference or no-op one
//!   through configuration alone.
//! - **Two-Tier LRU**: [`DiskOverflowCache`] bounds memory by entries or bytes and
//!   swaps evicted entries to a bounded temporary disk store.
//! - **Reclaimable Values**: [`SoftReferenceCache`] and [`CachedLazyList`] keep
//!   evicted values recoverable until a [`SoftHeap`] reclaims them.
//! - **Self-Population**: [`SelfPopulatingCache`] fills misses from an
//!   [`ElementProvider`], optionally with single-flight loading.
//! - **Named Registry**: [`CacheRegistry`] creates each named cache exactly once.
//! - **Observability**: Backends expose [`MetricsSnapshot`]s and report evictions
//!   to an [`EvictionListener`].
//!
//! Everything runs on the caller's thread; there are no background tasks.

// Public modules that form the API
pub mod backend;
pub mod builder;
pub mod config;
pub mod delegate;
pub mod error;
pub mod list;
pub mod listener;
pub mod metrics;
pub mod populating;
pub mod provider;
pub mod reclaim;
pub mod registry;

// Internal, crate-only modules
mod entry;
mod lru_list;
mod rng;
mod store;

// Re-export the primary user-facing types for convenience
pub use backend::{DiskOverflowCache, NoOpCache, SoftReferenceCache, VolatileCache};
pub use builder::{CacheBuilder, DEFAULT_SOFT_CAPACITY};
pub use config::{
  CacheConfig, CacheKind, DiskBound, EvictionPolicy, MemoryBound, PersistenceStrategy,
  RegistryConfig,
};
pub use delegate::{CacheDelegate, CacheType};
pub use error::{BuildError, CacheError, ProviderError, ProviderErrorKind, Result};
pub use list::{
  CachedLazyList, CachedReadWriteList, IndexedList, ListStats, MissStrategy,
  DEFAULT_SOFT_RETENTION_FACTOR,
};
pub use listener::{EvictionListener, EvictionReason};
pub use metrics::MetricsSnapshot;
pub use populating::{FetchMode, ProviderFailurePolicy, SelfPopulatingCache};
pub use provider::{BincodeProxy, ElementProvider, IdentityProxy, IndexedProvider, SerializationProxy};
pub use reclaim::{SoftHeap, SoftRef};
pub use registry::CacheRegistry;
