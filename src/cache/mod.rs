//! Generic caching layer for remote reads.
//!
//! This module provides:
//! - A keyed store with per-entry TTL and a sweep-enforced capacity bound
//! - Injectable persistence (in-memory, SQLite, or disabled)
//! - Typed cache keys built from a resource kind and canonical parameters
//! - Conservative invalidation of entries made stale by writes

pub mod invalidation;
pub mod keys;
pub mod storage;
pub mod store;
pub mod traits;

pub use invalidation::{InvalidationRouter, Mutation};
pub use keys::{CaseQueryKey, KeyPattern, QueryKey, ResourceKind};
pub use storage::{CacheStorage, MemoryStorage, NoopStorage, SqliteStorage};
pub use store::CacheStore;
pub use traits::{CacheResult, PageSource, Record};
