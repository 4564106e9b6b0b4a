//! # Response Cache
//!
//! TTL cache for API responses with true LRU eviction, validator
//! (ETag) bookkeeping for conditional requests, and a short dedup window
//! that rejects exact repeats of a recent request.
//!
//! The cache and the dedup window are independent: a request can be a
//! cache hit, or a cache miss that still has to pass the dedup check.

mod cache;
mod fingerprint;
mod lru;

pub use cache::{
    CacheEntryInfo, CacheHealth, CacheHealthStatus, CacheLookup, CacheStats, CleanupReport,
    ResponseCache, Revalidation,
};
pub use fingerprint::Fingerprint;
