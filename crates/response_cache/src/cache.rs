//! Response cache and dedup window.

use std::collections::HashMap;
use std::time::Duration;

use contracts::{ApiResponse, CacheSettings, RequestDescriptor};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::lru::LruSlab;
use crate::Fingerprint;

const HEALTHY_HIT_RATE: f64 = 50.0;
const DEGRADED_HIT_RATE: f64 = 30.0;
const WELL_TUNED_HIT_RATE: f64 = 60.0;

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(ApiResponse),
    /// `expired` is set when a stale entry was found and evicted
    Miss { expired: bool },
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn into_response(self) -> Option<ApiResponse> {
        match self {
            CacheLookup::Hit(response) => Some(response),
            CacheLookup::Miss { .. } => None,
        }
    }
}

/// Outcome of feeding a conditional-request answer back to the cache
#[derive(Debug, Clone, PartialEq)]
pub enum Revalidation {
    /// The remote answered "not modified"; this is the stored response
    NotModified(ApiResponse),
    /// The remote sent a new representation, now cached
    Refreshed(ApiResponse),
    /// "Not modified" arrived but nothing is stored for the request
    NotCached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheHealthStatus {
    Healthy,
    Degraded,
    Poor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheHealth {
    pub status: CacheHealthStatus,
    pub hit_rate: f64,
    pub recommendation: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub deduplicated: u64,
    pub revalidated: u64,
    pub evictions: u64,
    pub expired: u64,
    pub total_cached: u64,
    pub size: usize,
    pub max_size: usize,
    /// Percentage of lookups that hit
    pub hit_rate: f64,
    pub validators: usize,
    pub dedup_window_len: usize,
}

/// Debug view of one entry
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub key: Fingerprint,
    pub age: Duration,
    pub expires_in: Duration,
    pub hit_count: u64,
    pub has_validator: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_entries: usize,
    pub stale_validators: usize,
    pub dedup_records: usize,
}

#[derive(Debug)]
struct CacheEntry {
    response: ApiResponse,
    created_at: Instant,
    expires_at: Instant,
    validator: Option<String>,
    hit_count: u64,
    last_access: Instant,
}

/// Expired response kept only for conditional revalidation
#[derive(Debug)]
struct StaleEntry {
    response: ApiResponse,
    validator: String,
    retired_at: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    revalidated: u64,
    evictions: u64,
    expired: u64,
    total_cached: u64,
}

#[derive(Debug)]
struct Store {
    entries: LruSlab<Fingerprint, CacheEntry>,
    stale: HashMap<Fingerprint, StaleEntry>,
    counters: Counters,
}

impl Store {
    /// Insert a fresh entry, evicting the LRU entry when a new key would exceed the bound
    fn put(
        &mut self,
        key: Fingerprint,
        response: ApiResponse,
        validator: Option<String>,
        ttl: Duration,
        max_size: usize,
        now: Instant,
    ) -> Option<Fingerprint> {
        let mut evicted = None;
        if !self.entries.contains(&key) && self.entries.len() >= max_size {
            if let Some((old_key, _)) = self.entries.pop_lru() {
                self.counters.evictions += 1;
                debug!(key = old_key.short(), "Evicted least recently used entry");
                evicted = Some(old_key);
            }
        }

        self.stale.remove(&key);
        self.entries.insert(
            key,
            CacheEntry {
                response,
                created_at: now,
                expires_at: now + ttl,
                validator,
                hit_count: 0,
                last_access: now,
            },
        );
        self.counters.total_cached += 1;
        evicted
    }

    /// Keep the validator of an expired entry for later revalidation
    fn retire(&mut self, key: Fingerprint, entry: CacheEntry, max_size: usize, now: Instant) {
        let Some(validator) = entry.validator else {
            return;
        };
        if self.stale.len() >= max_size && !self.stale.contains_key(&key) {
            let oldest = self
                .stale
                .iter()
                .min_by_key(|(_, stale)| stale.retired_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                self.stale.remove(&oldest);
            }
        }
        self.stale.insert(
            key,
            StaleEntry {
                response: entry.response,
                validator,
                retired_at: now,
            },
        );
    }
}

#[derive(Debug, Default)]
struct DedupWindow {
    seen: HashMap<Fingerprint, Instant>,
    deduplicated: u64,
}

/// Response cache with LRU eviction and a request dedup window
///
/// The entry store and the dedup window sit behind separate locks; no
/// method holds both at once.
#[derive(Debug)]
pub struct ResponseCache {
    settings: CacheSettings,
    store: Mutex<Store>,
    dedup: Mutex<DedupWindow>,
}

impl ResponseCache {
    pub fn new(settings: CacheSettings) -> Self {
        let capacity = settings.max_size.max(1);
        Self {
            store: Mutex::new(Store {
                entries: LruSlab::with_capacity(capacity),
                stale: HashMap::new(),
                counters: Counters::default(),
            }),
            dedup: Mutex::new(DedupWindow::default()),
            settings,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn fingerprint(&self, request: &RequestDescriptor) -> Fingerprint {
        Fingerprint::of(request)
    }

    /// Fresh cached response for `request`
    ///
    /// A hit requires `now <= expires_at`; an expired entry is evicted here.
    pub fn get(&self, request: &RequestDescriptor) -> CacheLookup {
        let key = Fingerprint::of(request);
        let now = Instant::now();
        let max_size = self.settings.max_size;
        let mut store = self.store.lock();

        let Some(expired) = store.entries.peek(&key).map(|entry| now > entry.expires_at) else {
            store.counters.misses += 1;
            trace!(key = key.short(), "Cache miss");
            return CacheLookup::Miss { expired: false };
        };

        if expired {
            if let Some(entry) = store.entries.remove(&key) {
                store.retire(key.clone(), entry, max_size, now);
            }
            store.counters.expired += 1;
            store.counters.misses += 1;
            debug!(key = key.short(), "Cache entry expired");
            return CacheLookup::Miss { expired: true };
        }

        store.counters.hits += 1;
        match store.entries.get_mut(&key) {
            Some(entry) => {
                entry.hit_count += 1;
                entry.last_access = now;
                trace!(key = key.short(), hits = entry.hit_count, "Cache hit");
                CacheLookup::Hit(entry.response.clone())
            }
            None => CacheLookup::Miss { expired: false },
        }
    }

    /// Store a response
    ///
    /// `ttl` defaults to the configured TTL and `validator` to the response
    /// ETag. Returns the key evicted to make room, if any.
    pub fn insert(
        &self,
        request: &RequestDescriptor,
        response: ApiResponse,
        ttl: Option<Duration>,
        validator: Option<String>,
    ) -> Option<Fingerprint> {
        let key = Fingerprint::of(request);
        let validator = validator.or_else(|| response.etag().map(str::to_owned));
        let ttl = ttl.unwrap_or_else(|| self.settings.ttl());
        let now = Instant::now();

        trace!(key = key.short(), ttl_ms = ttl.as_millis() as u64, "Caching response");
        self.store
            .lock()
            .put(key, response, validator, ttl, self.settings.max_size, now)
    }

    /// Reject an exact repeat of a request seen within the dedup window
    ///
    /// Check and record happen under one lock, so of two identical
    /// concurrent calls exactly one returns `false`.
    pub fn is_duplicate(&self, request: &RequestDescriptor) -> bool {
        let key = Fingerprint::of(request);
        let now = Instant::now();
        let window = self.settings.dedup_window();
        let mut dedup = self.dedup.lock();

        if let Some(&first_seen) = dedup.seen.get(&key) {
            if now.saturating_duration_since(first_seen) < window {
                dedup.deduplicated += 1;
                debug!(key = key.short(), "Duplicate request suppressed");
                return true;
            }
        }
        dedup.seen.insert(key, now);
        false
    }

    /// Drop the dedup record under `key`
    ///
    /// For a request that was recorded but never executed, so an identical
    /// retry is not suppressed.
    pub fn forget(&self, key: &Fingerprint) -> bool {
        let removed = self.dedup.lock().seen.remove(key).is_some();
        if removed {
            trace!(key = key.short(), "Dedup record dropped");
        }
        removed
    }

    /// Validator to send with a conditional request, if one is stored
    pub fn validator_for(&self, request: &RequestDescriptor) -> Option<String> {
        let key = Fingerprint::of(request);
        let store = self.store.lock();
        store
            .entries
            .peek(&key)
            .and_then(|entry| entry.validator.clone())
            .or_else(|| store.stale.get(&key).map(|stale| stale.validator.clone()))
    }

    /// Feed the answer to a conditional request back into the cache
    ///
    /// "Not modified" returns the stored response. A live entry keeps its
    /// expiry; a retired one is restored with a fresh TTL. Any other
    /// response replaces the entry, keeping the old validator when the new
    /// response carries none.
    pub fn revalidate(&self, request: &RequestDescriptor, response: ApiResponse) -> Revalidation {
        let key = Fingerprint::of(request);
        let now = Instant::now();
        let ttl = self.settings.ttl();
        let max_size = self.settings.max_size;
        let mut store = self.store.lock();

        if response.is_not_modified() {
            if let Some(entry) = store.entries.get_mut(&key) {
                entry.last_access = now;
                let cached = entry.response.clone();
                store.counters.revalidated += 1;
                debug!(key = key.short(), "Revalidated live entry");
                return Revalidation::NotModified(cached);
            }

            return match store.stale.remove(&key) {
                Some(stale) => {
                    store.counters.revalidated += 1;
                    let cached = stale.response.clone();
                    store.put(key.clone(), stale.response, Some(stale.validator), ttl, max_size, now);
                    debug!(key = key.short(), "Revalidated retired entry");
                    Revalidation::NotModified(cached)
                }
                None => Revalidation::NotCached,
            };
        }

        let previous = store
            .entries
            .peek(&key)
            .and_then(|entry| entry.validator.clone())
            .or_else(|| store.stale.get(&key).map(|stale| stale.validator.clone()));
        let validator = response.etag().map(str::to_owned).or(previous);
        store.put(key, response.clone(), validator, ttl, max_size, now);
        Revalidation::Refreshed(response)
    }

    /// Drop everything stored for a request, including its dedup record
    pub fn invalidate(&self, request: &RequestDescriptor) -> bool {
        let key = Fingerprint::of(request);
        let existed = {
            let mut store = self.store.lock();
            let existed = store.entries.remove(&key).is_some();
            store.stale.remove(&key);
            existed
        };
        self.dedup.lock().seen.remove(&key);
        existed
    }

    /// Drop every entry and dedup record; returns the number of entries removed
    pub fn clear(&self) -> usize {
        let removed = {
            let mut store = self.store.lock();
            let removed = store.entries.len();
            store.entries.clear();
            store.stale.clear();
            removed
        };
        self.dedup.lock().seen.clear();
        debug!(removed, "Cache cleared");
        removed
    }

    /// Evict expired entries, old retired validators and elapsed dedup records
    pub fn cleanup(&self) -> CleanupReport {
        let now = Instant::now();
        let ttl = self.settings.ttl();
        let window = self.settings.dedup_window();
        let max_size = self.settings.max_size;

        let (expired_entries, stale_validators) = {
            let mut store = self.store.lock();
            let expired = store.entries.drain_where(|_, entry| now > entry.expires_at);
            let expired_entries = expired.len();
            for (key, entry) in expired {
                store.retire(key, entry, max_size, now);
            }
            store.counters.expired += expired_entries as u64;

            let before = store.stale.len();
            store
                .stale
                .retain(|_, stale| now.saturating_duration_since(stale.retired_at) <= ttl);
            (expired_entries, before - store.stale.len())
        };

        let dedup_records = {
            let mut dedup = self.dedup.lock();
            let before = dedup.seen.len();
            dedup
                .seen
                .retain(|_, first_seen| now.saturating_duration_since(*first_seen) < window);
            before - dedup.seen.len()
        };

        let report = CleanupReport {
            expired_entries,
            stale_validators,
            dedup_records,
        };
        if report != CleanupReport::default() {
            debug!(?report, "Cache cleanup");
        }
        report
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = {
            let store = self.store.lock();
            let c = &store.counters;
            let lookups = c.hits + c.misses;
            CacheStats {
                hits: c.hits,
                misses: c.misses,
                revalidated: c.revalidated,
                evictions: c.evictions,
                expired: c.expired,
                total_cached: c.total_cached,
                size: store.entries.len(),
                max_size: self.settings.max_size,
                hit_rate: if lookups == 0 {
                    0.0
                } else {
                    c.hits as f64 / lookups as f64 * 100.0
                },
                validators: store
                    .entries
                    .iter()
                    .filter(|(_, e)| e.validator.is_some())
                    .count()
                    + store.stale.len(),
                ..CacheStats::default()
            }
        };

        let dedup = self.dedup.lock();
        stats.deduplicated = dedup.deduplicated;
        stats.dedup_window_len = dedup.seen.len();
        stats
    }

    /// Hit-rate classification; a cache with no lookups yet counts as healthy
    pub fn health(&self) -> CacheHealth {
        let stats = self.stats();
        if stats.hits + stats.misses == 0 {
            return CacheHealth {
                status: CacheHealthStatus::Healthy,
                hit_rate: 0.0,
                recommendation: "No lookups yet",
            };
        }

        let status = if stats.hit_rate >= HEALTHY_HIT_RATE {
            CacheHealthStatus::Healthy
        } else if stats.hit_rate >= DEGRADED_HIT_RATE {
            CacheHealthStatus::Degraded
        } else {
            CacheHealthStatus::Poor
        };
        let recommendation = if stats.hit_rate < WELL_TUNED_HIT_RATE {
            "Consider increasing TTL or cache size"
        } else {
            "Cache is working well"
        };

        CacheHealth {
            status,
            hit_rate: stats.hit_rate,
            recommendation,
        }
    }

    /// Up to `limit` entries, most recently used first
    pub fn entries(&self, limit: usize) -> Vec<CacheEntryInfo> {
        let now = Instant::now();
        let store = self.store.lock();
        store
            .entries
            .iter()
            .take(limit)
            .map(|(key, entry)| CacheEntryInfo {
                key: key.clone(),
                age: now.saturating_duration_since(entry.created_at),
                expires_in: entry.expires_at.saturating_duration_since(now),
                hit_count: entry.hit_count,
                has_validator: entry.validator.is_some(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn settings(max_size: usize) -> CacheSettings {
        CacheSettings {
            ttl_ms: 1000,
            max_size,
            dedup_window_ms: 500,
        }
    }

    fn req(path: &str) -> RequestDescriptor {
        RequestDescriptor::get(path)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_boundary() {
        let cache = ResponseCache::new(settings(10));
        cache.insert(&req("/a"), ApiResponse::ok("a"), None, None);

        advance(Duration::from_millis(1000)).await;
        assert_eq!(cache.get(&req("/a")), CacheLookup::Hit(ApiResponse::ok("a")));

        advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get(&req("/a")), CacheLookup::Miss { expired: true });
        assert_eq!(cache.get(&req("/a")), CacheLookup::Miss { expired: false });

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_not_insertion_order() {
        let cache = ResponseCache::new(settings(3));
        for path in ["/a", "/b", "/c"] {
            cache.insert(&req(path), ApiResponse::ok(path.to_string()), None, None);
        }
        // touch the oldest insert; /b becomes least recently used
        assert!(cache.get(&req("/a")).is_hit());

        let evicted = cache.insert(&req("/d"), ApiResponse::ok("d"), None, None);
        assert_eq!(evicted, Some(Fingerprint::of(&req("/b"))));
        assert!(cache.get(&req("/a")).is_hit());
        assert!(!cache.get(&req("/b")).is_hit());
        assert!(cache.get(&req("/c")).is_hit());
        assert!(cache.get(&req("/d")).is_hit());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_does_not_evict() {
        let cache = ResponseCache::new(settings(2));
        cache.insert(&req("/a"), ApiResponse::ok("1"), None, None);
        cache.insert(&req("/b"), ApiResponse::ok("1"), None, None);
        assert_eq!(cache.insert(&req("/a"), ApiResponse::ok("2"), None, None), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&req("/a")), CacheLookup::Hit(ApiResponse::ok("2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_window() {
        let cache = ResponseCache::new(settings(10));
        let r = RequestDescriptor::post("/issues").with_param("title", "x");

        assert!(!cache.is_duplicate(&r));
        advance(Duration::from_millis(499)).await;
        assert!(cache.is_duplicate(&r));

        advance(Duration::from_millis(1)).await;
        assert!(!cache.is_duplicate(&r));
        assert!(cache.is_duplicate(&r));
        assert_eq!(cache.stats().deduplicated, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_lets_identical_request_through() {
        let cache = ResponseCache::new(settings(10));
        let r = RequestDescriptor::post("/issues").with_param("title", "x");

        assert!(!cache.is_duplicate(&r));
        assert!(cache.forget(&cache.fingerprint(&r)));
        assert!(!cache.is_duplicate(&r));
        assert!(cache.is_duplicate(&r));
        assert!(!cache.forget(&cache.fingerprint(&req("/other"))));
        assert_eq!(cache.stats().deduplicated, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_modified_keeps_expiry() {
        let cache = ResponseCache::new(settings(10));
        let body = ApiResponse::ok("v1").with_header("ETag", "\"abc\"");
        cache.insert(&req("/r"), body.clone(), None, None);
        assert_eq!(cache.validator_for(&req("/r")).as_deref(), Some("\"abc\""));

        advance(Duration::from_millis(800)).await;
        assert_eq!(
            cache.revalidate(&req("/r"), ApiResponse::not_modified()),
            Revalidation::NotModified(body)
        );

        // expiry untouched: still ends at 1000ms after insert
        advance(Duration::from_millis(201)).await;
        assert!(!cache.get(&req("/r")).is_hit());
        assert_eq!(cache.stats().revalidated, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_revalidates_from_retired_validator() {
        let cache = ResponseCache::new(settings(10));
        let body = ApiResponse::ok("v1").with_header("etag", "W/\"1\"");
        cache.insert(&req("/r"), body.clone(), None, None);

        advance(Duration::from_millis(1500)).await;
        assert_eq!(cache.get(&req("/r")), CacheLookup::Miss { expired: true });
        assert_eq!(cache.validator_for(&req("/r")).as_deref(), Some("W/\"1\""));

        assert_eq!(
            cache.revalidate(&req("/r"), ApiResponse::not_modified()),
            Revalidation::NotModified(body.clone())
        );
        assert_eq!(cache.get(&req("/r")), CacheLookup::Hit(body));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_replaces_entry() {
        let cache = ResponseCache::new(settings(10));
        cache.insert(
            &req("/r"),
            ApiResponse::ok("v1").with_header("etag", "1"),
            None,
            None,
        );
        let fresh = ApiResponse::ok("v2");
        assert_eq!(
            cache.revalidate(&req("/r"), fresh.clone()),
            Revalidation::Refreshed(fresh.clone())
        );
        assert_eq!(cache.get(&req("/r")), CacheLookup::Hit(fresh));
        assert_eq!(cache.validator_for(&req("/r")).as_deref(), Some("1"));

        assert_eq!(
            cache.revalidate(&req("/missing"), ApiResponse::not_modified()),
            Revalidation::NotCached
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_and_clear() {
        let cache = ResponseCache::new(settings(10));
        cache.insert(&req("/a"), ApiResponse::ok("a"), Some(Duration::from_millis(100)), None);
        cache.insert(&req("/b"), ApiResponse::ok("b"), None, None);
        cache.is_duplicate(&req("/a"));

        advance(Duration::from_millis(600)).await;
        let report = cache.cleanup();
        assert_eq!(report.expired_entries, 1);
        assert_eq!(report.dedup_records, 1);
        assert_eq!(cache.len(), 1);

        assert!(cache.invalidate(&req("/b")));
        assert!(!cache.invalidate(&req("/b")));

        cache.insert(&req("/c"), ApiResponse::ok("c"), None, None);
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_and_entries() {
        let cache = ResponseCache::new(settings(10));
        assert_eq!(cache.health().status, CacheHealthStatus::Healthy);

        cache.insert(&req("/a"), ApiResponse::ok("a"), None, None);
        cache.get(&req("/a"));
        cache.get(&req("/x"));
        cache.get(&req("/y"));
        let health = cache.health();
        assert_eq!(health.status, CacheHealthStatus::Degraded);
        assert_eq!(health.recommendation, "Consider increasing TTL or cache size");

        advance(Duration::from_millis(250)).await;
        let entries = cache.entries(5);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].hit_count, 1);
        assert_eq!(entries[0].age, Duration::from_millis(250));
        assert_eq!(entries[0].expires_in, Duration::from_millis(750));
        assert!(!entries[0].has_validator);
    }
}
