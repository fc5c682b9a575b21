//! TTL cache for context payloads.
//!
//! Keyed by a deterministic hash of `(intent, EntityBag)`. Entries are
//! evicted lazily on the next lookup after expiry; there is no background
//! sweep. Cache errors are never surfaced - a poisoned lock behaves like a
//! miss - and empty payloads are never stored.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::context::ContextPayload;
use crate::entities::EntityBag;
use crate::intent::Intent;

/// Fixed payload lifetime: staleness inside this window is an accepted
/// tradeoff for aggregate answers.
pub const CACHE_TTL_MINUTES: i64 = 30;

/// Time source, injectable so tests control expiry deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct CacheEntry {
    payload: ContextPayload,
    expires_at: DateTime<Utc>,
}

pub struct ContextCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ContextCache {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Arc::new(SystemClock), Duration::minutes(CACHE_TTL_MINUTES))
    }

    /// Deterministic key for one `(intent, entities)` pair. The EntityBag
    /// serializes its fields in declaration order, so equal bags always
    /// hash equal.
    pub fn key(intent: Intent, entities: &EntityBag) -> String {
        let mut hasher = Sha256::new();
        hasher.update(intent.tag().as_bytes());
        hasher.update(b"|");
        if let Ok(json) = serde_json::to_vec(entities) {
            hasher.update(&json);
        }
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<ContextPayload> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("context cache lock poisoned, treating lookup as miss");
                return None;
            }
        };
        let now = self.clock.now();
        match entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.payload.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a payload under `key`. Empty payloads are not cached, so a
    /// failed build is retried on the next request.
    pub fn put(&self, key: String, payload: ContextPayload) {
        if payload.is_empty() {
            return;
        }
        let expires_at = self.clock.now() + self.ttl;
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.insert(key, CacheEntry { payload, expires_at });
            }
            Err(_) => warn!("context cache lock poisoned, dropping write"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Clock whose time only moves when a test advances it.
    pub struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        pub fn starting_at(now: DateTime<Utc>) -> Self {
            Self { now: Mutex::new(now) }
        }

        pub fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ManualClock;
    use super::*;
    use crate::context::CONTEXT_SCHEMA_VERSION;

    fn payload(text: &str) -> ContextPayload {
        ContextPayload {
            schema_version: CONTEXT_SCHEMA_VERSION,
            text: text.to_string(),
            data: serde_json::Value::Null,
            sources: Vec::new(),
        }
    }

    fn cache_with_clock() -> (Arc<ManualClock>, ContextCache) {
        let clock = Arc::new(ManualClock::starting_at(Utc::now()));
        let cache = ContextCache::new(clock.clone(), Duration::minutes(CACHE_TTL_MINUTES));
        (clock, cache)
    }

    #[test]
    fn hit_within_ttl() {
        let (_clock, cache) = cache_with_clock();
        let key = ContextCache::key(Intent::Statistics, &EntityBag::default());
        cache.put(key.clone(), payload("totals"));
        assert_eq!(cache.get(&key).unwrap().text, "totals");
    }

    #[test]
    fn expired_entry_is_evicted_lazily() {
        let (clock, cache) = cache_with_clock();
        let key = ContextCache::key(Intent::Statistics, &EntityBag::default());
        cache.put(key.clone(), payload("totals"));
        clock.advance(Duration::minutes(CACHE_TTL_MINUTES + 1));
        assert!(cache.get(&key).is_none());
        // Eviction happened during the lookup.
        assert!(cache.is_empty());
    }

    #[test]
    fn entry_still_valid_just_before_expiry() {
        let (clock, cache) = cache_with_clock();
        let key = ContextCache::key(Intent::Statistics, &EntityBag::default());
        cache.put(key.clone(), payload("totals"));
        clock.advance(Duration::minutes(CACHE_TTL_MINUTES - 1));
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn empty_payloads_are_not_cached() {
        let (_clock, cache) = cache_with_clock();
        cache.put("k".to_string(), ContextPayload::empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn key_is_deterministic_and_entity_sensitive() {
        let bag = EntityBag::default();
        let with_sister = EntityBag { sister_id: Some(1), ..EntityBag::default() };
        assert_eq!(
            ContextCache::key(Intent::Statistics, &bag),
            ContextCache::key(Intent::Statistics, &bag)
        );
        assert_ne!(
            ContextCache::key(Intent::Statistics, &bag),
            ContextCache::key(Intent::SisterInfo, &bag)
        );
        assert_ne!(
            ContextCache::key(Intent::SisterInfo, &bag),
            ContextCache::key(Intent::SisterInfo, &with_sister)
        );
    }
}
