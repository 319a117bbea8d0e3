//! Prompt-keyed completion result cache.
//!
//! Size-bounded and time-expiring: capacity eviction removes the
//! oldest-INSERTED entry (reads do not refresh position), and expiry is
//! checked lazily on read; there is no background sweep. The enable
//! flag is consulted on every call so a live configuration change takes
//! effect immediately.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;
use xxhash_rust::xxh64::Xxh64;

use crate::backend::CompletionResult;
use crate::host::RelationId;

pub const CACHE_CAPACITY: usize = 10;
pub const CACHE_TTL: Duration = Duration::from_secs(60);

/// A cached backend result with its injected bookkeeping fields.
#[derive(Debug, Clone)]
pub struct CachedCompletion {
    pub result: CompletionResult,
    pub timestamp: Instant,
    pub relation_id: RelationId,
}

fn prompt_key(prompt: &str) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.update(prompt.as_bytes());
    hasher.digest()
}

/// Hash-keyed, insertion-order-evicting completion cache.
pub struct RequestCache {
    entries: HashMap<u64, CachedCompletion>,
    order: VecDeque<u64>,
    capacity: usize,
    ttl: Duration,
    enabled: AtomicBool,
}

impl RequestCache {
    pub fn new(enabled: bool) -> Self {
        Self::with_limits(enabled, CACHE_CAPACITY, CACHE_TTL)
    }

    pub fn with_limits(enabled: bool, capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            ttl,
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Flip the master switch; takes effect on the next call.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Look up a prior result for `prompt`, evicting it when expired.
    pub fn get(&mut self, prompt: &str) -> Option<CachedCompletion> {
        if !self.enabled.load(Ordering::SeqCst) {
            return None;
        }

        let key = prompt_key(prompt);
        let entry = self.entries.get(&key)?;

        if Instant::now().duration_since(entry.timestamp) > self.ttl {
            trace!("cache entry expired");
            self.entries.remove(&key);
            self.order.retain(|k| *k != key);
            return None;
        }

        Some(entry.clone())
    }

    /// Store `result` for `prompt`, stamped with the current time.
    pub fn set(&mut self, prompt: &str, result: CompletionResult, relation_id: RelationId) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }

        let key = prompt_key(prompt);
        let entry = CachedCompletion {
            result,
            timestamp: Instant::now(),
            relation_id,
        };

        if self.entries.insert(key, entry).is_none() {
            self.order.push_back(key);
        }

        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Candidate;

    fn result(text: &str) -> CompletionResult {
        CompletionResult {
            candidates: vec![Candidate {
                content: text.to_string(),
            }],
            session_id: Some("session".to_string()),
            cancelled: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_lazily_after_ttl() {
        let mut cache = RequestCache::new(true);
        cache.set("prompt", result("body"), "relation".to_string());

        tokio::time::advance(Duration::from_secs(59)).await;
        let hit = cache.get("prompt").expect("still fresh");
        assert_eq!(hit.relation_id, "relation");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("prompt").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_evicts_first_inserted_not_least_read() {
        let mut cache = RequestCache::new(true);
        for i in 0..CACHE_CAPACITY {
            cache.set(&format!("prompt-{i}"), result("r"), format!("rel-{i}"));
        }

        // Read the oldest entry; insertion order must still govern
        // eviction.
        assert!(cache.get("prompt-0").is_some());

        cache.set("prompt-overflow", result("r"), "rel-overflow".to_string());
        assert_eq!(cache.len(), CACHE_CAPACITY);
        assert!(cache.get("prompt-0").is_none());
        assert!(cache.get("prompt-1").is_some());
        assert!(cache.get("prompt-overflow").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_cache_ignores_all_calls() {
        let mut cache = RequestCache::new(false);
        cache.set("prompt", result("r"), "rel".to_string());
        assert!(cache.get("prompt").is_none());
        assert!(cache.is_empty());

        // Re-enabling takes effect immediately.
        cache.set_enabled(true);
        cache.set("prompt", result("r"), "rel".to_string());
        assert!(cache.get("prompt").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cached_result_keeps_injected_fields() {
        let mut cache = RequestCache::new(true);
        let before = Instant::now();
        cache.set("prompt", result("body"), "relation".to_string());
        let hit = cache.get("prompt").expect("hit");
        assert_eq!(hit.result.candidates[0].content, "body");
        assert!(hit.timestamp >= before);
    }
}
