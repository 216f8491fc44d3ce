//! DNS response cache with TTL-based expiration and a bounded entry count.
//!
//! Entries are immutable once stored: a `put` replaces the whole entry and a
//! `get` hands out a clone, so concurrent readers never observe (or corrupt)
//! each other's per-response fields such as the transaction id.
//!
//! Expired entries are never served but stay in place until they are
//! overwritten, picked as an eviction victim, or the cache is cleared.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use hickory_proto::op::Message;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tokio::time::Instant;

use crate::dns::{Fingerprint, min_answer_ttl};

/// What `put` does once the cache holds `max_entries` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum EvictionPolicy {
    /// Second-chance ring: evict the first expired or unreferenced entry
    /// under the clock hand, clearing reference bits as the hand passes.
    #[default]
    Clock,
    /// Drop every entry, then insert.
    Flush,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clock => "clock",
            Self::Flush => "flush",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "clock" => Ok(Self::Clock),
            "flush" => Ok(Self::Flush),
            other => Err(format!("unknown eviction policy '{other}'")),
        }
    }
}

impl TryFrom<String> for EvictionPolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// How long an upstream answer stays cacheable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    /// Used when the answer section is empty (NXDOMAIN, NODATA, ...).
    pub negative_ttl: Duration,
    /// Ceiling applied to record TTLs.
    pub max_ttl: Duration,
}

impl TtlPolicy {
    pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(3600);
    /// Largest TTL a record may carry (RFC 2181, section 8).
    pub const LIMIT: Duration = Duration::from_secs(i32::MAX as u64);

    /// Minimum answer TTL capped at `max_ttl`, or `negative_ttl` when there
    /// are no answer records.
    pub fn derive(&self, answer: &Message) -> Duration {
        match min_answer_ttl(answer) {
            Some(ttl) => Duration::from_secs(u64::from(ttl)).min(self.max_ttl),
            None => self.negative_ttl,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            negative_ttl: Self::DEFAULT_NEGATIVE_TTL,
            max_ttl: Self::DEFAULT_MAX_TTL,
        }
    }
}

struct CacheEntry {
    message: Message,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

struct Slot {
    fingerprint: Fingerprint,
    entry: CacheEntry,
    referenced: AtomicBool,
}

#[derive(Default)]
struct Inner {
    index: FxHashMap<Fingerprint, usize>,
    slots: Vec<Slot>,
    hand: usize,
}

impl Inner {
    fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.hand = 0;
    }

    fn push(&mut self, slot: Slot) {
        self.index.insert(slot.fingerprint.clone(), self.slots.len());
        self.slots.push(slot);
    }

    /// Advance the clock hand to a victim slot. Terminates within two
    /// revolutions since every pass clears the bits it skips.
    fn sweep(&mut self, now: Instant) -> usize {
        let len = self.slots.len();
        loop {
            let i = self.hand;
            self.hand = (self.hand + 1) % len;

            let slot = &mut self.slots[i];
            let referenced = slot.referenced.get_mut();
            if !slot.entry.is_fresh(now) || !*referenced {
                return i;
            }
            *referenced = false;
        }
    }

    fn replace(&mut self, victim: usize, slot: Slot) {
        let old = std::mem::replace(&mut self.slots[victim], slot);
        self.index.remove(&old.fingerprint);
        self.index
            .insert(self.slots[victim].fingerprint.clone(), victim);
    }
}

/// Bounded, TTL-aware map from [`Fingerprint`] to the latest upstream answer.
///
/// Reads take a shared lock; `put` takes the exclusive lock for the
/// eviction-and-insert step. Lock poisoning is recovered rather than
/// surfaced.
pub struct ResponseCache {
    inner: RwLock<Inner>,
    max_entries: usize,
    policy: EvictionPolicy,
}

impl ResponseCache {
    pub const DEFAULT_MAX_ENTRIES: usize = 50_000;

    /// Create a cache holding at most `max_entries` entries (at least one).
    pub fn new(max_entries: usize, policy: EvictionPolicy) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_entries: max_entries.max(1),
            policy,
        }
    }

    /// Look up a fresh entry. Returns a copy the caller may mutate freely.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Message> {
        let now = Instant::now();
        let inner = self.read();

        let slot = &inner.slots[*inner.index.get(fingerprint)?];
        if !slot.entry.is_fresh(now) {
            return None;
        }

        slot.referenced.store(true, Ordering::Relaxed);
        Some(slot.entry.message.clone())
    }

    /// Store a copy of `message`, valid for `ttl` from now. The last `put`
    /// for a fingerprint wins.
    pub fn put(&self, fingerprint: Fingerprint, message: &Message, ttl: Duration) {
        let now = Instant::now();
        let entry = CacheEntry {
            message: message.clone(),
            expires_at: now
                .checked_add(ttl)
                .unwrap_or_else(|| now + TtlPolicy::DEFAULT_MAX_TTL),
        };

        let mut inner = self.write();

        if let Some(&i) = inner.index.get(&fingerprint) {
            inner.slots[i].entry = entry;
            return;
        }

        let slot = Slot {
            fingerprint,
            entry,
            referenced: AtomicBool::new(false),
        };

        if inner.slots.len() < self.max_entries {
            inner.push(slot);
            return;
        }

        match self.policy {
            EvictionPolicy::Flush => {
                tracing::debug!(entries = inner.slots.len(), "cache full, flushing");
                inner.clear();
                inner.push(slot);
            }
            EvictionPolicy::Clock => {
                let victim = inner.sweep(now);
                tracing::trace!(victim = %inner.slots[victim].fingerprint, "evicting cache entry");
                inner.replace(victim, slot);
            }
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ENTRIES, EvictionPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{answer_with_ttls, build_query};
    use hickory_proto::rr::RecordType;
    use std::sync::Arc;

    fn fingerprint(name: &str) -> Fingerprint {
        Fingerprint::new(name, RecordType::A)
    }

    fn answer(name: &str, ttls: &[u32]) -> Message {
        let query = build_query(1, name, RecordType::A).unwrap();
        answer_with_ttls(&query, ttls)
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn get_misses_on_empty_cache() {
        let cache = ResponseCache::default();

        assert!(cache.get(&fingerprint("example.com")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn put_then_get_returns_answer() {
        let cache = ResponseCache::default();
        let msg = answer("example.com", &[300]);

        cache.put(fingerprint("example.com"), &msg, HOUR);

        assert_eq!(cache.get(&fingerprint("example.com")), Some(msg));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_is_case_and_trailing_dot_insensitive() {
        let cache = ResponseCache::default();
        cache.put(fingerprint("Example.COM."), &answer("example.com", &[300]), HOUR);

        assert!(cache.get(&fingerprint("example.com")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn entry_is_served_until_expiry_and_not_after() {
        let cache = ResponseCache::default();
        cache.put(fingerprint("example.com"), &answer("example.com", &[60]), Duration::from_secs(60));

        tokio::time::advance(Duration::from_millis(59_999)).await;
        assert!(cache.get(&fingerprint("example.com")).is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get(&fingerprint("example.com")).is_none());
        // Still physically present until overwritten or evicted.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_ttl_is_never_served() {
        let cache = ResponseCache::default();
        cache.put(fingerprint("example.com"), &answer("example.com", &[0]), Duration::ZERO);

        assert!(cache.get(&fingerprint("example.com")).is_none());
    }

    #[test]
    fn overflowing_ttl_is_stored_without_panicking() {
        let cache = ResponseCache::default();
        let policy = TtlPolicy {
            negative_ttl: Duration::from_secs(i64::MAX as u64),
            max_ttl: HOUR,
        };
        let msg = answer("example.com", &[]);

        cache.put(fingerprint("example.com"), &msg, policy.derive(&msg));
        cache.put(fingerprint("example.org"), &msg, Duration::MAX);

        assert!(cache.get(&fingerprint("example.com")).is_some());
        assert!(cache.get(&fingerprint("example.org")).is_some());
    }

    #[test]
    fn stored_copy_is_independent_of_caller() {
        let cache = ResponseCache::default();
        let mut msg = answer("example.com", &[300]);
        msg.set_id(1);

        cache.put(fingerprint("example.com"), &msg, HOUR);
        msg.set_id(2);

        assert_eq!(cache.get(&fingerprint("example.com")).unwrap().id(), 1);
    }

    #[test]
    fn returned_copy_is_independent_of_store() {
        let cache = ResponseCache::default();
        let mut msg = answer("example.com", &[300]);
        msg.set_id(1);
        cache.put(fingerprint("example.com"), &msg, HOUR);

        let mut served = cache.get(&fingerprint("example.com")).unwrap();
        served.set_id(99);

        assert_eq!(cache.get(&fingerprint("example.com")).unwrap().id(), 1);
    }

    #[test]
    fn last_put_wins_without_eviction() {
        let cache = ResponseCache::new(2, EvictionPolicy::Clock);
        cache.put(fingerprint("a.com"), &answer("a.com", &[300]), HOUR);
        cache.put(fingerprint("b.com"), &answer("b.com", &[300]), HOUR);

        let newer = answer("a.com", &[300, 600]);
        cache.put(fingerprint("a.com"), &newer, HOUR);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&fingerprint("a.com")), Some(newer));
        assert!(cache.get(&fingerprint("b.com")).is_some());
    }

    #[test]
    fn clock_never_exceeds_capacity() {
        let cache = ResponseCache::new(16, EvictionPolicy::Clock);

        for i in 0..100 {
            let name = format!("host{i}.example.com");
            cache.put(fingerprint(&name), &answer(&name, &[300]), HOUR);
            assert!(cache.len() <= 16);
        }

        assert_eq!(cache.len(), 16);
        assert!(cache.get(&fingerprint("host99.example.com")).is_some());
    }

    #[test]
    fn clock_gives_referenced_entries_a_second_chance() {
        let cache = ResponseCache::new(2, EvictionPolicy::Clock);
        cache.put(fingerprint("a.com"), &answer("a.com", &[300]), HOUR);
        cache.put(fingerprint("b.com"), &answer("b.com", &[300]), HOUR);

        assert!(cache.get(&fingerprint("a.com")).is_some());
        cache.put(fingerprint("c.com"), &answer("c.com", &[300]), HOUR);

        assert!(cache.get(&fingerprint("a.com")).is_some());
        assert!(cache.get(&fingerprint("b.com")).is_none());
        assert!(cache.get(&fingerprint("c.com")).is_some());
    }

    #[test]
    fn clock_evicts_when_every_entry_is_referenced() {
        let cache = ResponseCache::new(2, EvictionPolicy::Clock);
        cache.put(fingerprint("a.com"), &answer("a.com", &[300]), HOUR);
        cache.put(fingerprint("b.com"), &answer("b.com", &[300]), HOUR);
        cache.get(&fingerprint("a.com"));
        cache.get(&fingerprint("b.com"));

        cache.put(fingerprint("c.com"), &answer("c.com", &[300]), HOUR);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&fingerprint("c.com")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn clock_prefers_expired_victims() {
        let cache = ResponseCache::new(2, EvictionPolicy::Clock);
        cache.put(fingerprint("a.com"), &answer("a.com", &[300]), HOUR);
        cache.put(fingerprint("b.com"), &answer("b.com", &[10]), Duration::from_secs(10));
        cache.get(&fingerprint("a.com"));
        cache.get(&fingerprint("b.com"));

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.put(fingerprint("c.com"), &answer("c.com", &[300]), HOUR);

        assert!(cache.get(&fingerprint("a.com")).is_some());
        assert!(cache.get(&fingerprint("c.com")).is_some());
    }

    #[test]
    fn flush_resets_when_full() {
        let cache = ResponseCache::new(3, EvictionPolicy::Flush);
        for name in ["a.com", "b.com", "c.com"] {
            cache.put(fingerprint(name), &answer(name, &[300]), HOUR);
        }
        assert_eq!(cache.len(), 3);

        cache.put(fingerprint("d.com"), &answer("d.com", &[300]), HOUR);

        assert_eq!(cache.len(), 1);
        assert!(cache.get(&fingerprint("a.com")).is_none());
        assert!(cache.get(&fingerprint("d.com")).is_some());
    }

    #[test]
    fn clear_drops_everything() {
        let cache = ResponseCache::default();
        cache.put(fingerprint("a.com"), &answer("a.com", &[300]), HOUR);

        cache.clear();

        assert!(cache.is_empty());
        assert!(cache.get(&fingerprint("a.com")).is_none());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let cache = ResponseCache::new(0, EvictionPolicy::Clock);
        cache.put(fingerprint("a.com"), &answer("a.com", &[300]), HOUR);

        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.policy(), EvictionPolicy::Clock);
    }

    #[test]
    fn concurrent_readers_and_writers_stay_bounded() {
        let cache = Arc::new(ResponseCache::new(64, EvictionPolicy::Clock));

        std::thread::scope(|scope| {
            for t in 0..8 {
                let cache = Arc::clone(&cache);
                scope.spawn(move || {
                    for i in 0..500 {
                        let name = format!("h{}.t{t}.com", i % 100);
                        let fp = fingerprint(&name);
                        if i % 3 == 0 {
                            cache.put(fp, &answer(&name, &[300]), HOUR);
                        } else if let Some(msg) = cache.get(&fp) {
                            assert_eq!(Fingerprint::of_message(&msg), Some(fingerprint(&name)));
                        }
                    }
                });
            }
        });

        assert!(cache.len() <= 64);
    }

    #[test]
    fn ttl_is_minimum_answer_ttl() {
        let policy = TtlPolicy::default();

        assert_eq!(policy.derive(&answer("example.com", &[120, 60])), Duration::from_secs(60));
    }

    #[test]
    fn ttl_for_empty_answer_is_negative_ttl() {
        let policy = TtlPolicy {
            negative_ttl: Duration::from_secs(15),
            max_ttl: HOUR,
        };

        assert_eq!(policy.derive(&answer("example.com", &[])), Duration::from_secs(15));
    }

    #[test]
    fn ttl_is_capped() {
        let policy = TtlPolicy::default();

        assert_eq!(policy.derive(&answer("example.com", &[86_400])), HOUR);
    }

    #[test]
    fn eviction_policy_parses_case_insensitively() {
        assert_eq!("CLOCK".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Clock));
        assert_eq!("flush".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Flush));
        assert!("lru".parse::<EvictionPolicy>().is_err());
    }
}
