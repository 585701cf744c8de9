//! CacheManager: admission, pinning, and LRU eviction under a byte budget.
//!
//! Locking discipline: one `RwLock` guards the entry map and byte accounting.
//! `lookup` only needs the shared lock (pin count and access time are atomics
//! inside the slot); `admit`, `release` and eviction take the exclusive lock,
//! so a lookup can never observe or pin an entry that is being evicted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use planwise_core::cache::{CacheEntry, MaterializationCache};
use planwise_core::config::OptimizerConfig;
use planwise_core::hash::PlanFingerprint;
use planwise_core::id::HandleId;

use crate::error::{Error, Result};
use crate::tracking::{CacheStats, Counters, PeakTracker};

struct Slot {
    handle: HandleId,
    size_bytes: u64,
    refs: AtomicU32,
    last_access: AtomicU64,
}

impl Slot {
    fn refs(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Acquire)
    }

    fn snapshot(&self, fingerprint: PlanFingerprint) -> CacheEntry {
        CacheEntry {
            fingerprint,
            materialized_handle: self.handle,
            size_bytes: self.size_bytes,
            reference_count: self.refs(),
            last_access_time: self.last_access(),
        }
    }
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<PlanFingerprint, Slot>,
    used_bytes: u64,
}

impl CacheState {
    fn pinned_bytes(&self) -> u64 {
        self.slots
            .values()
            .filter(|s| s.refs() > 0)
            .map(|s| s.size_bytes)
            .sum()
    }

    /// Unpinned entries in eviction order: least recently used first, larger
    /// first on equal access time, fingerprint order as the final tie-break.
    fn eviction_order(&self, exclude: &PlanFingerprint) -> Vec<PlanFingerprint> {
        let mut candidates: Vec<(u64, u64, PlanFingerprint)> = self
            .slots
            .iter()
            .filter(|(fp, s)| *fp != exclude && s.refs() == 0)
            .map(|(fp, s)| (s.last_access(), s.size_bytes, *fp))
            .collect();
        candidates.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.2.cmp(&b.2))
        });
        candidates.into_iter().map(|(_, _, fp)| fp).collect()
    }
}

pub struct CacheManager {
    capacity: u64,
    state: RwLock<CacheState>,
    clock: AtomicU64,
    counters: Counters,
    peak: PeakTracker,
}

impl CacheManager {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            capacity: capacity_bytes,
            state: RwLock::new(CacheState::default()),
            clock: AtomicU64::new(0),
            counters: Counters::default(),
            peak: PeakTracker::new(),
        }
    }

    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self::new(config.cache_budget_bytes)
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    pub fn used_bytes(&self) -> u64 {
        self.read().used_bytes
    }

    /// Bytes held by entries with outstanding references.
    pub fn pinned_bytes(&self) -> u64 {
        self.read().pinned_bytes()
    }

    pub fn len(&self) -> usize {
        self.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, fingerprint: &PlanFingerprint) -> bool {
        self.read().slots.contains_key(fingerprint)
    }

    /// Snapshot of an entry without pinning it or touching its access time.
    pub fn peek(&self, fingerprint: &PlanFingerprint) -> Option<CacheEntry> {
        self.read()
            .slots
            .get(fingerprint)
            .map(|s| s.snapshot(*fingerprint))
    }

    /// All resident entries, ordered by fingerprint.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let state = self.read();
        let mut out: Vec<CacheEntry> = state
            .slots
            .iter()
            .map(|(fp, s)| s.snapshot(*fp))
            .collect();
        out.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        out
    }

    /// Look up an entry, pinning it (reference count + 1) and refreshing its
    /// access time on a hit.
    pub fn lookup(&self, fingerprint: &PlanFingerprint) -> Option<CacheEntry> {
        let state = self.read();
        match state.slots.get(fingerprint) {
            Some(slot) => {
                slot.refs.fetch_add(1, Ordering::AcqRel);
                slot.last_access.store(self.tick(), Ordering::Release);
                Counters::bump(&self.counters.hits);
                tracing::trace!(fingerprint = %fingerprint.short(), "cache hit");
                Some(slot.snapshot(*fingerprint))
            }
            None => {
                Counters::bump(&self.counters.misses);
                None
            }
        }
    }

    /// Whether a subtree is worth materializing: reused at least
    /// `min_reuse_count_for_cache` times, not already resident, and small
    /// enough to fit once every unpinned entry is evicted. No state changes.
    pub fn should_cache(
        &self,
        fingerprint: &PlanFingerprint,
        reuse_count_estimate: u32,
        size_estimate: u64,
        config: &OptimizerConfig,
    ) -> bool {
        if reuse_count_estimate < config.min_reuse_count_for_cache {
            return false;
        }
        let budget = config.cache_budget_bytes.min(self.capacity);
        let state = self.read();
        if state.slots.contains_key(fingerprint) {
            return false;
        }
        let fits = state.pinned_bytes().saturating_add(size_estimate) <= budget;
        tracing::trace!(
            fingerprint = %fingerprint.short(),
            reuse_count_estimate,
            size_estimate,
            fits,
            "cache admission check"
        );
        fits
    }

    /// Store a materialized result. Evicts unpinned entries (LRU first) to
    /// make room and returns them so their data can be dropped. Fails with
    /// `BudgetExceeded`, evicting nothing, if the entry cannot fit even with
    /// every unpinned entry gone.
    ///
    /// Re-admitting a resident fingerprint replaces its handle and size but
    /// keeps its reference count.
    pub fn admit(
        &self,
        fingerprint: PlanFingerprint,
        handle: HandleId,
        size_bytes: u64,
    ) -> Result<Vec<CacheEntry>> {
        let mut state = self.write();

        let (prior_size, prior_refs, prior_pinned) = match state.slots.get(&fingerprint) {
            Some(s) => (s.size_bytes, s.refs(), if s.refs() > 0 { s.size_bytes } else { 0 }),
            None => (0, 0, 0),
        };
        let used_without = state.used_bytes - prior_size;
        let pinned_without = state.pinned_bytes() - prior_pinned;

        if pinned_without.saturating_add(size_bytes) > self.capacity {
            Counters::bump(&self.counters.rejections);
            return Err(Error::BudgetExceeded {
                requested: size_bytes,
                capacity: self.capacity,
                used: state.used_bytes,
                pinned: pinned_without,
            });
        }

        let mut evicted = Vec::new();
        let mut used = used_without;
        for victim in state.eviction_order(&fingerprint) {
            if used.saturating_add(size_bytes) <= self.capacity {
                break;
            }
            if let Some(slot) = state.slots.remove(&victim) {
                used -= slot.size_bytes;
                Counters::bump(&self.counters.evictions);
                tracing::trace!(
                    fingerprint = %victim.short(),
                    size_bytes = slot.size_bytes,
                    "cache eviction"
                );
                evicted.push(slot.snapshot(victim));
            }
        }

        let now = self.tick();
        state.slots.insert(
            fingerprint,
            Slot {
                handle,
                size_bytes,
                refs: AtomicU32::new(prior_refs),
                last_access: AtomicU64::new(now),
            },
        );
        state.used_bytes = used + size_bytes;
        self.peak.record_used(state.used_bytes);
        Counters::bump(&self.counters.admissions);
        tracing::debug!(
            fingerprint = %fingerprint.short(),
            size_bytes,
            evicted = evicted.len(),
            used_bytes = state.used_bytes,
            "cache admission"
        );
        Ok(evicted)
    }

    /// Drop one reference. At zero the entry becomes eviction-eligible.
    /// Returns the remaining reference count.
    pub fn release(&self, fingerprint: &PlanFingerprint) -> Result<u32> {
        let state = self.write();
        let slot = state
            .slots
            .get(fingerprint)
            .ok_or(Error::NotResident(*fingerprint))?;
        let refs = slot.refs();
        if refs == 0 {
            return Err(Error::NotReferenced(*fingerprint));
        }
        slot.refs.store(refs - 1, Ordering::Release);
        Ok(refs - 1)
    }

    /// Explicitly drop an unreferenced entry (manual unpersist).
    pub fn evict(&self, fingerprint: &PlanFingerprint) -> Result<CacheEntry> {
        let mut state = self.write();
        match state.slots.get(fingerprint) {
            None => return Err(Error::NotResident(*fingerprint)),
            Some(s) if s.refs() > 0 => return Err(Error::Pinned(*fingerprint)),
            Some(_) => {}
        }
        let slot = state
            .slots
            .remove(fingerprint)
            .ok_or(Error::NotResident(*fingerprint))?;
        state.used_bytes -= slot.size_bytes;
        Counters::bump(&self.counters.evictions);
        Ok(slot.snapshot(*fingerprint))
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.read();
        CacheStats {
            hits: Counters::get(&self.counters.hits),
            misses: Counters::get(&self.counters.misses),
            admissions: Counters::get(&self.counters.admissions),
            rejections: Counters::get(&self.counters.rejections),
            evictions: Counters::get(&self.counters.evictions),
            entries: state.slots.len(),
            used_bytes: state.used_bytes,
            peak_bytes: self.peak.peak(),
        }
    }
}

impl MaterializationCache for CacheManager {
    fn lookup(&self, fingerprint: &PlanFingerprint) -> Option<CacheEntry> {
        CacheManager::lookup(self, fingerprint)
    }

    fn should_cache(
        &self,
        fingerprint: &PlanFingerprint,
        reuse_count_estimate: u32,
        size_estimate: u64,
        config: &OptimizerConfig,
    ) -> bool {
        CacheManager::should_cache(self, fingerprint, reuse_count_estimate, size_estimate, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planwise_core::hash::FingerprintBuilder;
    use std::sync::Arc;
    use std::thread;

    fn fp(name: &str) -> PlanFingerprint {
        FingerprintBuilder::new("test").str(name).finish()
    }

    fn cfg(budget: u64) -> OptimizerConfig {
        OptimizerConfig {
            cache_budget_bytes: budget,
            min_reuse_count_for_cache: 2,
            ..Default::default()
        }
    }

    #[test]
    fn admit_then_lookup_returns_handle() {
        let cache = CacheManager::new(1000);
        cache.admit(fp("a"), HandleId::new(7), 100).unwrap();
        let entry = cache.lookup(&fp("a")).unwrap();
        assert_eq!(entry.materialized_handle, HandleId::new(7));
        assert_eq!(entry.reference_count, 1);
        assert_eq!(cache.used_bytes(), 100);
    }

    #[test]
    fn lookup_miss_has_no_side_effects() {
        let cache = CacheManager::new(1000);
        assert!(cache.lookup(&fp("missing")).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn second_admission_evicts_unreferenced_first() {
        let cache = CacheManager::new(1000);
        cache.admit(fp("first"), HandleId::new(1), 600).unwrap();
        let evicted = cache.admit(fp("second"), HandleId::new(2), 600).unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].fingerprint, fp("first"));
        assert!(!cache.contains(&fp("first")));
        assert_eq!(cache.used_bytes(), 600);
    }

    #[test]
    fn second_admission_fails_while_first_referenced() {
        let cache = CacheManager::new(1000);
        cache.admit(fp("first"), HandleId::new(1), 600).unwrap();
        cache.lookup(&fp("first")).unwrap();
        let err = cache.admit(fp("second"), HandleId::new(2), 600).unwrap_err();
        assert!(matches!(err, Error::BudgetExceeded { requested: 600, pinned: 600, .. }));
        assert!(cache.contains(&fp("first")));
        assert_eq!(cache.stats().rejections, 1);
    }

    #[test]
    fn eviction_picks_least_recently_used() {
        let cache = CacheManager::new(1000);
        cache.admit(fp("a"), HandleId::new(1), 300).unwrap();
        cache.admit(fp("b"), HandleId::new(2), 300).unwrap();
        cache.admit(fp("c"), HandleId::new(3), 300).unwrap();
        // Touch "a" so "b" becomes least recently used.
        cache.lookup(&fp("a")).unwrap();
        cache.release(&fp("a")).unwrap();

        let evicted = cache.admit(fp("d"), HandleId::new(4), 200).unwrap();
        let evicted: Vec<_> = evicted.iter().map(|e| e.fingerprint).collect();
        assert_eq!(evicted, vec![fp("b")]);
    }

    #[test]
    fn eviction_never_touches_pinned_entries() {
        let cache = CacheManager::new(1000);
        cache.admit(fp("old"), HandleId::new(1), 400).unwrap();
        cache.admit(fp("new"), HandleId::new(2), 400).unwrap();
        cache.lookup(&fp("old")).unwrap();

        let evicted = cache.admit(fp("x"), HandleId::new(3), 500).unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].fingerprint, fp("new"));
        assert!(cache.contains(&fp("old")));
    }

    #[test]
    fn release_counts_down_and_rejects_underflow() {
        let cache = CacheManager::new(100);
        cache.admit(fp("a"), HandleId::new(1), 10).unwrap();
        cache.lookup(&fp("a"));
        cache.lookup(&fp("a"));
        assert_eq!(cache.release(&fp("a")).unwrap(), 1);
        assert_eq!(cache.release(&fp("a")).unwrap(), 0);
        assert!(matches!(cache.release(&fp("a")), Err(Error::NotReferenced(_))));
        assert!(matches!(cache.release(&fp("zz")), Err(Error::NotResident(_))));
    }

    #[test]
    fn oversized_entry_is_rejected_without_evicting() {
        let cache = CacheManager::new(100);
        cache.admit(fp("a"), HandleId::new(1), 50).unwrap();
        assert!(cache.admit(fp("big"), HandleId::new(2), 101).is_err());
        assert!(cache.contains(&fp("a")));
    }

    #[test]
    fn should_cache_requires_reuse_and_room() {
        let cache = CacheManager::new(1000);
        let config = cfg(1000);
        assert!(!cache.should_cache(&fp("a"), 1, 10, &config));
        assert!(cache.should_cache(&fp("a"), 2, 1000, &config));
        assert!(!cache.should_cache(&fp("a"), 2, 1001, &config));

        cache.admit(fp("pinned"), HandleId::new(1), 700).unwrap();
        cache.lookup(&fp("pinned"));
        assert!(!cache.should_cache(&fp("a"), 3, 400, &config));
        assert!(cache.should_cache(&fp("a"), 3, 300, &config));
        // Already resident: nothing to materialize.
        assert!(!cache.should_cache(&fp("pinned"), 3, 1, &config));
    }

    #[test]
    fn readmission_keeps_references() {
        let cache = CacheManager::new(1000);
        cache.admit(fp("a"), HandleId::new(1), 100).unwrap();
        cache.lookup(&fp("a"));
        cache.admit(fp("a"), HandleId::new(9), 250).unwrap();
        let entry = cache.peek(&fp("a")).unwrap();
        assert_eq!(entry.materialized_handle, HandleId::new(9));
        assert_eq!(entry.reference_count, 1);
        assert_eq!(cache.used_bytes(), 250);
    }

    #[test]
    fn manual_evict_respects_pins() {
        let cache = CacheManager::new(1000);
        cache.admit(fp("a"), HandleId::new(1), 100).unwrap();
        cache.lookup(&fp("a"));
        assert!(matches!(cache.evict(&fp("a")), Err(Error::Pinned(_))));
        cache.release(&fp("a")).unwrap();
        assert_eq!(cache.evict(&fp("a")).unwrap().size_bytes, 100);
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn concurrent_lookups_pin_consistently() {
        let cache = Arc::new(CacheManager::new(1 << 20));
        cache.admit(fp("shared"), HandleId::new(1), 1024).unwrap();
        let mut handles = vec![];
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    assert!(cache.lookup(&fp("shared")).is_some());
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.peek(&fp("shared")).unwrap().reference_count, 800);
        assert_eq!(cache.stats().hits, 800);
    }
}
