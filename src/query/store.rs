//! In-memory query store.
//!
//! Holds one entry per cache key together with the policy it was stored
//! under. The store is an explicit object shared by handle
//! ([`SharedQueryStore`]); there is no process-wide instance.
//!
//! Entry lifecycle:
//! - created on the first successful load
//! - stale once `stale_time` has elapsed since the last load, or after
//!   invalidation
//! - evicted by [`QueryStore::sweep`] once idle for longer than `gc_time`
//!
//! Every invalidation bumps the entry's generation. A refresh records the
//! generation it started from; if the entry was invalidated meanwhile the
//! refreshed value is kept but stays stale.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::policy::key::{CacheKey, KeySegment};
use crate::policy::table::CachePolicy;
use crate::policy::tier::Tier;
use crate::query::error::QueryError;
use crate::query::runtime::{CachedValue, Loader};

/// A first load in flight, joinable by every request for the same key.
pub type SharedLoad = Shared<BoxFuture<'static, Result<CachedValue, QueryError>>>;

/// A single cached result.
pub struct StoredEntry {
    pub value: CachedValue,
    pub tier: Tier,
    pub policy: CachePolicy,
    /// Loader used to refresh the entry.
    pub loader: Loader,
    /// When the value was last loaded.
    pub updated_at: Instant,
    /// When the entry was last requested.
    pub last_accessed: Instant,
    /// Marked stale explicitly.
    pub invalidated: bool,
    /// A background refresh is in flight.
    pub refreshing: bool,
    /// Bumped on every invalidation.
    pub generation: u64,
    /// Successful loads so far.
    pub load_count: u64,
}

impl StoredEntry {
    pub fn new(value: CachedValue, tier: Tier, policy: CachePolicy, loader: Loader, now: Instant) -> Self {
        Self {
            value,
            tier,
            policy,
            loader,
            updated_at: now,
            last_accessed: now,
            invalidated: false,
            refreshing: false,
            generation: 0,
            load_count: 1,
        }
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        self.invalidated || now.duration_since(self.updated_at) >= self.policy.stale_time
    }

    /// Idle for longer than the GC window.
    pub fn is_expired(&self, now: Instant) -> bool {
        !self.refreshing && now.duration_since(self.last_accessed) > self.policy.gc_time
    }
}

/// A background refresh handed out by the store.
pub struct RefreshClaim {
    pub key: CacheKey,
    pub tier: Tier,
    pub policy: CachePolicy,
    pub loader: Loader,
    /// Generation the refresh started from.
    pub generation: u64,
}

/// Per-tier entry counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub entries: usize,
    pub stale: usize,
}

#[derive(Default)]
pub struct QueryStore {
    entries: HashMap<CacheKey, StoredEntry>,
    pending: HashMap<CacheKey, SharedLoad>,
}

impl QueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<&StoredEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &CacheKey) -> Option<&mut StoredEntry> {
        self.entries.get_mut(key)
    }

    pub fn insert(&mut self, key: CacheKey, entry: StoredEntry) {
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<StoredEntry> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store a freshly loaded value, keeping the entry's history if present.
    pub fn store_loaded(
        &mut self,
        key: CacheKey,
        value: CachedValue,
        tier: Tier,
        policy: CachePolicy,
        loader: Loader,
        now: Instant,
    ) {
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.value = value;
                entry.tier = tier;
                entry.policy = policy;
                entry.loader = loader;
                entry.updated_at = now;
                entry.last_accessed = now;
                entry.invalidated = false;
                entry.refreshing = false;
                entry.load_count += 1;
            }
            None => {
                self.entries
                    .insert(key, StoredEntry::new(value, tier, policy, loader, now));
            }
        }
    }

    /// Finish a background refresh started at `generation`. Entries evicted
    /// meanwhile stay evicted; entries invalidated meanwhile stay stale.
    pub fn complete_refresh(
        &mut self,
        key: &CacheKey,
        value: CachedValue,
        generation: u64,
        now: Instant,
    ) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.value = value;
                entry.updated_at = now;
                entry.refreshing = false;
                entry.load_count += 1;
                if entry.generation == generation {
                    entry.invalidated = false;
                } else {
                    debug!(key = %key, "Entry invalidated during refresh");
                }
                true
            }
            None => false,
        }
    }

    /// Give up on a background refresh, keeping the stale value.
    pub fn abort_refresh(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.refreshing = false;
        }
    }

    /// Mark every entry under `prefix` stale. Returns how many were marked.
    pub fn invalidate_prefix(&mut self, prefix: &[KeySegment]) -> usize {
        let mut marked = 0;
        for (key, entry) in self.entries.iter_mut() {
            if key.starts_with(prefix) {
                entry.invalidated = true;
                entry.generation += 1;
                marked += 1;
            }
        }
        marked
    }

    /// Claim stale entries that refetch on focus. Claimed entries are
    /// flagged as refreshing so they are not claimed twice.
    pub fn claim_focus_refetches(&mut self, now: Instant) -> Vec<RefreshClaim> {
        let mut claimed = Vec::new();
        for (key, entry) in self.entries.iter_mut() {
            if entry.policy.refetch_on_focus && !entry.refreshing && entry.is_stale(now) {
                entry.refreshing = true;
                claimed.push(RefreshClaim {
                    key: key.clone(),
                    tier: entry.tier,
                    policy: entry.policy,
                    loader: entry.loader.clone(),
                    generation: entry.generation,
                });
            }
        }
        claimed
    }

    /// The first load in flight for `key`, if any.
    pub fn pending_load(&self, key: &CacheKey) -> Option<SharedLoad> {
        self.pending.get(key).cloned()
    }

    pub fn begin_load(&mut self, key: CacheKey, load: SharedLoad) {
        self.pending.insert(key, load);
    }

    pub fn finish_load(&mut self, key: &CacheKey) {
        self.pending.remove(key);
    }

    /// Evict entries idle for longer than their GC window.
    pub fn sweep(&mut self, now: Instant) -> Vec<CacheKey> {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.remove(key);
            debug!(key = %key, "Evicted idle entry");
        }
        expired
    }

    pub fn tier_stats(&self, now: Instant) -> BTreeMap<Tier, TierStats> {
        let mut stats: BTreeMap<Tier, TierStats> = BTreeMap::new();
        for entry in self.entries.values() {
            let tier_stats = stats.entry(entry.tier).or_default();
            tier_stats.entries += 1;
            if entry.is_stale(now) {
                tier_stats.stale += 1;
            }
        }
        stats
    }
}

/// Thread-safe handle to a store.
pub type SharedQueryStore = Arc<RwLock<QueryStore>>;

/// Create a new thread-safe store.
pub fn new_shared_store() -> SharedQueryStore {
    Arc::new(RwLock::new(QueryStore::new()))
}
