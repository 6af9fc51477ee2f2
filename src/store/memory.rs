//! In-process range-sharded store
//!
//! Backs the demo binary and integration tests. Keys live in one ordered map;
//! ranges are a separate ordered map of split points. Faults can be injected
//! per range or store-wide.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::keys;
use super::{KvStore, KvTxn, RangeDescriptor, RangeId, RangeTopology, StoreError, TxnBody};

struct MemStoreInner {
    /// Ranges keyed by start key
    ranges: BTreeMap<Vec<u8>, RangeDescriptor>,
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    failing: HashSet<RangeId>,
    unavailable: Option<String>,
    latency: Duration,
    next_range_id: u64,
}

impl MemStoreInner {
    fn range_for(&self, key: &[u8]) -> Option<&RangeDescriptor> {
        let addr = keys::addr(key);
        self.ranges
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(addr)))
            .next_back()
            .map(|(_, desc)| desc)
            .filter(|desc| desc.contains(addr))
    }

    /// Resolve the range owning `key` and fail if it cannot serve requests
    fn check_key(&self, key: &[u8]) -> Result<RangeId, StoreError> {
        if let Some(reason) = &self.unavailable {
            return Err(StoreError::Unavailable(reason.clone()));
        }
        let desc = self
            .range_for(key)
            .ok_or_else(|| StoreError::RangeNotFound(key.to_vec()))?;
        if self.failing.contains(&desc.range_id) {
            return Err(StoreError::RangeUnavailable(desc.range_id));
        }
        Ok(desc.range_id)
    }
}

/// In-memory implementation of [`KvStore`] and [`RangeTopology`]
pub struct MemStore {
    inner: RwLock<MemStoreInner>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    /// Create a store with a single range spanning the whole keyspace
    pub fn new() -> Self {
        let mut ranges = BTreeMap::new();
        ranges.insert(Vec::new(), RangeDescriptor::new(RangeId(1), Vec::new(), Vec::new()));
        Self {
            inner: RwLock::new(MemStoreInner {
                ranges,
                data: BTreeMap::new(),
                failing: HashSet::new(),
                unavailable: None,
                latency: Duration::ZERO,
                next_range_id: 2,
            }),
        }
    }

    /// Create a store pre-split at each of `split_keys`
    pub fn with_splits<K: AsRef<[u8]>>(split_keys: &[K]) -> Self {
        let store = Self::new();
        for key in split_keys {
            store.split(key.as_ref());
        }
        store
    }

    /// Create a store with `count` ranges split at `r0001`, `r0002`, ...
    pub fn with_range_count(count: usize) -> Self {
        let splits: Vec<String> = (1..count.max(1)).map(|i| format!("r{:04}", i)).collect();
        Self::with_splits(&splits)
    }

    /// Split the range containing `at` so that a new range starts at `at`
    ///
    /// Returns the new range's id, or `None` if `at` already is a range boundary.
    pub fn split(&self, at: &[u8]) -> Option<RangeId> {
        let mut inner = self.inner.write();
        if inner.ranges.contains_key(at) {
            return None;
        }
        let left_start = inner.range_for(at)?.start_key.clone();
        let new_id = RangeId(inner.next_range_id);
        inner.next_range_id += 1;

        let left = inner.ranges.get_mut(&left_start)?;
        let right = RangeDescriptor::new(new_id, at.to_vec(), std::mem::replace(&mut left.end_key, at.to_vec()));
        inner.ranges.insert(at.to_vec(), right);
        debug!(range_id = %new_id, "Range split");
        Some(new_id)
    }

    /// Merge the range starting at `start_key` into its left neighbour
    pub fn merge_left(&self, start_key: &[u8]) -> bool {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let Some(right) = inner.ranges.remove(start_key) else {
            return false;
        };
        let left = inner
            .ranges
            .range_mut::<[u8], _>((Bound::Unbounded, Bound::Excluded(start_key)))
            .next_back()
            .map(|(_, desc)| desc);
        match left {
            Some(left) => {
                left.end_key = right.end_key;
                inner.failing.remove(&right.range_id);
                true
            }
            None => {
                inner.ranges.insert(start_key.to_vec(), right);
                false
            }
        }
    }

    /// Current range descriptors sorted by start key
    pub fn ranges(&self) -> Vec<RangeDescriptor> {
        self.inner.read().ranges.values().cloned().collect()
    }

    /// Make every request touching `range_id` fail
    pub fn fail_range(&self, range_id: RangeId) {
        self.inner.write().failing.insert(range_id);
    }

    pub fn heal_range(&self, range_id: RangeId) {
        self.inner.write().failing.remove(&range_id);
    }

    /// Make the whole store, including topology scans, unavailable
    pub fn set_unavailable(&self, reason: impl Into<String>) {
        self.inner.write().unavailable = Some(reason.into());
    }

    pub fn set_available(&self) {
        self.inner.write().unavailable = None;
    }

    /// Add artificial latency to every request
    pub fn set_latency(&self, latency: Duration) {
        self.inner.write().latency = latency;
    }

    /// Write a user key directly, bypassing transactions
    ///
    /// Keys in the range-local keyspace are reserved and rejected.
    pub fn insert(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<(), StoreError> {
        let key = key.into();
        if keys::is_range_local(&key) {
            return Err(StoreError::ReservedKey(key));
        }
        self.inner.write().data.insert(key, value.into());
        Ok(())
    }

    /// Read any key directly, bypassing fault injection
    pub fn raw_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.read().data.get(key).cloned()
    }

    pub fn key_count(&self) -> usize {
        self.inner.read().data.len()
    }

    async fn simulate_latency(&self, ctx: &CancellationToken) -> Result<(), StoreError> {
        let latency = self.inner.read().latency;
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if latency.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = ctx.cancelled() => Err(StoreError::Cancelled),
            _ = tokio::time::sleep(latency) => Ok(()),
        }
    }
}

/// Buffered transaction over a [`MemStore`]; writes apply on commit
struct MemTxn<'a> {
    store: &'a MemStore,
    writes: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

#[async_trait]
impl<'a> KvTxn for MemTxn<'a> {
    async fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.store.inner.read().check_key(key)?;
        self.writes.push((key.to_vec(), Some(value.to_vec())));
        Ok(())
    }

    async fn del(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.store.inner.read().check_key(key)?;
        self.writes.push((key.to_vec(), None));
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemStore {
    async fn get(&self, ctx: &CancellationToken, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.simulate_latency(ctx).await?;
        let inner = self.inner.read();
        inner.check_key(key)?;
        Ok(inner.data.get(key).cloned())
    }

    async fn run_in_txn(&self, ctx: &CancellationToken, body: &TxnBody<'_>) -> Result<(), StoreError> {
        self.simulate_latency(ctx).await?;
        if let Some(reason) = &self.inner.read().unavailable {
            return Err(StoreError::Unavailable(reason.clone()));
        }

        let mut txn = MemTxn {
            store: self,
            writes: Vec::new(),
        };
        let handle: &mut dyn KvTxn = &mut txn;
        body(handle).await?;

        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        // Commit: re-validate every touched range, then apply atomically
        let writes = txn.writes;
        let mut inner = self.inner.write();
        for (key, _) in &writes {
            inner
                .check_key(key)
                .map_err(|e| StoreError::TxnAborted(e.to_string()))?;
        }
        for (key, value) in writes {
            match value {
                Some(value) => {
                    inner.data.insert(key, value);
                }
                None => {
                    inner.data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RangeTopology for MemStore {
    async fn scan_ranges(&self, ctx: &CancellationToken) -> Result<Vec<RangeDescriptor>, StoreError> {
        self.simulate_latency(ctx).await?;
        let inner = self.inner.read();
        if let Some(reason) = &inner.unavailable {
            return Err(StoreError::Unavailable(reason.clone()));
        }
        Ok(inner.ranges.values().cloned().collect())
    }
}
