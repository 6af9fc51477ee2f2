//! Store access contracts consumed by the prober
//!
//! The prober never talks to a concrete storage engine. It sees:
//! - `KvStore`: point reads and transactional read/write bodies
//! - `RangeTopology`: the current set of range descriptors
//!
//! `MemStore` implements both in-process for the demo binary and tests.

pub mod keys;
mod memory;

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

pub use memory::MemStore;

/// Opaque, stable identifier of a range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangeId(pub u64);

impl fmt::Display for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Descriptor of one range: a contiguous shard `[start_key, end_key)`
///
/// An empty `end_key` means the range extends to the end of the keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeDescriptor {
    pub range_id: RangeId,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
}

impl RangeDescriptor {
    pub fn new(range_id: RangeId, start_key: impl Into<Vec<u8>>, end_key: impl Into<Vec<u8>>) -> Self {
        Self {
            range_id,
            start_key: start_key.into(),
            end_key: end_key.into(),
        }
    }

    /// Whether `key` (a user-space key) falls inside this range
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start_key.as_slice() && (self.end_key.is_empty() || key < self.end_key.as_slice())
    }

    /// Range-local key used by probes targeting this range
    pub fn probe_key(&self) -> Vec<u8> {
        keys::range_probe_key(&self.start_key)
    }
}

/// Errors surfaced by the store and topology contracts
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Range {0} unavailable")]
    RangeUnavailable(RangeId),
    #[error("No range owns key {0:?}")]
    RangeNotFound(Vec<u8>),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Transaction aborted: {0}")]
    TxnAborted(String),
    #[error("Key {0:?} is in the reserved range-local keyspace")]
    ReservedKey(Vec<u8>),
    #[error("Operation cancelled")]
    Cancelled,
}

/// Handle to an open transaction, passed to a transaction body
#[async_trait]
pub trait KvTxn: Send {
    async fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    async fn del(&mut self, key: &[u8]) -> Result<(), StoreError>;
}

/// Transaction body; may be invoked more than once if the store retries
pub type TxnBody<'f> =
    dyn for<'t> Fn(&'t mut dyn KvTxn) -> BoxFuture<'t, Result<(), StoreError>> + Send + Sync + 'f;

/// Pin a closure to the higher-ranked [`TxnBody`] signature
///
/// ```ignore
/// let body = txn_body(move |txn| {
///     let key = key.clone();
///     async move { txn.put(&key, b"x").await }.boxed()
/// });
/// store.run_in_txn(&ctx, &body).await?;
/// ```
pub fn txn_body<F>(f: F) -> F
where
    F: for<'t> Fn(&'t mut dyn KvTxn) -> BoxFuture<'t, Result<(), StoreError>> + Send + Sync,
{
    f
}

/// Key-value access used by probe execution
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Point read; `Ok(None)` when the key does not exist
    async fn get(&self, ctx: &CancellationToken, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Run `body` inside a transaction and commit it atomically
    async fn run_in_txn(&self, ctx: &CancellationToken, body: &TxnBody<'_>) -> Result<(), StoreError>;
}

/// Source of range metadata used by the planner
#[async_trait]
pub trait RangeTopology: Send + Sync + 'static {
    /// Current range descriptors, in any order
    async fn scan_ranges(&self, ctx: &CancellationToken) -> Result<Vec<RangeDescriptor>, StoreError>;
}
