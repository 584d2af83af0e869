//! Signaling store abstraction.
//!
//! The store is the only rendezvous point between participants: document
//! collections with merge writes, atomic counters, transactions and
//! push-based change subscriptions. Any backend meeting this contract can
//! stand in for [`MemoryStore`].

mod memory;
pub mod paths;
mod typed;

pub use memory::MemoryStore;
pub use typed::{StoreExt, TxnExt};

use async_trait::async_trait;
use onair_common::{LiveError, StoreError};
use serde_json::Value;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How `set` treats an existing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Overwrite the whole document.
    Replace,
    /// Overwrite only the top-level fields present in the new value.
    Merge,
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Watch {
    Document(String),
    /// Direct children of a collection path.
    Collection(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One committed change to a watched document.
#[derive(Debug, Clone)]
pub struct Change {
    pub kind: ChangeKind,
    pub path: String,
    /// Last path segment (the document id).
    pub id: String,
    /// The document after the change; `None` for removals.
    pub value: Option<Value>,
}

/// A live change feed. Replays current state as `Added` changes, then
/// streams changes in commit order. Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Change>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Change>) -> Self {
        Self { rx }
    }

    /// Wait for the next change. `None` once the store has shut down.
    pub async fn next(&mut self) -> Option<Change> {
        self.rx.recv().await
    }

    /// Take an already-delivered change without waiting.
    pub fn try_next(&mut self) -> Option<Change> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        self.rx.close();
    }
}

/// Read/write view handed to a transaction body. Writes become visible
/// to other callers only if the body returns `Ok`.
pub trait Transaction: Send {
    fn get(&self, path: &str) -> Option<Value>;
    fn list(&self, collection: &str) -> Vec<(String, Value)>;
    fn set(&mut self, path: &str, value: Value, mode: SetMode);
    fn delete(&mut self, path: &str) -> bool;
    fn increment(&mut self, path: &str, field: &str, delta: i64) -> Result<i64, StoreError>;
}

/// A transaction body. It may run more than once on backends that retry
/// optimistic commits, so it must not have side effects beyond the
/// transaction and its captured outputs.
pub type TxnBody<'a> = dyn FnMut(&mut dyn Transaction) -> Result<(), LiveError> + Send + 'a;

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SignalingStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Direct children of a collection, in creation order.
    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError>;

    async fn set(&self, path: &str, value: Value, mode: SetMode) -> Result<(), StoreError>;

    /// Append a document under a store-assigned, insertion-ordered id.
    async fn add(&self, collection: &str, value: Value) -> Result<String, StoreError>;

    /// Returns whether the document existed.
    async fn delete(&self, path: &str) -> Result<bool, StoreError>;

    /// Atomically add `delta` to a numeric field and return the new value.
    /// Fails with `NotFound` if the document does not exist.
    async fn increment(&self, path: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    /// Run a read-modify-write body atomically.
    async fn transact(&self, body: &mut TxnBody<'_>) -> Result<(), LiveError>;

    async fn subscribe(&self, watch: Watch) -> Result<Subscription, StoreError>;
}

/// Split `a/b/c` into (`a/b`, `c`).
pub(crate) fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, id)) => (parent, id),
        None => ("", path),
    }
}

/// Shallow merge of top-level object fields; non-objects are replaced.
pub(crate) fn merge_value(existing: &mut Value, incoming: Value) {
    match incoming {
        Value::Object(fields) if existing.is_object() => {
            if let Some(target) = existing.as_object_mut() {
                for (key, value) in fields {
                    target.insert(key, value);
                }
            }
        }
        other => *existing = other,
    }
}
