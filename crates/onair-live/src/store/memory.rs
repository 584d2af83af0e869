//! In-process signaling store.
//!
//! Everything lives behind one async mutex, which makes every operation,
//! including transactions, trivially atomic. Subscribers get changes on
//! unbounded channels in commit order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use onair_common::{LiveError, StoreError};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

use super::{
    merge_value, split_path, Change, ChangeKind, SetMode, SignalingStore, Subscription,
    Transaction, TxnBody, Watch,
};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct Entry {
    value: Value,
    /// Creation order, used to list collections in insertion order.
    seq: u64,
}

struct Subscriber {
    watch: Watch,
    tx: mpsc::UnboundedSender<Change>,
}

impl Subscriber {
    fn wants(&self, path: &str) -> bool {
        match &self.watch {
            Watch::Document(doc) => doc == path,
            Watch::Collection(collection) => split_path(path).0 == collection,
        }
    }
}

#[derive(Default)]
struct State {
    docs: BTreeMap<String, Entry>,
    next_seq: u64,
    subscribers: Vec<Subscriber>,
}

impl State {
    fn children(&self, collection: &str) -> Vec<(String, Value)> {
        let prefix = format!("{collection}/");
        let mut found: Vec<(u64, String, Value)> = self
            .docs
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/'))
            .map(|(path, entry)| {
                (
                    entry.seq,
                    path[prefix.len()..].to_string(),
                    entry.value.clone(),
                )
            })
            .collect();
        found.sort_by_key(|(seq, _, _)| *seq);
        found.into_iter().map(|(_, id, value)| (id, value)).collect()
    }

    /// Apply a single committed write and fan it out to subscribers.
    fn write(&mut self, path: &str, value: Option<Value>) {
        let kind = match (self.docs.contains_key(path), &value) {
            (true, Some(_)) => ChangeKind::Modified,
            (false, Some(_)) => ChangeKind::Added,
            (true, None) => ChangeKind::Removed,
            (false, None) => return,
        };

        match &value {
            Some(v) => {
                if let Some(entry) = self.docs.get_mut(path) {
                    entry.value = v.clone();
                } else {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    self.docs.insert(
                        path.to_string(),
                        Entry {
                            value: v.clone(),
                            seq,
                        },
                    );
                }
            }
            None => {
                self.docs.remove(path);
            }
        }

        let change = Change {
            kind,
            path: path.to_string(),
            id: split_path(path).1.to_string(),
            value,
        };
        self.subscribers.retain(|s| !s.tx.is_closed());
        for sub in self.subscribers.iter().filter(|s| s.wants(path)) {
            let _ = sub.tx.send(change.clone());
        }
        trace!(path, ?kind, "store write");
    }
}

fn bump(doc: &mut Value, path: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
    let fields = doc
        .as_object_mut()
        .ok_or_else(|| StoreError::Conflict(format!("{path} is not an object")))?;
    let current = match fields.get(field) {
        None | Some(Value::Null) => 0,
        Some(v) => v
            .as_i64()
            .ok_or_else(|| StoreError::Conflict(format!("{path}.{field} is not an integer")))?,
    };
    let next = current + delta;
    fields.insert(field.to_string(), Value::from(next));
    Ok(next)
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

struct MemTxn<'a> {
    state: &'a State,
    writes: BTreeMap<String, Option<Value>>,
    /// First-write order, so new documents get creation seqs in order.
    order: Vec<String>,
}

impl<'a> MemTxn<'a> {
    fn new(state: &'a State) -> Self {
        Self {
            state,
            writes: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    fn record(&mut self, path: &str, value: Option<Value>) {
        if !self.writes.contains_key(path) {
            self.order.push(path.to_string());
        }
        self.writes.insert(path.to_string(), value);
    }
}

impl Transaction for MemTxn<'_> {
    fn get(&self, path: &str) -> Option<Value> {
        match self.writes.get(path) {
            Some(staged) => staged.clone(),
            None => self.state.docs.get(path).map(|e| e.value.clone()),
        }
    }

    fn list(&self, collection: &str) -> Vec<(String, Value)> {
        let mut docs = self.state.children(collection);
        for path in &self.order {
            let (parent, id) = split_path(path);
            if parent != collection {
                continue;
            }
            let staged = self.writes.get(path).cloned().flatten();
            let pos = docs.iter().position(|(existing, _)| existing == id);
            match (pos, staged) {
                (Some(i), Some(v)) => docs[i].1 = v,
                (Some(i), None) => {
                    docs.remove(i);
                }
                (None, Some(v)) => docs.push((id.to_string(), v)),
                (None, None) => {}
            }
        }
        docs
    }

    fn set(&mut self, path: &str, value: Value, mode: SetMode) {
        let next = match (mode, self.get(path)) {
            (SetMode::Merge, Some(mut current)) => {
                merge_value(&mut current, value);
                current
            }
            _ => value,
        };
        self.record(path, Some(next));
    }

    fn delete(&mut self, path: &str) -> bool {
        let existed = self.get(path).is_some();
        self.record(path, None);
        existed
    }

    fn increment(&mut self, path: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut doc = self
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        let next = bump(&mut doc, path, field, delta)?;
        self.record(path, Some(doc));
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Signaling store held entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    pending_failures: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operations fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Number of live (not yet dropped) subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock().await;
        state.subscribers.retain(|s| !s.tx.is_closed());
        state.subscribers.len()
    }

    fn take_failure(&self) -> Result<(), StoreError> {
        let taken = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match taken {
            Ok(_) => Err(StoreError::Transient("injected failure".into())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.take_failure()?;
        let state = self.state.lock().await;
        Ok(state.docs.get(path).map(|e| e.value.clone()))
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        self.take_failure()?;
        Ok(self.state.lock().await.children(collection))
    }

    async fn set(&self, path: &str, value: Value, mode: SetMode) -> Result<(), StoreError> {
        self.take_failure()?;
        let mut state = self.state.lock().await;
        let next = match (mode, state.docs.get(path)) {
            (SetMode::Merge, Some(entry)) => {
                let mut current = entry.value.clone();
                merge_value(&mut current, value);
                current
            }
            _ => value,
        };
        state.write(path, Some(next));
        Ok(())
    }

    async fn add(&self, collection: &str, value: Value) -> Result<String, StoreError> {
        self.take_failure()?;
        let mut state = self.state.lock().await;
        let id = format!("{:012}", state.next_seq);
        state.write(&format!("{collection}/{id}"), Some(value));
        Ok(id)
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        self.take_failure()?;
        let mut state = self.state.lock().await;
        let existed = state.docs.contains_key(path);
        state.write(path, None);
        Ok(existed)
    }

    async fn increment(&self, path: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        self.take_failure()?;
        let mut state = self.state.lock().await;
        let mut doc = state
            .docs
            .get(path)
            .map(|e| e.value.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        let next = bump(&mut doc, path, field, delta)?;
        state.write(path, Some(doc));
        Ok(next)
    }

    async fn transact(&self, body: &mut TxnBody<'_>) -> Result<(), LiveError> {
        self.take_failure()?;
        let mut state = self.state.lock().await;

        let (mut writes, order) = {
            let mut txn = MemTxn::new(&state);
            body(&mut txn)?;
            (txn.writes, txn.order)
        };

        for path in order {
            if let Some(value) = writes.remove(&path) {
                state.write(&path, value);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, watch: Watch) -> Result<Subscription, StoreError> {
        self.take_failure()?;
        let mut state = self.state.lock().await;
        let (tx, rx) = mpsc::unbounded_channel();

        let snapshot: Vec<(String, Value)> = match &watch {
            Watch::Document(path) => state
                .docs
                .get(path)
                .map(|e| vec![(path.clone(), e.value.clone())])
                .unwrap_or_default(),
            Watch::Collection(collection) => state
                .children(collection)
                .into_iter()
                .map(|(id, value)| (format!("{collection}/{id}"), value))
                .collect(),
        };
        for (path, value) in snapshot {
            let _ = tx.send(Change {
                kind: ChangeKind::Added,
                id: split_path(&path).1.to_string(),
                path,
                value: Some(value),
            });
        }

        state.subscribers.push(Subscriber { watch, tx });
        Ok(Subscription::new(rx))
    }
}
