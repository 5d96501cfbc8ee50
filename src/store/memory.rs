//! In-process realtime store.
//!
//! Holds the whole tree as JSON and fans out value snapshots to subscribers
//! whenever a mutation touches their path. All mutations run under one lock,
//! so `atomic_increment` is a true read-modify-write.

use super::*;
use serde_json::Map;
use std::collections::HashMap;
use tokio::sync::Mutex;
use ulid::Generator;

struct Subscriber {
    path: StorePath,
    tx: mpsc::UnboundedSender<Snapshot>,
    last: Option<Value>,
}

struct MemoryInner {
    root: Value,
    subscribers: HashMap<u64, Subscriber>,
    next_handle: u64,
    keys: Generator,
    offline: bool,
    denied: Vec<StorePath>,
}

/// Realtime store that lives entirely in memory
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                root: Value::Object(Map::new()),
                subscribers: HashMap::new(),
                next_handle: 1,
                keys: Generator::new(),
                offline: false,
                denied: Vec::new(),
            }),
        }
    }

    /// Read the current value at `path`
    pub async fn get(&self, path: &StorePath) -> Option<Value> {
        let inner = self.inner.lock().await;
        lookup(&inner.root, path).cloned()
    }

    /// Simulate losing the connection: every operation fails until restored
    pub async fn set_offline(&self, offline: bool) {
        self.inner.lock().await.offline = offline;
    }

    /// Reject mutations at or below `path`, like a security rule would
    pub async fn deny_writes(&self, path: StorePath) {
        self.inner.lock().await.denied.push(path);
    }

    /// Number of open subscriptions
    pub async fn live_subscriptions(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    /// Number of open subscriptions at or below `path`
    pub async fn live_subscriptions_within(&self, path: &StorePath) -> usize {
        self.inner
            .lock()
            .await
            .subscribers
            .values()
            .filter(|s| s.path.is_within(path))
            .count()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInner {
    fn check_online(&self) -> StoreResult<()> {
        if self.offline {
            return Err(StoreError::Network("store is offline".to_string()));
        }
        Ok(())
    }

    fn check_writable(&self, path: &StorePath) -> StoreResult<()> {
        self.check_online()?;
        if path.segments().next().is_none() {
            return Err(StoreError::InvalidPath("cannot mutate the root".to_string()));
        }
        if self.denied.iter().any(|d| path.overlaps(d)) {
            return Err(StoreError::PermissionDenied(path.to_string()));
        }
        Ok(())
    }

    fn apply(&mut self, path: &StorePath, value: Option<Value>) {
        let segments: Vec<&str> = path.segments().collect();
        match value {
            Some(v) if !is_empty(&v) => insert(&mut self.root, &segments, v),
            _ => {
                remove(&mut self.root, &segments);
            }
        }
        self.notify(path);
    }

    /// Deliver fresh snapshots to every subscriber whose view may have changed
    fn notify(&mut self, changed: &StorePath) {
        let root = &self.root;
        let mut closed = Vec::new();

        for (handle, sub) in self.subscribers.iter_mut() {
            if !sub.path.overlaps(changed) {
                continue;
            }
            let current = lookup(root, &sub.path).cloned();
            if current == sub.last {
                continue;
            }
            if sub.tx.send(Ok(current.clone())).is_err() {
                closed.push(*handle);
                continue;
            }
            sub.last = current;
        }

        for handle in closed {
            self.subscribers.remove(&handle);
        }
    }
}

/// Firebase semantics: null, empty objects and empty arrays hold no data
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn lookup<'a>(root: &'a Value, path: &StorePath) -> Option<&'a Value> {
    let mut node = root;
    for segment in path.segments() {
        node = match node {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if is_empty(node) {
        None
    } else {
        Some(node)
    }
}

fn insert(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map
            .entry(first.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        insert(child, rest, value);
    }
}

/// Remove the subtree at `segments`, pruning parents left empty.
/// Returns true if `node` itself became empty.
fn remove(node: &mut Value, segments: &[&str]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return true;
    };
    if let Value::Object(map) = node {
        let prune = match map.get_mut(*first) {
            Some(child) => remove(child, rest),
            None => false,
        };
        if prune {
            map.remove(*first);
        }
        return map.is_empty();
    }
    false
}

#[async_trait]
impl RemoteGroupStore for MemoryStore {
    async fn subscribe(&self, path: &StorePath) -> StoreResult<Subscription> {
        let mut inner = self.inner.lock().await;
        inner.check_online()?;

        let (tx, updates) = mpsc::unbounded_channel();
        let current = lookup(&inner.root, path).cloned();
        // Receiver is still in scope, so the first delivery cannot fail
        let _ = tx.send(Ok(current.clone()));

        let handle = inner.next_handle;
        inner.next_handle += 1;
        inner.subscribers.insert(
            handle,
            Subscriber {
                path: path.clone(),
                tx,
                last: current,
            },
        );

        tracing::debug!("Subscription {} opened on {}", handle, path);
        Ok(Subscription {
            handle: SubscriptionHandle(handle),
            updates,
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        if self.inner.lock().await.subscribers.remove(&handle.0).is_some() {
            tracing::debug!("Subscription {} closed", handle.0);
        }
    }

    async fn write(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_writable(path)?;
        inner.apply(path, Some(value));
        Ok(())
    }

    async fn push(&self, path: &StorePath, value: Value) -> StoreResult<String> {
        let mut inner = self.inner.lock().await;
        inner.check_writable(path)?;

        let key = inner
            .keys
            .generate()
            .map_err(|e| StoreError::Unexpected(format!("key generation failed: {}", e)))?
            .to_string();
        inner.apply(&path.child(&key), Some(value));
        Ok(key)
    }

    async fn remove(&self, path: &StorePath) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_writable(path)?;
        inner.apply(path, None);
        Ok(())
    }

    async fn atomic_increment(&self, path: &StorePath, delta: i64) -> StoreResult<i64> {
        let mut inner = self.inner.lock().await;
        inner.check_writable(path)?;

        let current = match lookup(&inner.root, path) {
            None => 0,
            Some(value) => value.as_i64().ok_or_else(|| {
                StoreError::Unexpected(format!("{} does not hold an integer", path))
            })?,
        };
        let next = current.checked_add(delta).ok_or_else(|| {
            StoreError::Unexpected(format!("increment of {} overflows", path))
        })?;
        inner.apply(path, Some(Value::from(next)));
        Ok(next)
    }
}
