//! Realtime group store contract.
//!
//! The core talks to a realtime key-value tree through [`RemoteGroupStore`].
//! Subscriptions deliver the current value immediately and again after every
//! change, until they are explicitly detached.

mod firebase;
mod memory;
mod sse;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;

use crate::types::{GroupId, MemberKey, VoteKey};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures reported by a store implementation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Network(String),

    #[error("permission denied at {0}")]
    PermissionDenied(String),

    #[error("invalid store path: {0}")]
    InvalidPath(String),

    #[error("unexpected store response: {0}")]
    Unexpected(String),
}

/// Slash-separated location inside the store tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath(String);

impl StorePath {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self(path.trim_matches('/').to_string())
    }

    /// `groups/{id}`
    pub fn group(group: &GroupId) -> Self {
        Self(format!("groups/{}", group))
    }

    /// `groups/{id}/members`
    pub fn members(group: &GroupId) -> Self {
        Self(format!("groups/{}/members", group))
    }

    /// `groups/{id}/members/{key}`
    pub fn member(group: &GroupId, key: &MemberKey) -> Self {
        Self(format!("groups/{}/members/{}", group, key))
    }

    /// `groups/{id}/votes`
    pub fn votes(group: &GroupId) -> Self {
        Self(format!("groups/{}/votes", group))
    }

    /// `groups/{id}/votes/{voteKey}/count`
    pub fn vote_count(group: &GroupId, key: &VoteKey) -> Self {
        Self(format!("groups/{}/votes/{}/count", group, key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    pub fn child(&self, segment: &str) -> Self {
        if self.0.is_empty() {
            Self(segment.to_string())
        } else {
            Self(format!("{}/{}", self.0, segment))
        }
    }

    /// True if `self` equals `other` or lies underneath it
    pub fn is_within(&self, other: &StorePath) -> bool {
        other.0.is_empty()
            || self.0 == other.0
            || (self.0.starts_with(&other.0) && self.0[other.0.len()..].starts_with('/'))
    }

    /// True if one path contains the other
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.is_within(other) || other.is_within(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one open subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// One delivery: the value at the path (`None` when there is no data) or a failure
pub type Snapshot = StoreResult<Option<Value>>;

/// An open subscription and the channel its snapshots arrive on
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub updates: mpsc::UnboundedReceiver<Snapshot>,
}

#[async_trait]
pub trait RemoteGroupStore: Send + Sync {
    /// Open a value subscription; the current value is delivered first
    async fn subscribe(&self, path: &StorePath) -> StoreResult<Subscription>;

    /// Detach a subscription; safe to call on an already-detached handle
    async fn unsubscribe(&self, handle: SubscriptionHandle);

    /// Upsert the value at `path`
    async fn write(&self, path: &StorePath, value: Value) -> StoreResult<()>;

    /// Add a child under a store-generated, chronologically sortable key
    async fn push(&self, path: &StorePath, value: Value) -> StoreResult<String>;

    /// Delete the subtree at `path`
    async fn remove(&self, path: &StorePath) -> StoreResult<()>;

    /// Add `delta` to the integer at `path` without external interleaving;
    /// an absent value counts as 0. Returns the committed value.
    async fn atomic_increment(&self, path: &StorePath, delta: i64) -> StoreResult<i64>;
}

/// A subscription whose snapshots are being applied by a background task
pub struct LiveSubscription {
    path: StorePath,
    handle: SubscriptionHandle,
    task: JoinHandle<()>,
}

impl LiveSubscription {
    pub fn new(path: StorePath, handle: SubscriptionHandle, task: JoinHandle<()>) -> Self {
        Self { path, handle, task }
    }

    /// Stop applying snapshots and detach from the store
    pub async fn cancel(self, store: &dyn RemoteGroupStore) {
        self.task.abort();
        store.unsubscribe(self.handle).await;
        tracing::debug!("Detached subscription on {}", self.path);
    }
}
