//! Lifecycle of the active group.
//!
//! The member list is a projection of the last snapshot pushed by the store;
//! it is never mutated ahead of the store confirming a write. Leaving or
//! switching groups detaches every subscription of the old group before a
//! new one is opened, and a generation counter keeps late snapshots from a
//! detached feed from being applied.

pub mod marker;

use crate::board::VotingBoard;
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::protocol::Notice;
use crate::recommend::{AnalyzeError, RecommendationService};
use crate::store::{LiveSubscription, RemoteGroupStore, StorePath};
use crate::types::{GroupId, Member, MemberEntry, MemberKey, Recommendations};
use marker::ActiveGroupMarker;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};

const FALLBACK_MESSAGE: &str = "AI message unavailable.";

#[derive(Default)]
struct SessionInner {
    active: Option<GroupId>,
    generation: u64,
    member_feed: Option<LiveSubscription>,
}

pub struct GroupSession {
    store: Arc<dyn RemoteGroupStore>,
    marker: Arc<dyn ActiveGroupMarker>,
    board: Arc<VotingBoard>,
    inner: Arc<Mutex<SessionInner>>,
    members: Arc<watch::Sender<Vec<MemberEntry>>>,
    notices: broadcast::Sender<Notice>,
}

impl GroupSession {
    pub fn new(
        store: Arc<dyn RemoteGroupStore>,
        marker: Arc<dyn ActiveGroupMarker>,
        notices: broadcast::Sender<Notice>,
    ) -> Self {
        let board = Arc::new(VotingBoard::new(store.clone(), notices.clone()));
        let (members, _rx) = watch::channel(Vec::new());
        Self {
            store,
            marker,
            board,
            inner: Arc::new(Mutex::new(SessionInner::default())),
            members: Arc::new(members),
            notices,
        }
    }

    /// Re-join the group recorded by the marker, if any
    pub async fn resume(&self) -> CoreResult<Option<GroupId>> {
        match self.marker.load() {
            Ok(Some(group)) => {
                tracing::info!("Resuming session in group {}", group);
                self.join_group(group).await.map(Some)
            }
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!("Ignoring unreadable session marker: {}", e);
                Ok(None)
            }
        }
    }

    /// Join the group typed in by the user
    pub async fn join(&self, raw_id: &str) -> CoreResult<GroupId> {
        let group = GroupId::parse(raw_id)?;
        self.join_group(group).await
    }

    /// Start a brand new group and join it
    pub async fn create(&self) -> CoreResult<GroupId> {
        let group = GroupId::generate();
        tracing::info!("Created group {}", group);
        self.join_group(group).await
    }

    /// Join `group`, replacing whatever group was active.
    ///
    /// If the member subscription cannot be opened the session ends up with
    /// no active group and no saved marker, as after `leave`.
    pub async fn join_group(&self, group: GroupId) -> CoreResult<GroupId> {
        let mut inner = self.inner.lock().await;
        self.teardown_locked(&mut inner).await;

        inner.active = Some(group.clone());
        if let Err(e) = self.marker.save(&group) {
            tracing::warn!("Failed to persist active group {}: {}", group, e);
        }
        self.members.send_replace(Vec::new());

        let feed = match self.open_member_feed(&group, inner.generation).await {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!("Could not join group {}, rolling back", group);
                inner.active = None;
                if let Err(e) = self.marker.clear() {
                    tracing::warn!("Failed to clear session marker: {}", e);
                }
                return Err(e);
            }
        };
        inner.member_feed = Some(feed);

        tracing::info!("Joined group {}", group);
        let _ = self.notices.send(Notice::Joined {
            group_id: group.clone(),
        });
        Ok(group)
    }

    /// Abandon the active group locally; nothing is deleted remotely
    pub async fn leave(&self) {
        let mut inner = self.inner.lock().await;
        self.teardown_locked(&mut inner).await;

        if let Some(group) = inner.active.take() {
            tracing::info!("Left group {}", group);
        }
        if let Err(e) = self.marker.clear() {
            tracing::warn!("Failed to clear session marker: {}", e);
        }
        self.members.send_replace(Vec::new());
        let _ = self.notices.send(Notice::Left);
    }

    /// Detach the member feed and every vote feed of the current group
    async fn teardown_locked(&self, inner: &mut SessionInner) {
        inner.generation += 1;
        if let Some(feed) = inner.member_feed.take() {
            feed.cancel(self.store.as_ref()).await;
        }
        self.board.clear().await;
    }

    async fn open_member_feed(
        &self,
        group: &GroupId,
        generation: u64,
    ) -> CoreResult<LiveSubscription> {
        let path = StorePath::members(group);
        let subscription = self
            .store
            .subscribe(&path)
            .await
            .map_err(|e| CoreError::remote("load group members", e))?;

        let mut updates = subscription.updates;
        let inner = self.inner.clone();
        let members = self.members.clone();
        let notices = self.notices.clone();
        let feed_path = path.clone();

        let task = tokio::spawn(async move {
            while let Some(snapshot) = updates.recv().await {
                let guard = inner.lock().await;
                if guard.generation != generation {
                    break;
                }
                match snapshot {
                    Ok(value) => {
                        let list = members_from_snapshot(&feed_path, value);
                        tracing::debug!(
                            "Member snapshot on {}: {} members",
                            feed_path,
                            list.len()
                        );
                        members.send_if_modified(|current| {
                            if *current == list {
                                false
                            } else {
                                *current = list;
                                true
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Member feed on {} failed: {}", feed_path, e);
                        let _ = notices.send(Notice::Error {
                            message: "Error fetching members.".to_string(),
                        });
                    }
                }
                drop(guard);
            }
        });

        Ok(LiveSubscription::new(path, subscription.handle, task))
    }

    async fn require_group(&self) -> CoreResult<GroupId> {
        let group = self.inner.lock().await.active.clone();
        group.ok_or_else(|| ValidationError::NoActiveGroup.into())
    }

    /// Write a member record under a store-generated key.
    ///
    /// The local member list only changes once the store pushes it back.
    pub async fn add_member(&self, member: Member) -> CoreResult<MemberKey> {
        let group = self.require_group().await?;
        member.validate()?;

        let value =
            serde_json::to_value(&member).map_err(|e| CoreError::remote("save preferences", e))?;
        let key = self
            .store
            .push(&StorePath::members(&group), value)
            .await
            .map_err(|e| CoreError::remote("save preferences", e))?;

        tracing::info!("Added member '{}' to group {} as {}", member.name, group, key);
        Ok(MemberKey::new(key))
    }

    pub async fn remove_member(&self, key: &MemberKey) -> CoreResult<()> {
        let group = self.require_group().await?;
        self.store
            .remove(&StorePath::member(&group, key))
            .await
            .map_err(|e| CoreError::remote("remove the member", e))?;

        tracing::info!("Removed member {} from group {}", key, group);
        Ok(())
    }

    /// Wipe every member and every vote counter of the active group.
    ///
    /// Members go first, then votes. Local state is only reset once both
    /// removals succeeded.
    pub async fn clear(&self) -> CoreResult<()> {
        let group = self.require_group().await?;

        self.store
            .remove(&StorePath::members(&group))
            .await
            .map_err(|e| CoreError::remote("clear group members", e))?;
        self.store
            .remove(&StorePath::votes(&group))
            .await
            .map_err(|e| CoreError::remote("clear group votes", e))?;

        let inner = self.inner.lock().await;
        if inner.active.as_ref() == Some(&group) {
            self.board.set_candidates(&group, Vec::new()).await;
            self.members.send_replace(Vec::new());
        }
        drop(inner);

        tracing::info!("Cleared group {}", group);
        let _ = self.notices.send(Notice::GroupCleared);
        Ok(())
    }

    /// Ask the recommendation service for candidates and put them on the board
    pub async fn generate_recommendations(
        &self,
        service: &dyn RecommendationService,
    ) -> CoreResult<Recommendations> {
        let group = self.require_group().await?;
        let entries = self.members();
        if entries.is_empty() {
            return Err(ValidationError::NoMembers.into());
        }
        if entries.iter().any(|e| e.member.location().is_none()) {
            return Err(ValidationError::MembersMissingLocation.into());
        }

        let records: Vec<Member> = entries.into_iter().map(|e| e.member).collect();
        let response = service
            .analyze(&records)
            .await
            .map_err(recommendation_error)?;

        let inner = self.inner.lock().await;
        if inner.active.as_ref() != Some(&group) {
            tracing::warn!("Discarding recommendations for {}: group changed", group);
            return Err(ValidationError::GroupChanged.into());
        }
        let board = self
            .board
            .set_candidates(&group, response.top_restaurants)
            .await;
        drop(inner);

        let ai = response.ai_recommendation.unwrap_or_default();
        Ok(Recommendations {
            message: ai
                .friendly_message
                .unwrap_or_else(|| FALLBACK_MESSAGE.to_string()),
            maps_url: ai.maps_url,
            entries: board,
        })
    }

    pub async fn active_group(&self) -> Option<GroupId> {
        self.inner.lock().await.active.clone()
    }

    /// Members in arrival order, as last pushed by the store
    pub fn members(&self) -> Vec<MemberEntry> {
        self.members.borrow().clone()
    }

    pub fn watch_members(&self) -> watch::Receiver<Vec<MemberEntry>> {
        self.members.subscribe()
    }

    pub fn board(&self) -> &Arc<VotingBoard> {
        &self.board
    }
}

fn recommendation_error(e: AnalyzeError) -> CoreError {
    match e {
        AnalyzeError::Rejected(message) => CoreError::Recommendation(message),
        other => CoreError::remote("get recommendations", other),
    }
}

/// Turn a members snapshot into entries ordered by store key.
///
/// Accepts a keyed object or a plain array (index becomes the key).
/// Entries that do not parse as members are skipped.
fn members_from_snapshot(path: &StorePath, value: Option<Value>) -> Vec<MemberEntry> {
    let pairs: Vec<(String, Value)> = match value {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Object(map)) => map.into_iter().collect(),
        Some(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        Some(other) => {
            tracing::warn!("Ignoring malformed member snapshot at {}: {}", path, other);
            return Vec::new();
        }
    };

    pairs
        .into_iter()
        .filter_map(|(key, raw)| match serde_json::from_value::<Member>(raw) {
            Ok(member) => Some(MemberEntry {
                key: MemberKey::new(key),
                member,
            }),
            Err(e) => {
                tracing::warn!("Skipping malformed member {} at {}: {}", key, path, e);
                None
            }
        })
        .collect()
}
