//! Live voting over the current candidate set.
//!
//! Every candidate gets a derived [`VoteKey`] and one subscription on
//! `groups/{id}/votes/{voteKey}/count`. Tallies are only ever written by
//! those subscriptions; casting a vote goes through the store's atomic
//! increment and comes back as a pushed snapshot.

mod vote_key;

pub use vote_key::{derive_vote_key, MAX_VOTE_KEY_LEN};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::protocol::Notice;
use crate::store::{LiveSubscription, RemoteGroupStore, Snapshot, StorePath};
use crate::types::{BoardEntry, GroupId, RestaurantCandidate, VoteKey};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};

/// Vote count per key, as last pushed by the store
pub type Tallies = BTreeMap<VoteKey, u64>;

#[derive(Default)]
struct BoardInner {
    group: Option<GroupId>,
    generation: u64,
    entries: Vec<BoardEntry>,
    feeds: Vec<LiveSubscription>,
}

pub struct VotingBoard {
    store: Arc<dyn RemoteGroupStore>,
    inner: Arc<Mutex<BoardInner>>,
    tallies: Arc<watch::Sender<Tallies>>,
    notices: broadcast::Sender<Notice>,
}

impl VotingBoard {
    pub fn new(store: Arc<dyn RemoteGroupStore>, notices: broadcast::Sender<Notice>) -> Self {
        let (tallies, _rx) = watch::channel(Tallies::new());
        Self {
            store,
            inner: Arc::new(Mutex::new(BoardInner::default())),
            tallies: Arc::new(tallies),
            notices,
        }
    }

    /// Replace the candidate set for `group`.
    ///
    /// Releases every subscription of the previous set first; counters from
    /// that set are left untouched in the store.
    pub async fn set_candidates(
        &self,
        group: &GroupId,
        candidates: Vec<RestaurantCandidate>,
    ) -> Vec<BoardEntry> {
        let mut inner = self.inner.lock().await;
        self.release_locked(&mut inner).await;

        let entries: Vec<BoardEntry> = candidates
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| BoardEntry {
                vote_key: derive_vote_key(&candidate, index),
                candidate,
            })
            .collect();

        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for entry in &entries {
            if seen.insert(entry.vote_key.clone()) {
                keys.push(entry.vote_key.clone());
            } else {
                tracing::warn!(
                    "Vote key collision for '{}': these options share one counter",
                    entry.vote_key
                );
            }
        }

        inner.group = Some(group.clone());
        inner.entries = entries.clone();
        self.tallies
            .send_replace(keys.iter().map(|k| (k.clone(), 0)).collect());

        for key in keys {
            let path = StorePath::vote_count(group, &key);
            match self.open_feed(path, key, inner.generation).await {
                Ok(feed) => inner.feeds.push(feed),
                Err(e) => {
                    let _ = self.notices.send(Notice::Error {
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Board for group {} now has {} options ({} live counters)",
            group,
            inner.entries.len(),
            inner.feeds.len()
        );
        entries
    }

    async fn open_feed(
        &self,
        path: StorePath,
        key: VoteKey,
        generation: u64,
    ) -> CoreResult<LiveSubscription> {
        let subscription = self
            .store
            .subscribe(&path)
            .await
            .map_err(|e| CoreError::remote("load vote counts", e))?;

        let mut updates = subscription.updates;
        let inner = self.inner.clone();
        let tallies = self.tallies.clone();
        let notices = self.notices.clone();
        let feed_path = path.clone();

        let task = tokio::spawn(async move {
            while let Some(snapshot) = updates.recv().await {
                let guard = inner.lock().await;
                if guard.generation != generation {
                    break;
                }
                apply_count(&tallies, &notices, &feed_path, &key, snapshot);
                drop(guard);
            }
        });

        Ok(LiveSubscription::new(path, subscription.handle, task))
    }

    /// Cast one vote for `key` via the store's atomic increment.
    /// Returns the count the store committed.
    pub async fn cast_vote(&self, key: &VoteKey) -> CoreResult<u64> {
        let group = {
            let inner = self.inner.lock().await;
            let group = inner.group.clone().ok_or(ValidationError::NoActiveGroup)?;
            if !inner.entries.iter().any(|e| &e.vote_key == key) {
                return Err(ValidationError::UnknownCandidate(key.to_string()).into());
            }
            group
        };

        let count = self
            .store
            .atomic_increment(&StorePath::vote_count(&group, key), 1)
            .await
            .map_err(|e| CoreError::remote("cast your vote", e))?;

        tracing::info!("Vote cast for {} in group {} (now {})", key, group, count);
        Ok(count.max(0) as u64)
    }

    /// Detach every vote subscription, keeping the displayed candidates
    pub async fn release(&self) {
        let mut inner = self.inner.lock().await;
        self.release_locked(&mut inner).await;
    }

    /// Detach every vote subscription and drop the candidate set
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        self.release_locked(&mut inner).await;
        inner.group = None;
        inner.entries.clear();
        self.tallies.send_replace(Tallies::new());
    }

    async fn release_locked(&self, inner: &mut BoardInner) {
        inner.generation += 1;
        let feeds = std::mem::take(&mut inner.feeds);
        if !feeds.is_empty() {
            tracing::debug!("Releasing {} vote subscriptions", feeds.len());
        }
        for feed in feeds {
            feed.cancel(self.store.as_ref()).await;
        }
    }

    pub async fn entries(&self) -> Vec<BoardEntry> {
        self.inner.lock().await.entries.clone()
    }

    /// Resolve a vote key or a 1-based option number
    pub async fn resolve(&self, reference: &str) -> Option<BoardEntry> {
        let inner = self.inner.lock().await;
        let by_position = reference
            .strip_prefix('#')
            .and_then(|n| n.parse::<usize>().ok())
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| inner.entries.get(i));
        by_position
            .or_else(|| inner.entries.iter().find(|e| e.vote_key.as_str() == reference))
            .cloned()
    }

    pub async fn live_feeds(&self) -> usize {
        self.inner.lock().await.feeds.len()
    }

    pub fn tallies(&self) -> Tallies {
        self.tallies.borrow().clone()
    }

    pub fn tally(&self, key: &VoteKey) -> u64 {
        self.tallies.borrow().get(key).copied().unwrap_or(0)
    }

    pub fn watch_tallies(&self) -> watch::Receiver<Tallies> {
        self.tallies.subscribe()
    }
}

fn apply_count(
    tallies: &watch::Sender<Tallies>,
    notices: &broadcast::Sender<Notice>,
    path: &StorePath,
    key: &VoteKey,
    snapshot: Snapshot,
) {
    match snapshot {
        Ok(value) => {
            let count = count_from_snapshot(path, value);
            tallies.send_if_modified(|t| match t.get_mut(key) {
                Some(existing) if *existing != count => {
                    *existing = count;
                    true
                }
                _ => false,
            });
        }
        Err(e) => {
            tracing::error!("Vote count feed on {} failed: {}", path, e);
            let _ = notices.send(Notice::Error {
                message: "Error fetching vote counts.".to_string(),
            });
        }
    }
}

/// Absent, null, negative or non-numeric counts display as 0
fn count_from_snapshot(path: &StorePath, value: Option<Value>) -> u64 {
    let Some(value) = value else {
        return 0;
    };
    if let Some(count) = value.as_u64() {
        return count;
    }
    if let Some(count) = value.as_f64().filter(|f| *f >= 0.0) {
        return count as u64;
    }
    tracing::warn!("Ignoring malformed vote count at {}: {}", path, value);
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn board() -> (Arc<MemoryStore>, VotingBoard) {
        let store = Arc::new(MemoryStore::new());
        let (notices, _rx) = broadcast::channel(16);
        let board = VotingBoard::new(store.clone(), notices);
        (store, board)
    }

    fn group() -> GroupId {
        GroupId::parse("FF-test1").unwrap()
    }

    async fn wait_for_tally(board: &VotingBoard, key: &VoteKey, expected: u64) {
        let mut rx = board.watch_tallies();
        tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|t| t.get(key).copied() == Some(expected)),
        )
        .await
        .expect("tally should update")
        .expect("board alive");
    }

    #[tokio::test]
    async fn test_empty_candidate_list() {
        let (store, board) = board();
        let entries = board.set_candidates(&group(), vec![]).await;

        assert!(entries.is_empty());
        assert_eq!(board.live_feeds().await, 0);
        assert_eq!(store.live_subscriptions().await, 0);
        assert!(board.tallies().is_empty());
    }

    #[tokio::test]
    async fn test_candidates_get_distinct_keys_and_zero_counts() {
        let (store, board) = board();
        let entries = board
            .set_candidates(
                &group(),
                vec![
                    RestaurantCandidate::named("Dosa Point").at(12.97, 77.59),
                    RestaurantCandidate::named("Truffles").at(12.93, 77.62),
                ],
            )
            .await;

        assert_eq!(entries.len(), 2);
        assert_ne!(entries[0].vote_key, entries[1].vote_key);
        assert_eq!(board.live_feeds().await, 2);
        assert_eq!(store.live_subscriptions().await, 2);
        for entry in &entries {
            assert_eq!(board.tally(&entry.vote_key), 0);
        }
    }

    #[tokio::test]
    async fn test_existing_counts_are_loaded() {
        let (store, board) = board();
        let candidate = RestaurantCandidate::named("Dosa Point");
        let key = derive_vote_key(&candidate, 0);
        store
            .write(&StorePath::vote_count(&group(), &key), json!(7))
            .await
            .unwrap();

        board.set_candidates(&group(), vec![candidate]).await;
        wait_for_tally(&board, &key, 7).await;
    }

    #[tokio::test]
    async fn test_vote_round_trips_through_subscription() {
        let (_store, board) = board();
        let entries = board
            .set_candidates(&group(), vec![RestaurantCandidate::named("Dosa Point")])
            .await;
        let key = entries[0].vote_key.clone();

        assert_eq!(board.cast_vote(&key).await.unwrap(), 1);
        wait_for_tally(&board, &key, 1).await;
        assert_eq!(board.cast_vote(&key).await.unwrap(), 2);
        wait_for_tally(&board, &key, 2).await;
    }

    #[tokio::test]
    async fn test_unknown_key_is_rejected() {
        let (store, board) = board();
        board
            .set_candidates(&group(), vec![RestaurantCandidate::named("Dosa Point")])
            .await;

        let result = board.cast_vote(&VoteKey::new("Old_Option")).await;
        assert!(matches!(
            result,
            Err(CoreError::Validation(ValidationError::UnknownCandidate(_)))
        ));
        assert_eq!(store.get(&StorePath::votes(&group())).await, None);
    }

    #[tokio::test]
    async fn test_vote_without_group_is_rejected() {
        let (_store, board) = board();
        let result = board.cast_vote(&VoteKey::new("x")).await;
        assert_eq!(
            result,
            Err(CoreError::Validation(ValidationError::NoActiveGroup))
        );
    }

    #[tokio::test]
    async fn test_replacing_candidates_releases_and_orphans() {
        let (store, board) = board();
        let first = board
            .set_candidates(&group(), vec![RestaurantCandidate::named("Old Place")])
            .await;
        board.cast_vote(&first[0].vote_key).await.unwrap();

        board
            .set_candidates(
                &group(),
                vec![
                    RestaurantCandidate::named("New One"),
                    RestaurantCandidate::named("New Two"),
                ],
            )
            .await;

        assert_eq!(store.live_subscriptions().await, 2);
        // The old counter stays in the store, it is just no longer displayed
        assert_eq!(
            store
                .get(&StorePath::vote_count(&group(), &first[0].vote_key))
                .await,
            Some(json!(1))
        );
        assert!(!board.tallies().contains_key(&first[0].vote_key));
    }

    #[tokio::test]
    async fn test_release_and_clear() {
        let (store, board) = board();
        board
            .set_candidates(&group(), vec![RestaurantCandidate::named("A")])
            .await;

        board.release().await;
        assert_eq!(store.live_subscriptions().await, 0);
        assert_eq!(board.entries().await.len(), 1);

        board.clear().await;
        assert!(board.entries().await.is_empty());
        assert!(board.tallies().is_empty());
    }

    #[tokio::test]
    async fn test_colliding_keys_share_one_feed() {
        let (store, board) = board();
        let entries = board
            .set_candidates(
                &group(),
                vec![
                    RestaurantCandidate::named("Cafe!").at(1.0, 2.0),
                    RestaurantCandidate::named("Cafe?").at(1.0, 2.0),
                ],
            )
            .await;

        assert_eq!(entries[0].vote_key, entries[1].vote_key);
        assert_eq!(store.live_subscriptions().await, 1);
    }

    #[tokio::test]
    async fn test_resolve_by_position_or_key() {
        let (_store, board) = board();
        let entries = board
            .set_candidates(
                &group(),
                vec![RestaurantCandidate::named("A"), RestaurantCandidate::named("B")],
            )
            .await;

        assert_eq!(board.resolve("#2").await, Some(entries[1].clone()));
        assert_eq!(board.resolve("A").await, Some(entries[0].clone()));
        assert_eq!(board.resolve("#0").await, None);
        assert_eq!(board.resolve("C").await, None);
    }

    #[test]
    fn test_malformed_counts_display_as_zero() {
        let path = StorePath::new("groups/g/votes/k/count");
        assert_eq!(count_from_snapshot(&path, None), 0);
        assert_eq!(count_from_snapshot(&path, Some(json!(4))), 4);
        assert_eq!(count_from_snapshot(&path, Some(json!(-2))), 0);
        assert_eq!(count_from_snapshot(&path, Some(json!("many"))), 0);
    }
}
