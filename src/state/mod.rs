use crate::error::{CoreError, CoreResult};
use crate::picker::{PickOutcome, RandomSelector};
use crate::protocol::Notice;
use crate::recommend::RecommendationService;
use crate::session::marker::ActiveGroupMarker;
use crate::session::GroupSession;
use crate::store::RemoteGroupStore;
use crate::types::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Shared application state handed to every UI collaborator
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<GroupSession>,
    pub picker: Arc<RandomSelector>,
    pub recommender: Arc<dyn RecommendationService>,
    /// Broadcast channel for asynchronous notices to the UI
    pub notices: broadcast::Sender<Notice>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RemoteGroupStore>,
        marker: Arc<dyn ActiveGroupMarker>,
        recommender: Arc<dyn RecommendationService>,
        pick_delay: Duration,
    ) -> Self {
        let (notices, _rx) = broadcast::channel(100);
        Self {
            session: Arc::new(GroupSession::new(store, marker, notices.clone())),
            picker: Arc::new(RandomSelector::new(pick_delay)),
            recommender,
            notices,
        }
    }

    pub async fn join(&self, raw_id: &str) -> CoreResult<GroupId> {
        let result = self.session.join(raw_id).await;
        self.reset_after_join(&result);
        result
    }

    pub async fn create(&self) -> CoreResult<GroupId> {
        let result = self.session.create().await;
        self.reset_after_join(&result);
        result
    }

    /// Any join past validation has torn down the old board
    fn reset_after_join(&self, result: &CoreResult<GroupId>) {
        if !matches!(result, Err(CoreError::Validation(_))) {
            self.picker.reset();
        }
    }

    pub async fn leave(&self) {
        self.session.leave().await;
        self.picker.reset();
    }

    pub async fn clear(&self) -> CoreResult<()> {
        self.session.clear().await?;
        self.picker.reset();
        Ok(())
    }

    /// Fetch a new candidate set; any highlighted winner belongs to the old one
    pub async fn recommend(&self) -> CoreResult<Recommendations> {
        let recommendations = self
            .session
            .generate_recommendations(self.recommender.as_ref())
            .await?;
        self.picker.reset();
        Ok(recommendations)
    }

    /// Random pick over whatever is on the board right now
    pub async fn random_pick(&self) -> CoreResult<PickOutcome> {
        let entries = self.session.board().entries().await;
        Ok(self.picker.pick(&entries).await?)
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }
}
