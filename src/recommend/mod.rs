mod http;

use crate::types::{AnalyzeResponse, Member};
use async_trait::async_trait;
use std::time::Duration;

pub use http::{rejection_message, HttpRecommendationService};

/// Errors from the remote recommendation service
#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    /// Non-2xx response, already formatted for display
    #[error("{0}")]
    Rejected(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request failed: {0}")]
    Network(String),

    #[error("Response parsing failed: {0}")]
    Parse(String),
}

/// Opaque service that turns a group's members into restaurant candidates
#[async_trait]
pub trait RecommendationService: Send + Sync {
    /// Send the member records (without store keys) and return the proposal
    async fn analyze(&self, members: &[Member]) -> Result<AnalyzeResponse, AnalyzeError>;
}
