use super::*;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Instant;

/// `POST /analyze` over HTTP
pub struct HttpRecommendationService {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpRecommendationService {
    pub fn new(url: String, timeout: Duration) -> Result<Self, AnalyzeError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AnalyzeError::Network(e.to_string()))?;
        Ok(Self {
            url,
            client,
            timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// Build the single error string for a non-2xx response.
///
/// A JSON body contributes its `error` field, or the status text when it has
/// none; anything else leaves just the status code.
pub fn rejection_message(status: StatusCode, body: &str) -> String {
    let mut message = format!("Backend Error {}", status.as_u16());
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        let detail = parsed
            .error
            .unwrap_or_else(|| status.canonical_reason().unwrap_or_default().to_string());
        message.push_str(" - ");
        message.push_str(&detail);
    }
    message
}

#[async_trait]
impl RecommendationService for HttpRecommendationService {
    async fn analyze(&self, members: &[Member]) -> Result<AnalyzeResponse, AnalyzeError> {
        let start = Instant::now();
        tracing::info!(
            "Requesting recommendations for {} members from {}",
            members.len(),
            self.url
        );

        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(&self.url).json(members).send(),
        )
        .await
        .map_err(|_| AnalyzeError::Timeout(self.timeout))?
        .map_err(|e| AnalyzeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = rejection_message(status, &body);
            tracing::warn!("Recommendation service rejected request: {}", message);
            return Err(AnalyzeError::Rejected(message));
        }

        let parsed: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| AnalyzeError::Parse(e.to_string()))?;

        tracing::info!(
            "Received {} restaurants in {}ms",
            parsed.top_restaurants.len(),
            start.elapsed().as_millis()
        );
        Ok(parsed)
    }
}
