//! Firebase Realtime Database over its REST and streaming API.

use super::sse::{SseDecoder, SseEvent};
use super::*;
use futures::StreamExt;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Matches the retry budget of the official client SDKs
const MAX_TRANSACTION_ATTEMPTS: u32 = 25;

#[derive(Clone)]
struct Endpoint {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    timeout: Duration,
}

impl Endpoint {
    fn url(&self, path: &StorePath) -> String {
        format!("{}/{}.json", self.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &StorePath) -> RequestBuilder {
        self.stream_request(method, path).timeout(self.timeout)
    }

    /// Like `request`, without a deadline (event streams stay open)
    fn stream_request(&self, method: Method, path: &StorePath) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.auth_token {
            Some(token) => builder.query(&[("auth", token)]),
            None => builder,
        }
    }

    async fn fetch(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(network_error)?;
        let value: Value = check_status(path, response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Unexpected(format!("invalid JSON at {}: {}", path, e)))?;
        Ok(non_empty(value))
    }
}

fn network_error(e: reqwest::Error) -> StoreError {
    StoreError::Network(e.to_string())
}

fn non_empty(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(ref map) if map.is_empty() => None,
        other => Some(other),
    }
}

async fn check_status(path: &StorePath, response: Response) -> StoreResult<Response> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(StoreError::PermissionDenied(path.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::Unexpected(format!(
            "{} returned {}: {}",
            path, status, body
        )));
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    #[serde(default)]
    data: Value,
}

/// A root-level `put` carries the complete value; anything else needs a re-read
fn full_value_from(event: &SseEvent) -> Option<Option<Value>> {
    if event.event != "put" {
        return None;
    }
    let payload: StreamPayload = serde_json::from_str(&event.data).ok()?;
    (payload.path == "/").then(|| non_empty(payload.data))
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

/// Realtime store backed by a Firebase Realtime Database instance
pub struct FirebaseStore {
    endpoint: Endpoint,
    next_handle: AtomicU64,
    streams: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl FirebaseStore {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| StoreError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: Endpoint {
                client,
                base_url: base_url.into(),
                auth_token,
                timeout,
            },
            next_handle: AtomicU64::new(1),
            streams: Mutex::new(HashMap::new()),
        })
    }
}

async fn run_stream(
    endpoint: Endpoint,
    path: StorePath,
    response: Response,
    tx: mpsc::UnboundedSender<Snapshot>,
) {
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut last: Option<Option<Value>> = None;

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx.send(Err(network_error(e)));
                return;
            }
        };

        // Only decode up to the last newline so multi-byte characters are never split
        pending.extend_from_slice(&bytes);
        let Some(cut) = pending.iter().rposition(|b| *b == b'\n') else {
            continue;
        };
        let complete: Vec<u8> = pending.drain(..=cut).collect();
        let text = String::from_utf8_lossy(&complete);

        for event in decoder.push(&text) {
            match event.event.as_str() {
                "put" | "patch" => {
                    let snapshot = match full_value_from(&event) {
                        Some(value) => Ok(value),
                        None => endpoint.fetch(&path).await,
                    };
                    match snapshot {
                        Ok(value) => {
                            if last.as_ref() == Some(&value) {
                                continue;
                            }
                            last = Some(value.clone());
                            if tx.send(Ok(value)).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            return;
                        }
                    }
                }
                "keep-alive" => {}
                "cancel" | "auth_revoked" => {
                    tracing::warn!("Stream on {} ended by server: {}", path, event.event);
                    let _ = tx.send(Err(StoreError::PermissionDenied(path.to_string())));
                    return;
                }
                other => tracing::debug!("Ignoring stream event '{}' on {}", other, path),
            }
        }
    }

    let _ = tx.send(Err(StoreError::Network(format!(
        "stream on {} closed by server",
        path
    ))));
}

#[async_trait]
impl RemoteGroupStore for FirebaseStore {
    async fn subscribe(&self, path: &StorePath) -> StoreResult<Subscription> {
        let response = self
            .endpoint
            .stream_request(Method::GET, path)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status(path, response).await?;

        let (tx, updates) = mpsc::unbounded_channel();
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(run_stream(
            self.endpoint.clone(),
            path.clone(),
            response,
            tx,
        ));
        self.streams.lock().await.insert(handle, task);

        tracing::debug!("Stream {} opened on {}", handle, path);
        Ok(Subscription {
            handle: SubscriptionHandle(handle),
            updates,
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        if let Some(task) = self.streams.lock().await.remove(&handle.0) {
            task.abort();
            tracing::debug!("Stream {} closed", handle.0);
        }
    }

    async fn write(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        let response = self
            .endpoint
            .request(Method::PUT, path)
            .json(&value)
            .send()
            .await
            .map_err(network_error)?;
        check_status(path, response).await?;
        Ok(())
    }

    async fn push(&self, path: &StorePath, value: Value) -> StoreResult<String> {
        let response = self
            .endpoint
            .request(Method::POST, path)
            .json(&value)
            .send()
            .await
            .map_err(network_error)?;
        let pushed: PushResponse = check_status(path, response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Unexpected(format!("invalid push response: {}", e)))?;
        Ok(pushed.name)
    }

    async fn remove(&self, path: &StorePath) -> StoreResult<()> {
        let response = self
            .endpoint
            .request(Method::DELETE, path)
            .send()
            .await
            .map_err(network_error)?;
        check_status(path, response).await?;
        Ok(())
    }

    async fn atomic_increment(&self, path: &StorePath, delta: i64) -> StoreResult<i64> {
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let response = self
                .endpoint
                .request(Method::GET, path)
                .header("X-Firebase-ETag", "true")
                .send()
                .await
                .map_err(network_error)?;
            let response = check_status(path, response).await?;
            let etag = response
                .headers()
                .get("etag")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| StoreError::Unexpected(format!("no ETag for {}", path)))?;
            let current: Value = response
                .json()
                .await
                .map_err(|e| StoreError::Unexpected(format!("invalid JSON at {}: {}", path, e)))?;
            let current = match current {
                Value::Null => 0,
                other => other.as_i64().ok_or_else(|| {
                    StoreError::Unexpected(format!("{} does not hold an integer", path))
                })?,
            };

            let next = current.checked_add(delta).ok_or_else(|| {
                StoreError::Unexpected(format!("increment of {} overflows", path))
            })?;
            let response = self
                .endpoint
                .request(Method::PUT, path)
                .header("if-match", etag)
                .json(&next)
                .send()
                .await
                .map_err(network_error)?;
            if response.status() == StatusCode::PRECONDITION_FAILED {
                tracing::debug!("Increment of {} lost a race (attempt {})", path, attempt);
                continue;
            }
            check_status(path, response).await?;
            return Ok(next);
        }

        Err(StoreError::Unexpected(format!(
            "increment of {} did not commit after {} attempts",
            path, MAX_TRANSACTION_ATTEMPTS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> FirebaseStore {
        FirebaseStore::new(server.uri(), None, Duration::from_secs(5)).unwrap()
    }

    fn counter() -> StorePath {
        StorePath::new("groups/FF-1/votes/dosa")
    }

    async fn next(subscription: &mut Subscription) -> Snapshot {
        tokio::time::timeout(Duration::from_secs(2), subscription.updates.recv())
            .await
            .expect("snapshot should arrive")
            .expect("channel open")
    }

    async fn mount_counter_read(server: &MockServer, value: Value) {
        Mock::given(method("GET"))
            .and(path("/groups/FF-1/votes/dosa.json"))
            .and(header("X-Firebase-ETag", "true"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "etag-4")
                    .set_body_json(value),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_increment_retries_lost_races() {
        let server = MockServer::start().await;
        mount_counter_read(&server, json!(4)).await;
        Mock::given(method("PUT"))
            .and(path("/groups/FF-1/votes/dosa.json"))
            .respond_with(ResponseTemplate::new(412))
            .up_to_n_times(2)
            .with_priority(1)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/groups/FF-1/votes/dosa.json"))
            .and(header("if-match", "etag-4"))
            .and(body_json(json!(5)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(5)))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(store(&server).atomic_increment(&counter(), 1).await, Ok(5));
    }

    #[tokio::test]
    async fn test_increment_starts_missing_counter_at_zero() {
        let server = MockServer::start().await;
        mount_counter_read(&server, Value::Null).await;
        Mock::given(method("PUT"))
            .and(body_json(json!(1)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(1)))
            .mount(&server)
            .await;

        assert_eq!(store(&server).atomic_increment(&counter(), 1).await, Ok(1));
    }

    #[tokio::test]
    async fn test_increment_gives_up_after_attempt_budget() {
        let server = MockServer::start().await;
        mount_counter_read(&server, json!(4)).await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(412))
            .expect(u64::from(MAX_TRANSACTION_ATTEMPTS))
            .mount(&server)
            .await;

        let result = store(&server).atomic_increment(&counter(), 1).await;
        assert!(matches!(
            result,
            Err(StoreError::Unexpected(ref m)) if m.contains("did not commit")
        ));
    }

    #[tokio::test]
    async fn test_increment_requires_etag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(4)))
            .mount(&server)
            .await;

        let result = store(&server).atomic_increment(&counter(), 1).await;
        assert!(matches!(result, Err(StoreError::Unexpected(ref m)) if m.contains("no ETag")));
    }

    #[tokio::test]
    async fn test_increment_overflow_is_not_written() {
        let server = MockServer::start().await;
        mount_counter_read(&server, json!(i64::MAX)).await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = store(&server).atomic_increment(&counter(), 1).await;
        assert!(matches!(result, Err(StoreError::Unexpected(ref m)) if m.contains("overflows")));
    }

    #[tokio::test]
    async fn test_push_returns_generated_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/groups/FF-1/members.json"))
            .and(body_json(json!({"name": "Asha"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "-Nabc"})))
            .mount(&server)
            .await;

        let key = store(&server)
            .push(&StorePath::new("groups/FF-1/members"), json!({"name": "Asha"}))
            .await;
        assert_eq!(key, Ok("-Nabc".to_string()));
    }

    #[tokio::test]
    async fn test_write_sends_auth_and_maps_denial() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(query_param("auth", "secret"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "denied"})))
            .expect(1)
            .mount(&server)
            .await;

        let store =
            FirebaseStore::new(server.uri(), Some("secret".to_string()), Duration::from_secs(5))
                .unwrap();
        let result = store.write(&StorePath::new("groups/FF-1"), json!(1)).await;
        assert_eq!(
            result,
            Err(StoreError::PermissionDenied("groups/FF-1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_server_error_is_unexpected() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let result = store(&server).remove(&StorePath::new("groups/FF-1")).await;
        assert!(matches!(result, Err(StoreError::Unexpected(ref m)) if m.contains("boom")));
    }

    #[tokio::test]
    async fn test_subscribe_streams_snapshots_until_cancel() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: put\n",
            "data: {\"path\":\"/\",\"data\":3}\n\n",
            "event: keep-alive\n",
            "data: null\n\n",
            "event: cancel\n",
            "data: null\n\n",
        );
        Mock::given(method("GET"))
            .and(path("/groups/FF-1/votes/dosa.json"))
            .and(header("Accept", "text/event-stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let store = store(&server);
        let mut subscription = store.subscribe(&counter()).await.unwrap();

        assert_eq!(next(&mut subscription).await, Ok(Some(json!(3))));
        assert_eq!(
            next(&mut subscription).await,
            Err(StoreError::PermissionDenied(counter().to_string()))
        );
        store.unsubscribe(subscription.handle).await;
    }

    fn endpoint(auth: Option<&str>) -> Endpoint {
        Endpoint {
            client: reqwest::Client::new(),
            base_url: "https://dining.example.firebasedatabase.app/".to_string(),
            auth_token: auth.map(str::to_string),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_rest_url() {
        let url = endpoint(None).url(&StorePath::new("groups/FF-1/members"));
        assert_eq!(
            url,
            "https://dining.example.firebasedatabase.app/groups/FF-1/members.json"
        );
    }

    #[test]
    fn test_auth_token_is_sent_as_query() {
        let request = endpoint(Some("secret"))
            .request(Method::GET, &StorePath::new("groups"))
            .build()
            .unwrap();
        assert_eq!(request.url().query(), Some("auth=secret"));
        assert_eq!(request.timeout(), Some(&Duration::from_secs(5)));
    }

    #[test]
    fn test_root_put_carries_full_value() {
        let event = SseEvent {
            event: "put".to_string(),
            data: r#"{"path":"/","data":{"a":{"name":"A"}}}"#.to_string(),
        };
        assert_eq!(
            full_value_from(&event),
            Some(Some(serde_json::json!({"a": {"name": "A"}})))
        );

        let cleared = SseEvent {
            event: "put".to_string(),
            data: r#"{"path":"/","data":null}"#.to_string(),
        };
        assert_eq!(full_value_from(&cleared), Some(None));
    }

    #[test]
    fn test_nested_changes_require_refetch() {
        let nested = SseEvent {
            event: "put".to_string(),
            data: r#"{"path":"/b","data":{"name":"B"}}"#.to_string(),
        };
        let patch = SseEvent {
            event: "patch".to_string(),
            data: r#"{"path":"/","data":{"b":null}}"#.to_string(),
        };
        assert_eq!(full_value_from(&nested), None);
        assert_eq!(full_value_from(&patch), None);
    }
}
