//! HTTP transport under the metadata provider clients.
//!
//! Provider clients only build requests and interpret responses; timeouts and
//! retries for transient failures live here so every provider gets the same
//! policy.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

/// Outbound GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Absolute URL without query string.
    pub url: String,
    /// Query parameters, in order.
    pub query: Vec<(String, String)>,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Start a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Append a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Look up a query parameter.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Look up a header (case-insensitive).
    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Response with the body fully read.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// Failure below HTTP: no response was received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Request exceeded its timeout.
    #[error("Request timed out")]
    Timeout,

    /// DNS or TCP/TLS connection failure.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Anything else (body read, invalid URL, ...).
    #[error("{0}")]
    Other(String),
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Statuses worth retrying: rate limiting and server errors.
    pub fn is_retryable_status(status: u16) -> bool {
        status == 429 || status >= 500
    }
}

/// Something that can execute a GET request.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Execute the request and read the whole body.
    ///
    /// Non-2xx statuses are returned as responses, not errors.
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport with per-request timeout and retries.
pub struct ReqwestTransport {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl ReqwestTransport {
    /// Build a transport with the given request timeout and retry policy.
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, retry })
    }

    async fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.get(&request.url).query(&request.query);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            tracing::debug!(url = %request.url, attempt, max_attempts, "Sending provider request");

            let outcome = self.send_once(&request).await;
            let retryable = match &outcome {
                Ok(response) => RetryPolicy::is_retryable_status(response.status),
                Err(_) => true,
            };

            if !retryable || attempt >= max_attempts {
                return outcome;
            }

            let delay = self.retry.delay_for(attempt);
            match &outcome {
                Ok(response) => tracing::warn!(
                    url = %request.url,
                    status = response.status,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retryable provider status"
                ),
                Err(e) => tracing::warn!(
                    url = %request.url,
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Provider request failed"
                ),
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Responder = dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync;

    /// Transport that answers from a closure and records every request.
    pub(crate) struct MockTransport {
        responder: Box<Responder>,
        calls: AtomicUsize,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl MockTransport {
        pub(crate) fn with<F>(responder: F) -> Self
        where
            F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
        {
            Self {
                responder: Box::new(responder),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn json(status: u16, body: serde_json::Value) -> Self {
            let bytes = body.to_string().into_bytes();
            Self::with(move |_| {
                Ok(HttpResponse {
                    status,
                    body: bytes.clone(),
                })
            })
        }

        pub(crate) fn failing(error: TransportError) -> Self {
            Self::with(move |_| Err(error.clone()))
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn last_request(&self) -> Option<HttpRequest> {
            self.requests.lock().last().cloned()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = (self.responder)(&request);
            self.requests.lock().push(request);
            outcome
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::get};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Local server answering with `statuses` in turn (the last one repeats).
    /// Returns its URL and a hit counter.
    async fn scripted_server(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let statuses = Arc::new(statuses);
        let counter = hits.clone();
        let app = Router::new().route(
            "/",
            get(move || {
                let counter = counter.clone();
                let statuses = statuses.clone();
                async move {
                    let hit = counter.fetch_add(1, Ordering::SeqCst);
                    let code = statuses[hit.min(statuses.len() - 1)];
                    StatusCode::from_u16(code).unwrap()
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/", addr), hits)
    }

    fn fast_retry(max_attempts: u32) -> ReqwestTransport {
        ReqwestTransport::new(
            Duration::from_secs(5),
            RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn server_errors_retried_until_limit() {
        let (url, hits) = scripted_server(vec![503]).await;
        let response = fast_retry(3).get(HttpRequest::get(url)).await.unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_not_retried() {
        let (url, hits) = scripted_server(vec![403]).await;
        let response = fast_retry(3).get(HttpRequest::get(url)).await.unwrap();

        assert_eq!(response.status, 403);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let (url, hits) = scripted_server(vec![503, 200]).await;
        let response = fast_retry(3).get(HttpRequest::get(url)).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let (url, hits) = scripted_server(vec![429, 200]).await;
        let response = fast_retry(3).get(HttpRequest::get(url)).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn single_attempt_policy_never_retries() {
        let (url, hits) = scripted_server(vec![503, 200]).await;
        let transport = ReqwestTransport::new(Duration::from_secs(5), RetryPolicy::none()).unwrap();
        let response = transport.get(HttpRequest::get(url)).await.unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(10), Duration::from_millis(350));
    }

    #[test]
    fn retryable_statuses() {
        assert!(RetryPolicy::is_retryable_status(429));
        assert!(RetryPolicy::is_retryable_status(503));
        assert!(!RetryPolicy::is_retryable_status(400));
        assert!(!RetryPolicy::is_retryable_status(403));
        assert!(!RetryPolicy::is_retryable_status(200));
    }

    #[test]
    fn request_builder_keeps_order() {
        let request = HttpRequest::get("https://example.test/volumes")
            .query("q", "dune")
            .query("maxResults", 20)
            .header("Referer", "https://bookarr.localhost");

        assert_eq!(request.query_value("q"), Some("dune"));
        assert_eq!(request.query_value("maxResults"), Some("20"));
        assert_eq!(request.header_value("referer"), Some("https://bookarr.localhost"));
        assert_eq!(request.query[0].0, "q");
    }

    #[tokio::test]
    async fn retry_stops_on_unreachable_host() {
        // Port 9 on localhost is closed; every attempt fails at connect time.
        let transport = ReqwestTransport::new(
            Duration::from_millis(500),
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        )
        .unwrap();

        let result = transport.get(HttpRequest::get("http://127.0.0.1:9/")).await;
        assert!(result.is_err());
    }
}
