//! Retrying HTTP fetcher shared by the wiki and platform clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info_span, Instrument};

/// Throttling, gateway trouble and request timeouts are worth another try.
fn retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT
    ) || status.is_server_error()
}

fn retryable_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Doubling delay between attempts, starting at `initial` and never above
/// `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub initial: Duration,
    pub ceiling: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial: Duration::from_millis(500),
            ceiling: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial: Duration::ZERO,
            ceiling: Duration::ZERO,
        }
    }

    /// Wait before retry number `retry` (0-based).
    pub fn delay(&self, retry: usize) -> Duration {
        let doublings = u32::try_from(retry).unwrap_or(u32::MAX).min(31);
        self.initial
            .saturating_mul(1 << doublings)
            .min(self.ceiling)
    }

    fn exhausted(&self, retry: usize) -> bool {
        retry >= self.max_retries
    }
}

/// Seconds form of `Retry-After`, sent by throttled platform APIs.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            global_concurrency: 8,
            per_source_concurrency: 2,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Request description that can be replayed on every retry attempt.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    url: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    form: Option<Vec<(String, String)>>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            form: None,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            ..Self::get(url)
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn form(mut self, pairs: &[(&str, &str)]) -> Self {
        self.form = Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn build(&self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let mut builder = client.request(self.method.clone(), &self.url);
        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }
        for (key, value) in &self.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(form) = &self.form {
            builder = builder.form(form);
        }
        builder
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{url} answered {status}")]
    HttpStatus { status: u16, url: String },
    #[error("not found: {url}")]
    NotFound { url: String },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }
}

/// Caps in-flight requests overall and per source. Source gates are created
/// on first use and live as long as the fetcher.
#[derive(Debug)]
struct Gates {
    global: Arc<Semaphore>,
    per_source_cap: usize,
    sources: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Gates {
    fn new(global_cap: usize, per_source_cap: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_cap.max(1))),
            per_source_cap: per_source_cap.max(1),
            sources: Mutex::new(HashMap::new()),
        }
    }

    async fn enter(&self, source_id: &str) -> [OwnedSemaphorePermit; 2] {
        let source = self
            .sources
            .lock()
            .await
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_cap)))
            .clone();
        // Neither semaphore is ever closed.
        let global = self.global.clone().acquire_owned().await.expect("global gate open");
        let source = source.acquire_owned().await.expect("source gate open");
        [global, source]
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    gates: Gates,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }

        Ok(Self {
            client: builder.build().context("building http client")?,
            gates: Gates::new(config.global_concurrency, config.per_source_concurrency),
            backoff: config.backoff,
        })
    }

    /// Sends `request`, retrying transient failures. 404 and 410 come back
    /// as [`FetchError::NotFound`] without retrying.
    pub async fn send(
        &self,
        source_id: &str,
        request: &HttpRequest,
    ) -> Result<FetchedResponse, FetchError> {
        let _permits = self.gates.enter(source_id).await;
        let span = info_span!("http_fetch", source_id, url = request.url());
        self.send_with_retries(request).instrument(span).await
    }

    async fn send_with_retries(&self, request: &HttpRequest) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0;
        loop {
            let hinted = match request.build(&self.client).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }
                    if matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE) {
                        return Err(FetchError::NotFound { url: final_url });
                    }
                    if !retryable_status(status) || self.backoff.exhausted(attempt) {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                        });
                    }
                    debug!(%status, attempt, "retrying after retryable status");
                    retry_after(resp.headers())
                }
                Err(err) => {
                    if !retryable_transport(&err) || self.backoff.exhausted(attempt) {
                        return Err(FetchError::Request(err));
                    }
                    debug!(error = %err, attempt, "retrying after transport error");
                    None
                }
            };
            let delay = hinted
                .unwrap_or_else(|| self.backoff.delay(attempt))
                .min(self.backoff.ceiling);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    pub async fn get_text(&self, source_id: &str, request: &HttpRequest) -> Result<String, FetchError> {
        Ok(self.send(source_id, request).await?.text())
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        source_id: &str,
        request: &HttpRequest,
    ) -> Result<T, FetchError> {
        let response = self.send(source_id, request).await?;
        serde_json::from_slice(&response.body).map_err(|source| FetchError::Decode {
            url: response.final_url,
            source,
        })
    }
}
