//! Raw request primitive over `reqwest`.
//!
//! [`ApiClient::send`] is the single place that touches the network: it builds
//! the URL from the configured base, applies the retry policy, feeds the error
//! budget and honours cancellation. It returns the raw status, headers and
//! body for every response; interpreting statuses is the caller's business.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use super::budget::ErrorBudget;
use super::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_BASE_URL, DEFAULT_ERROR_BUDGET_FLOOR, DEFAULT_MAX_ATTEMPTS,
    READ_TIMEOUT_SECS,
};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error, classify_status};
use super::FetchError;

/// Default User-Agent (identifies the tool to the remote API operators).
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("ingestor/{version} (telemetry-ingest)")
}

/// Construction-time settings for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, e.g. `https://esi.evetech.net/latest`.
    pub base_url: String,
    /// User-Agent sent on every request.
    pub user_agent: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Per-read timeout.
    pub read_timeout: Duration,
    /// Error budget floor for [`ErrorBudget`].
    pub error_budget_floor: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: default_user_agent(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            error_budget_floor: DEFAULT_ERROR_BUDGET_FLOOR,
        }
    }
}

/// One outbound request.
///
/// Defaults: `GET`, no query, no headers, no body, three attempts, no retry
/// on 5xx. `path` is required; an empty path is rejected at send time with
/// [`FetchError::InvalidRequest`].
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path below the base URL, starting with `/`.
    pub path: String,
    /// Query pairs appended in order.
    pub query: Vec<(String, String)>,
    /// Extra request headers.
    pub headers: HeaderMap,
    /// Optional JSON body.
    pub body: Option<serde_json::Value>,
    /// Attempts including the first.
    pub max_attempts: u32,
    /// Whether 5xx responses are retried.
    pub retry_on_server_error: bool,
}

impl Default for ApiRequest {
    fn default() -> Self {
        Self {
            method: Method::GET,
            path: String::new(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_on_server_error: false,
        }
    }
}

impl ApiRequest {
    /// A `GET` for `path`.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// A `HEAD` for `path`.
    #[must_use]
    pub fn head(path: impl Into<String>) -> Self {
        Self {
            method: Method::HEAD,
            path: path.into(),
            ..Self::default()
        }
    }

    /// A `POST` of `body` as JSON to `path`.
    #[must_use]
    pub fn post_json(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
            ..Self::default()
        }
    }

    /// Appends a query pair.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Adds a request header. Invalid values are reported at send time.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the attempt count and 5xx retry flag.
    #[must_use]
    pub fn with_retries(mut self, max_attempts: u32, retry_on_server_error: bool) -> Self {
        self.max_attempts = max_attempts;
        self.retry_on_server_error = retry_on_server_error;
        self
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_on_server_error)
    }
}

/// Raw response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw body bytes (empty for `HEAD` and 304).
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// True for 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True for 304.
    #[must_use]
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    /// Returns a header as a trimmed string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Decode`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|e| FetchError::decode(path, e))
    }
}

/// Shared HTTP client for the remote API.
///
/// Created once and reused; cloning is cheap and shares the connection pool
/// and the error budget.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    budget: Arc<ErrorBudget>,
}

impl ApiClient {
    /// Builds a client from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidRequest`] if the base URL does not parse or
    /// the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, FetchError> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|e| {
            FetchError::invalid_request(format!("invalid base URL {}: {e}", config.base_url))
        })?;

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .gzip(true)
            .build()
            .map_err(|e| FetchError::invalid_request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            budget: Arc::new(ErrorBudget::new(config.error_budget_floor)),
        })
    }

    /// Returns the shared error budget tracker.
    #[must_use]
    pub fn budget(&self) -> &Arc<ErrorBudget> {
        &self.budget
    }

    /// Returns the configured base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds the absolute URL for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidRequest`] for an empty or unparsable path.
    pub fn url_for(&self, request: &ApiRequest) -> Result<Url, FetchError> {
        if request.path.is_empty() {
            return Err(FetchError::invalid_request("request path is required"));
        }
        if !request.path.starts_with('/') {
            return Err(FetchError::invalid_request(format!(
                "request path must start with '/': {}",
                request.path
            )));
        }

        let base = self.base_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}{}", request.path))
            .map_err(|e| FetchError::invalid_request(format!("invalid path {}: {e}", request.path)))?;

        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Sends `request`, retrying per its policy.
    ///
    /// Returns the final response whatever its status. Transport failures that
    /// exhaust the attempt budget surface as [`FetchError::Transport`] or
    /// [`FetchError::Timeout`].
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidRequest`] for malformed requests,
    /// [`FetchError::Cancelled`] when `cancel` fires, or the last transport error.
    #[instrument(skip(self, request, cancel), fields(method = %request.method, path = %request.path))]
    pub async fn send(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, FetchError> {
        let url = self.url_for(request)?;
        let policy = request.policy();
        let mut attempt = 1_u32;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            self.budget.throttle(cancel).await?;

            let outcome = tokio::select! {
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                outcome = self.send_once(&url, request) => outcome,
            };

            let failure = match &outcome {
                Ok(response) => {
                    self.budget.observe(&response.headers).await;
                    classify_status(response.status)
                }
                Err(error) => classify_error(error),
            };

            let should_loop = match &outcome {
                Ok(response) if response.status < 500 => false,
                _ => failure != FailureType::Permanent,
            };
            if !should_loop {
                return outcome;
            }

            match policy.should_retry(failure, attempt) {
                RetryDecision::Retry { attempt: next } => {
                    debug!(attempt = next, "retrying request");
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    if let Err(error) = &outcome {
                        warn!(error = %error, reason, "giving up on request");
                    }
                    return outcome;
                }
            }
        }
    }

    async fn send_once(&self, url: &Url, request: &ApiRequest) -> Result<ApiResponse, FetchError> {
        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::transport(&request.path, e))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::transport(&request.path, e))?
            .to_vec();

        debug!(status, bytes = body.len(), "response received");
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
