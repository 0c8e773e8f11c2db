//! The conditional-fetch protocol.
//!
//! 1. Look up the stored validator for the resource key.
//! 2. Send the request with `If-None-Match` (when there is a token) and a
//!    bearer token for member-scoped resources.
//! 3. `304`: extend the stored expiry, return no body.
//! 4. `2xx`: decode the body, extract `ETag` + `Expires`, persist (or hand
//!    back uncommitted in [`FetchMode::Deferred`]), return the body.
//! 5. Anything else: [`FetchError::Status`], stored validator untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, ETAG, EXPIRES, HeaderValue, IF_NONE_MATCH};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::{CacheValidator, ValidatorStore};
use crate::client::constants::{DEFAULT_FRESHNESS, DEFAULT_MAX_ATTEMPTS, PAGES_HEADER};
use crate::client::{ApiClient, ApiRequest, ApiResponse, FetchError, TokenSource};
use crate::endpoint::{Endpoint, EndpointParams, EndpointTable, ResolvedEndpoint};

/// When a `2xx` validator is written to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Persist as soon as the body decodes.
    Immediate,
    /// Return the validator uncommitted; the caller persists it with
    /// [`ConditionalFetcher::commit`] once its own work succeeded.
    Deferred,
}

/// Result of a conditional fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    /// The server sent a new representation.
    Fresh {
        /// Decoded body.
        value: T,
        /// Validator extracted from the response.
        validator: CacheValidator,
    },
    /// The stored representation is still current; its expiry was extended.
    NotModified {
        /// The refreshed validator (already persisted).
        validator: CacheValidator,
    },
}

impl<T> Fetched<T> {
    /// The validator in either outcome.
    #[must_use]
    pub fn validator(&self) -> &CacheValidator {
        match self {
            Self::Fresh { validator, .. } | Self::NotModified { validator } => validator,
        }
    }

    /// True for [`Fetched::NotModified`].
    #[must_use]
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::NotModified { .. })
    }
}

/// Outcome of a body-less `HEAD` probe on page 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// True when the server confirmed the stored validator.
    pub unchanged: bool,
    /// Advertised page count (1 when absent).
    pub pages: u32,
    /// `ETag` the server reported, if any.
    pub validator: Option<String>,
}

/// Parses an `Expires` header into a UTC timestamp.
#[must_use]
pub fn parse_expires(value: &str) -> Option<DateTime<Utc>> {
    httpdate::parse_http_date(value.trim())
        .ok()
        .map(DateTime::<Utc>::from)
}

fn expiry_of(response: &ApiResponse) -> DateTime<Utc> {
    response
        .header(EXPIRES.as_str())
        .and_then(parse_expires)
        .unwrap_or_else(|| {
            Utc::now()
                + chrono::Duration::from_std(DEFAULT_FRESHNESS).unwrap_or(chrono::Duration::zero())
        })
}

fn pages_of(response: &ApiResponse) -> u32 {
    response
        .header(PAGES_HEADER)
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|&p| p > 0)
        .unwrap_or(1)
}

enum RawOutcome {
    Fresh {
        response: ApiResponse,
        validator: CacheValidator,
    },
    NotModified {
        validator: CacheValidator,
    },
}

/// Conditional-fetch client shared by every ingestor and lookup service.
#[derive(Clone)]
pub struct ConditionalFetcher {
    client: ApiClient,
    endpoints: Arc<EndpointTable>,
    validators: Arc<dyn ValidatorStore>,
    tokens: Arc<dyn TokenSource>,
    max_attempts: u32,
}

impl std::fmt::Debug for ConditionalFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalFetcher")
            .field("base_url", &self.client.base_url().as_str())
            .finish_non_exhaustive()
    }
}

impl ConditionalFetcher {
    /// Creates a fetcher.
    #[must_use]
    pub fn new(
        client: ApiClient,
        endpoints: Arc<EndpointTable>,
        validators: Arc<dyn ValidatorStore>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            client,
            endpoints,
            validators,
            tokens,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Overrides the attempt count of every request.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// The endpoint table in use.
    #[must_use]
    pub fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Returns the validator that governs freshness for `endpoint`.
    ///
    /// Paginated endpoints use the latest validator across the page family.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidRequest`] for bad params or
    /// [`FetchError::Store`] if the lookup fails.
    pub async fn current_validator(
        &self,
        endpoint: Endpoint,
        params: &EndpointParams,
    ) -> Result<Option<CacheValidator>, FetchError> {
        let resolved = self.endpoints.resolve(endpoint, params)?;
        let validator = if resolved.paginated {
            self.validators.latest_with_prefix(&resolved.prefix).await?
        } else {
            self.validators.get(&resolved.cache_key).await?
        };
        Ok(validator)
    }

    /// Persists a validator returned by a [`FetchMode::Deferred`] fetch.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Store`] if the write fails.
    pub async fn commit(&self, validator: &CacheValidator) -> Result<(), FetchError> {
        self.validators.put(validator).await?;
        debug!(key = %validator.key, "validator committed");
        Ok(())
    }

    /// Conditionally fetches a single resource, persisting the validator on `2xx`.
    ///
    /// # Errors
    ///
    /// Returns any [`FetchError`]; the stored validator is only changed on
    /// `2xx` and `304`.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        params: &EndpointParams,
        cancel: &CancellationToken,
    ) -> Result<Fetched<T>, FetchError> {
        self.fetch_with_mode(endpoint, params, FetchMode::Immediate, cancel)
            .await
    }

    /// Like [`fetch`](Self::fetch) but leaves a `2xx` validator uncommitted.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn fetch_deferred<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        params: &EndpointParams,
        cancel: &CancellationToken,
    ) -> Result<Fetched<T>, FetchError> {
        self.fetch_with_mode(endpoint, params, FetchMode::Deferred, cancel)
            .await
    }

    /// Conditionally fetches a single resource in the given mode.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    #[instrument(skip(self, params, cancel), fields(endpoint = %endpoint))]
    pub async fn fetch_with_mode<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        params: &EndpointParams,
        mode: FetchMode,
        cancel: &CancellationToken,
    ) -> Result<Fetched<T>, FetchError> {
        let resolved = self.endpoints.resolve(endpoint, params)?;
        match self.fetch_raw(&resolved, cancel).await? {
            RawOutcome::NotModified { validator } => Ok(Fetched::NotModified { validator }),
            RawOutcome::Fresh {
                response,
                validator,
            } => {
                let value = response.json(&resolved.path)?;
                if mode == FetchMode::Immediate {
                    self.commit(&validator).await?;
                }
                Ok(Fetched::Fresh { value, validator })
            }
        }
    }

    /// Conditionally fetches every page of a paginated collection.
    ///
    /// Page 1 is fetched conditionally under `<prefix>:p1`; `304` means the
    /// whole family is unchanged. Otherwise pages `2..=X-Pages` are fetched
    /// unconditionally and concatenated. The page-1 validator is committed only
    /// after every page succeeded (and only in [`FetchMode::Immediate`]).
    ///
    /// # Errors
    ///
    /// Any page failure aborts the whole fetch.
    #[instrument(skip(self, params, cancel), fields(endpoint = %endpoint))]
    pub async fn fetch_all_pages<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        params: &EndpointParams,
        mode: FetchMode,
        cancel: &CancellationToken,
    ) -> Result<Fetched<Vec<T>>, FetchError> {
        let first = self.endpoints.resolve(endpoint, &params.with_page(1))?;
        let (response, validator) = match self.fetch_raw(&first, cancel).await? {
            RawOutcome::NotModified { validator } => {
                return Ok(Fetched::NotModified { validator });
            }
            RawOutcome::Fresh {
                response,
                validator,
            } => (response, validator),
        };

        let pages = pages_of(&response);
        let mut items: Vec<T> = response.json(&first.path)?;

        for page in 2..=pages {
            let resolved = self.endpoints.resolve(endpoint, &params.with_page(page))?;
            let request = self.build_request(&resolved, None).await?;
            let response = self.client.send(&request, cancel).await?;
            if !response.is_success() {
                return Err(FetchError::status(&resolved.path, response.status));
            }
            let mut page_items: Vec<T> = response.json(&resolved.path)?;
            items.append(&mut page_items);
        }

        debug!(pages, items = items.len(), "fetched all pages");
        if mode == FetchMode::Immediate {
            self.commit(&validator).await?;
        }
        Ok(Fetched::Fresh {
            value: items,
            validator,
        })
    }

    /// Fetches a collection, paginated or not, as one list.
    ///
    /// # Errors
    ///
    /// See [`fetch_all_pages`](Self::fetch_all_pages).
    pub async fn fetch_collection<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        params: &EndpointParams,
        mode: FetchMode,
        cancel: &CancellationToken,
    ) -> Result<Fetched<Vec<T>>, FetchError> {
        if self.endpoints.spec(endpoint)?.paginated {
            self.fetch_all_pages(endpoint, params, mode, cancel).await
        } else {
            self.fetch_with_mode(endpoint, params, mode, cancel).await
        }
    }

    /// Issues a body-less `HEAD` for page 1 and reports whether the stored
    /// validator is still current. Never writes to the store.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Status`] for statuses other than `2xx` / `304`.
    #[instrument(skip(self, params, cancel), fields(endpoint = %endpoint))]
    pub async fn probe(
        &self,
        endpoint: Endpoint,
        params: &EndpointParams,
        cancel: &CancellationToken,
    ) -> Result<ProbeResult, FetchError> {
        let resolved = self.endpoints.resolve(endpoint, &params.with_page(1))?;
        let stored = self.validators.get(&resolved.cache_key).await?;

        let mut request = self.build_request(&resolved, stored.as_ref()).await?;
        request.method = reqwest::Method::HEAD;
        let response = self.client.send(&request, cancel).await?;

        if !(response.is_success() || response.is_not_modified()) {
            return Err(FetchError::status(&resolved.path, response.status));
        }

        let etag = response.header(ETAG.as_str()).map(str::to_string);
        let unchanged = response.is_not_modified()
            || matches!((&stored, &etag), (Some(s), Some(e)) if s.has_token() && &s.validator == e);

        Ok(ProbeResult {
            unchanged,
            pages: pages_of(&response),
            validator: etag,
        })
    }

    /// Unconditional `GET` that neither reads nor writes validators.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Status`] for non-`2xx` responses or any transport,
    /// decode or cancellation error.
    #[instrument(skip(self, params, cancel), fields(endpoint = %endpoint))]
    pub async fn fetch_fresh<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        params: &EndpointParams,
        cancel: &CancellationToken,
    ) -> Result<T, FetchError> {
        let resolved = self.endpoints.resolve(endpoint, params)?;
        let request = self.build_request(&resolved, None).await?;
        let response = self.client.send(&request, cancel).await?;
        if !response.is_success() {
            return Err(FetchError::status(&resolved.path, response.status));
        }
        response.json(&resolved.path)
    }

    /// `POST`s a JSON body and decodes the JSON answer.
    ///
    /// # Errors
    ///
    /// See [`fetch_fresh`](Self::fetch_fresh).
    #[instrument(skip(self, params, body, cancel), fields(endpoint = %endpoint))]
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        params: &EndpointParams,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T, FetchError> {
        let resolved = self.endpoints.resolve(endpoint, params)?;
        let mut request = self.build_request(&resolved, None).await?;
        request.body = Some(
            serde_json::to_value(body)
                .map_err(|e| FetchError::invalid_request(format!("unencodable body: {e}")))?,
        );
        let response = self.client.send(&request, cancel).await?;
        if !response.is_success() {
            return Err(FetchError::status(&resolved.path, response.status));
        }
        response.json(&resolved.path)
    }

    async fn build_request(
        &self,
        resolved: &ResolvedEndpoint,
        validator: Option<&CacheValidator>,
    ) -> Result<ApiRequest, FetchError> {
        let mut request = ApiRequest {
            method: resolved.method.clone(),
            path: resolved.path.clone(),
            max_attempts: self.max_attempts,
            ..ApiRequest::default()
        };

        if let Some(page) = resolved.page {
            request = request.with_query("page", page);
        }

        if let Some(validator) = validator.filter(|v| v.has_token()) {
            let value = HeaderValue::from_str(&validator.validator).map_err(|_| {
                FetchError::invalid_request(format!("unusable validator for {}", resolved.cache_key))
            })?;
            request = request.with_header(IF_NONE_MATCH, value);
        }

        if resolved.auth {
            let member_id = resolved.member_id.ok_or_else(|| {
                FetchError::invalid_request(format!("member id required for {}", resolved.endpoint))
            })?;
            let token = self.tokens.access_token(member_id).await?;
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| FetchError::token(member_id, "token is not a valid header value"))?;
            request = request.with_header(AUTHORIZATION, value);
        }

        Ok(request)
    }

    async fn fetch_raw(
        &self,
        resolved: &ResolvedEndpoint,
        cancel: &CancellationToken,
    ) -> Result<RawOutcome, FetchError> {
        let stored = self.validators.get(&resolved.cache_key).await?;
        let request = self.build_request(resolved, stored.as_ref()).await?;
        let response = self.client.send(&request, cancel).await?;

        if response.is_not_modified() {
            let Some(previous) = stored else {
                // A 304 without a conditional header is a protocol violation.
                return Err(FetchError::status(&resolved.path, response.status));
            };
            let refreshed = CacheValidator {
                expires_at: expiry_of(&response),
                ..previous
            };
            self.validators.put(&refreshed).await?;
            info!(key = %refreshed.key, "not modified, freshness extended");
            return Ok(RawOutcome::NotModified {
                validator: refreshed,
            });
        }

        if !response.is_success() {
            return Err(FetchError::status(&resolved.path, response.status));
        }

        let validator = CacheValidator {
            key: resolved.cache_key.clone(),
            validator: response
                .header(ETAG.as_str())
                .map(str::to_string)
                .unwrap_or_default(),
            expires_at: expiry_of(&response),
        };
        debug!(key = %validator.key, status = response.status, "fresh representation received");
        Ok(RawOutcome::Fresh {
            response,
            validator,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::header::HeaderMap;

    use super::*;

    fn response_with(headers: &[(&'static str, &str)]) -> ApiResponse {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        ApiResponse {
            status: 200,
            headers: map,
            body: Vec::new(),
        }
    }

    #[test]
    fn test_parse_expires_http_date() {
        let parsed = parse_expires("Wed, 21 Oct 2037 07:28:00 GMT").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2037-10-21T07:28:00+00:00");
        assert!(parse_expires("tomorrow").is_none());
    }

    #[test]
    fn test_expiry_of_falls_back_to_default_freshness() {
        let before = Utc::now();
        let expiry = expiry_of(&response_with(&[]));
        assert!(expiry > before);
        assert!(expiry <= Utc::now() + chrono::Duration::seconds(61));
    }

    #[test]
    fn test_pages_of_defaults_to_one() {
        assert_eq!(pages_of(&response_with(&[])), 1);
        assert_eq!(pages_of(&response_with(&[("x-pages", "4")])), 4);
        assert_eq!(pages_of(&response_with(&[("x-pages", "0")])), 1);
        assert_eq!(pages_of(&response_with(&[("x-pages", "many")])), 1);
    }

    #[test]
    fn test_fetched_accessors() {
        let validator = CacheValidator::new("k", "\"v\"", Utc::now());
        let fresh: Fetched<u8> = Fetched::Fresh {
            value: 1,
            validator: validator.clone(),
        };
        let not_modified: Fetched<u8> = Fetched::NotModified {
            validator: validator.clone(),
        };
        assert!(!fresh.is_not_modified());
        assert!(not_modified.is_not_modified());
        assert_eq!(fresh.validator(), &validator);
    }
}
