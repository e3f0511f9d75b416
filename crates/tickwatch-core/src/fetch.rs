//! Fetch adapter contract and the HTTP field-map adapter.
//!
//! A fetch adapter turns an instrument locator into a [`RawFieldMap`]. The
//! engine never retries inside a cycle; failures are classified here so the
//! refresh report can say why an instrument was skipped.
//!
//! | Kind | Code | Typical cause |
//! |------|------|---------------|
//! | [`FetchErrorKind::Unavailable`] | `fetch.unavailable` | network error, 5xx, open circuit |
//! | [`FetchErrorKind::NotFound`] | `fetch.not_found` | unknown locator (404) |
//! | [`FetchErrorKind::RateLimited`] | `fetch.rate_limited` | upstream throttling (429) |
//! | [`FetchErrorKind::Timeout`] | `fetch.timeout` | fetch exceeded its budget |
//! | [`FetchErrorKind::Malformed`] | `fetch.malformed` | body is not a field map |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::circuit_breaker::CircuitBreaker;
use crate::fields::{normalize_labels, RawFieldMap};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};

/// Boxed future returned by [`FetchAdapter::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<RawFieldMap, FetchError>> + Send + 'a>>;

/// Adapter-level failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Unavailable,
    NotFound,
    RateLimited,
    Timeout,
    Malformed,
}

/// Structured fetch failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    kind: FetchErrorKind,
    message: String,
}

impl FetchError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unavailable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NotFound, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::RateLimited, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Malformed, message)
    }

    fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether a later cycle may succeed without operator action.
    pub const fn retryable(&self) -> bool {
        !matches!(self.kind, FetchErrorKind::NotFound | FetchErrorKind::Malformed)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            FetchErrorKind::Unavailable => "fetch.unavailable",
            FetchErrorKind::NotFound => "fetch.not_found",
            FetchErrorKind::RateLimited => "fetch.rate_limited",
            FetchErrorKind::Timeout => "fetch.timeout",
            FetchErrorKind::Malformed => "fetch.malformed",
        }
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for FetchError {}

/// Source of raw instrument fields.
pub trait FetchAdapter: Send + Sync {
    fn fetch<'a>(&'a self, locator: &'a str) -> FetchFuture<'a>;
}

/// Fetches field maps from an HTTP endpoint returning a flat JSON object,
/// e.g. a scraping sidecar serving `GET {base_url}/{locator}`.
pub struct HttpFetchAdapter {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    auth: HttpAuth,
    timeout_ms: u64,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl HttpFetchAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            auth: HttpAuth::None,
            timeout_ms: 20_000,
            circuit_breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        self.circuit_breaker.as_ref()
    }

    fn url_for(&self, locator: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(locator))
    }

    async fn fetch_fields(&self, locator: &str) -> Result<RawFieldMap, FetchError> {
        let request = HttpRequest::get(self.url_for(locator))
            .with_header("accept", "application/json")
            .with_auth(&self.auth)
            .with_timeout_ms(self.timeout_ms);

        let response = self.http_client.execute(request).await.map_err(|error| {
            if error.timed_out() {
                FetchError::timeout(error.message())
            } else {
                FetchError::unavailable(error.message())
            }
        })?;

        match response.status {
            404 => {
                return Err(FetchError::not_found(format!(
                    "no instrument page for locator '{locator}'"
                )))
            }
            429 => {
                return Err(FetchError::rate_limited(format!(
                    "upstream throttled locator '{locator}'"
                )))
            }
            _ if !response.is_success() => {
                return Err(FetchError::unavailable(format!(
                    "upstream returned HTTP {} for locator '{locator}'",
                    response.status
                )))
            }
            _ => {}
        }

        parse_field_map(&response.body)
    }
}

impl FetchAdapter for HttpFetchAdapter {
    fn fetch<'a>(&'a self, locator: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            if !self.circuit_breaker.allow_request() {
                return Err(FetchError::unavailable(
                    "circuit open after repeated upstream failures",
                ));
            }

            let outcome = PendingOutcome::new(&self.circuit_breaker);
            let result = self.fetch_fields(locator).await;
            match &result {
                Ok(_) => outcome.success(),
                // A missing page says nothing about upstream health.
                Err(error) if error.kind() == FetchErrorKind::NotFound => outcome.success(),
                Err(_) => outcome.failure(),
            }
            result
        })
    }
}

/// Reports a fetch to the circuit breaker exactly once. A fetch dropped
/// before it finished (e.g. by a caller's timeout) counts as a failure.
struct PendingOutcome<'a> {
    breaker: &'a CircuitBreaker,
    reported: bool,
}

impl<'a> PendingOutcome<'a> {
    fn new(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            reported: false,
        }
    }

    fn success(mut self) {
        self.reported = true;
        self.breaker.record_success();
    }

    fn failure(mut self) {
        self.reported = true;
        self.breaker.record_failure();
    }
}

impl Drop for PendingOutcome<'_> {
    fn drop(&mut self) {
        if !self.reported {
            self.breaker.record_failure();
        }
    }
}

fn parse_field_map(body: &str) -> Result<RawFieldMap, FetchError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|error| FetchError::malformed(format!("field map is not JSON: {error}")))?;
    let Value::Object(object) = value else {
        return Err(FetchError::malformed("field map must be a JSON object"));
    };

    let fields = object
        .into_iter()
        .filter_map(|(label, value)| match value {
            Value::String(text) => Some((label, text)),
            Value::Number(number) => Some((label, number.to_string())),
            _ => None,
        })
        .collect();
    Ok(normalize_labels(fields))
}
