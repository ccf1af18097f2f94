//! HTTP client used by scenarios.
//!
//! Every request made through [`HttpClient::send`] is timed and recorded under its label for the
//! end-of-test summary. Any HTTP status, including 4xx and 5xx, comes back as a
//! [`ResponseRecord`]; only transport-level failures are a [`NetworkError`].
use crate::measurement::RequestStats;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
pub use reqwest::Method;
use stampede_core::{parse_base_url, ConfigurationError, LoadTestConfig, DEFAULT_REQUEST_TIMEOUT};
use std::borrow::Cow;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// Transport-level request failure.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("failed to connect to {url}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid request to {url}")]
    InvalidRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl NetworkError {
    fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        let url = url.to_string();
        if source.is_timeout() {
            NetworkError::Timeout { url }
        } else if source.is_connect() {
            NetworkError::Connect { url, source }
        } else if source.is_builder() {
            NetworkError::InvalidRequest { url, source }
        } else {
            NetworkError::Transport { url, source }
        }
    }
}

/// A single request to make. Built fresh for every call.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, Option<String>)>,
    body: Option<Vec<u8>>,
    label: Option<String>,
}

impl RequestSpec {
    /// `url` is either absolute or a path resolved against the client's base URL.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: vec![],
            query: vec![],
            body: None,
            label: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Appends a query parameter that is always present.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), Some(value.into())));
        self
    }

    /// Appends a query parameter only when `value` is `Some`.
    ///
    /// `Some("")` is sent as `key=`; `None` leaves the key out entirely.
    pub fn optional_param(mut self, key: impl Into<String>, value: Option<&str>) -> Self {
        self.query.push((key.into(), value.map(str::to_string)));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Groups this request's latency under `label` instead of `METHOD /path`.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Resolves the full URL, query string included.
    pub fn resolve_url(&self, base: Option<&Url>) -> Result<String, NetworkError> {
        let target = self.target(base)?;
        Ok(self.with_query(&target))
    }

    fn target(&self, base: Option<&Url>) -> Result<Url, NetworkError> {
        let invalid = |reason: String| NetworkError::InvalidUrl {
            url: self.url.clone(),
            reason,
        };

        match Url::parse(&self.url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match base {
                Some(base) => base.join(&self.url).map_err(|e| invalid(e.to_string())),
                None => Err(invalid("relative url without a base url".to_string())),
            },
            Err(e) => Err(invalid(e.to_string())),
        }
    }

    fn with_query(&self, target: &Url) -> String {
        let pairs: Vec<String> = self
            .query
            .iter()
            .filter_map(|(key, value)| {
                value.as_ref().map(|value| {
                    format!(
                        "{}={}",
                        urlencoding::encode(key),
                        urlencoding::encode(value)
                    )
                })
            })
            .collect();

        if pairs.is_empty() {
            return target.to_string();
        }

        let joined = match target.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{}", pairs.join("&")),
            _ => pairs.join("&"),
        };

        // `set_query` keeps the query ahead of any `#fragment`.
        let mut url = target.clone();
        url.set_query(Some(&joined));
        url.to_string()
    }

    fn label_for(&self, target: &Url) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => format!("{} {}", self.method, target.path()),
        }
    }
}

/// Metadata captured from a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct ResponseRecord {
    pub label: String,
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
    pub started: Instant,
    pub finished: Instant,
}

impl ResponseRecord {
    pub fn latency(&self) -> Duration {
        self.finished.duration_since(self.started)
    }

    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Shared HTTP client. Cheap to clone; clones share connections and statistics.
#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: Option<Url>,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    stats: RequestStats,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    pub(crate) fn from_config(config: &LoadTestConfig) -> Result<Self, ConfigurationError> {
        let mut builder = HttpClient::builder().timeout(config.timeout);
        if let Some(base_url) = &config.base_url {
            builder = builder.base_url(base_url);
        }
        if let Some(max_rps) = config.max_rps {
            builder = builder.max_rps(max_rps);
        }
        for (name, value) in &config.headers {
            builder = builder.header(name, value);
        }
        builder.build()
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Sends `req`, waiting on the request-rate cap first if one is configured.
    pub async fn send(&self, req: RequestSpec) -> Result<ResponseRecord, NetworkError> {
        let target = req.target(self.base_url.as_ref()).map_err(|e| {
            self.stats.record_network_error();
            e
        })?;
        let url = req.with_query(&target);
        let label = req.label_for(&target);

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let mut request = self.inner.request(req.method, &url);
        for (name, value) in &req.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = req.body {
            request = request.body(body);
        }

        let started = Instant::now();
        let result = match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                response.bytes().await.map(|body| (status, body.to_vec()))
            }
            Err(e) => Err(e),
        };
        let finished = Instant::now();

        match result {
            Ok((status, body)) => {
                let record = ResponseRecord {
                    label,
                    url,
                    status,
                    body,
                    started,
                    finished,
                };
                trace!(
                    "{} -> {} in {:?}",
                    record.label,
                    record.status,
                    record.latency()
                );
                self.stats.record(&record.label, record.status, record.latency());

                #[cfg(feature = "metrics")]
                metrics::histogram!("stampede_http_req_duration", "label" => record.label.clone())
                    .record(record.latency().as_secs_f64());

                Ok(record)
            }
            Err(e) => {
                let err = NetworkError::from_reqwest(&url, e);
                debug!("{label}: {err}");
                self.stats.record_network_error();

                #[cfg(feature = "metrics")]
                metrics::counter!("stampede_http_req_failed", "label" => label).increment(1);

                Err(err)
            }
        }
    }

    /// Shorthand for `send(RequestSpec::get(url))`.
    pub async fn get(&self, url: &str) -> Result<ResponseRecord, NetworkError> {
        self.send(RequestSpec::get(url)).await
    }

    pub(crate) fn stats(&self) -> &RequestStats {
        &self.stats
    }
}

#[derive(Debug)]
pub struct HttpClientBuilder {
    base_url: Option<String>,
    headers: Vec<(String, String)>,
    timeout: Duration,
    max_rps: Option<NonZeroU32>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            base_url: None,
            headers: vec![],
            timeout: DEFAULT_REQUEST_TIMEOUT,
            max_rps: None,
        }
    }
}

impl HttpClientBuilder {
    pub fn base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.to_string());
        self
    }

    /// Header sent with every request.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Caps requests per second across every clone of the client.
    pub fn max_rps(mut self, max_rps: NonZeroU32) -> Self {
        self.max_rps = Some(max_rps);
        self
    }

    pub fn build(self) -> Result<HttpClient, ConfigurationError> {
        let base_url = self.base_url.as_deref().map(parse_base_url).transpose()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let invalid = |reason: String| ConfigurationError::InvalidHeader {
                name: name.clone(),
                reason,
            };
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            headers.append(header_name, header_value);
        }

        let inner = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(self.timeout)
            .build()
            .map_err(|e| ConfigurationError::HttpClient(e.to_string()))?;

        let limiter = self.max_rps.map(|max_rps| {
            Arc::new(RateLimiter::direct(
                Quota::per_second(max_rps).allow_burst(NonZeroU32::MIN),
            ))
        });

        Ok(HttpClient {
            inner,
            base_url,
            limiter,
            stats: RequestStats::default(),
        })
    }
}
