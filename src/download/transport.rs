//! HTTP transport seam.
//!
//! The queue never talks to `reqwest` directly: it hands a [`TransportRequest`]
//! to a [`Transport`] and gets back status, headers and a chunk stream. Redirects
//! and content decoding are left to the caller so that byte offsets always refer
//! to the representation stored on disk.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{AsHeaderName, HeaderMap};
use reqwest::{Client, Proxy, StatusCode};
use thiserror::Error;
use tracing::{debug, instrument, trace};
use url::Url;

use super::constants::{CONNECT_TIMEOUT, DEFAULT_PROXY_PORT};
use super::entry::Method;
use crate::auth::CookieJar;

/// Response body as a stream of chunks.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Errors raised by a [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request or the body stream failed at the network level.
    #[error("request to {url} failed: {source}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    /// A proxy specification could not be parsed.
    #[error("invalid proxy '{value}': {reason}")]
    InvalidProxy {
        /// The rejected value.
        value: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The request carried [`Method::None`].
    #[error("no request method set for {url}")]
    NoMethod {
        /// The URL of the request.
        url: String,
    },
}

impl TransportError {
    /// Creates a network error from any error source.
    pub fn network(
        url: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Network {
            url: url.into(),
            source: source.into(),
        }
    }
}

/// A fully shaped request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Final URL including query parameters.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body for POST.
    pub body: Option<Bytes>,
}

/// Response head plus a body stream.
pub struct TransportResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// URL that produced the response.
    pub url: Url,
    /// Body chunks; empty for HEAD.
    pub body: BodyStream,
}

impl TransportResponse {
    /// Builds a response whose body is already in memory.
    #[must_use]
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, url: Url, body: Bytes) -> Self {
        let body: BodyStream = if body.is_empty() {
            stream::empty().boxed()
        } else {
            stream::once(async move { Ok(body) }).boxed()
        };
        Self {
            status,
            headers,
            url,
            body,
        }
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Returns a header value from `headers` as a string.
pub(crate) fn header_str<K: AsHeaderName>(headers: &HeaderMap, name: K) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Issues one HTTP request.
///
/// Implementations must not follow redirects and must not decode
/// `Content-Encoding`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns once response headers are available.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// HTTP proxy address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAddr {
    /// Proxy host name or address.
    pub host: String,
    /// Proxy port.
    pub port: u16,
}

impl ProxyAddr {
    /// Parses `host:port`; the port defaults to 80 when omitted.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidProxy`] for an empty host or a bad port.
    pub fn parse(value: &str) -> Result<Self, TransportError> {
        let trimmed = value.trim();
        let invalid = |reason: &str| TransportError::InvalidProxy {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = match trimmed.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| invalid("port must be a number between 0 and 65535"))?;
                (host, port)
            }
            None => (trimmed, DEFAULT_PROXY_PORT),
        };
        if host.is_empty() {
            return Err(invalid("host is empty"));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Proxy URL understood by the HTTP client.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Settings for [`ReqwestTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Optional HTTP proxy for every request.
    pub proxy: Option<ProxyAddr>,
    /// Cookie jar shared with the caller.
    pub cookie_jar: Option<CookieJar>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            proxy: None,
            cookie_jar: None,
        }
    }
}

/// [`Transport`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Build`] when the client or the proxy is rejected.
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::none());
        if let Some(proxy) = &config.proxy {
            debug!(host = %proxy.host, port = proxy.port, "using HTTP proxy");
            builder = builder.proxy(Proxy::all(proxy.url()).map_err(TransportError::Build)?);
        }
        if let Some(jar) = &config.cookie_jar {
            builder = builder.cookie_provider(jar.store());
        }
        let client = builder.build().map_err(TransportError::Build)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::None => {
                return Err(TransportError::NoMethod {
                    url: request.url.to_string(),
                });
            }
        };
        trace!(headers = ?request.headers, "request headers");

        let url = request.url.to_string();
        let mut builder = self
            .client
            .request(method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::network(url.clone(), e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let final_url = response.url().clone();
        debug!(status = status.as_u16(), "response received");
        trace!(headers = ?headers, "response headers");

        let body = response
            .bytes_stream()
            .map_err(move |e| TransportError::network(url.clone(), e))
            .boxed();

        Ok(TransportResponse {
            status,
            headers,
            url: final_url,
            body,
        })
    }
}
