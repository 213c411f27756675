//! # LIVRIA Net
//!
//! Request/response model and network access for the LIVRIA offline worker.
//!
//! ## Design Goals
//!
//! 1. **Snapshot responses**: bodies are fully buffered so a response can be
//!    returned to the page and written to the cache from the same value
//! 2. **Response typing**: every response carries its `basic`/`cors`/...
//!    type, which decides whether the worker may cache it
//! 3. **Pluggable fetching**: the worker only sees the [`Fetcher`] trait

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;
use url::Url;

pub mod fetcher;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use fetcher::{HttpFetcher, LoaderConfig};
#[cfg(any(test, feature = "mock"))]
pub use mock::MockFetcher;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as seen by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document load.
    Navigate,
    /// Same-origin only.
    SameOrigin,
    /// Opaque cross-origin.
    NoCors,
    /// CORS-checked.
    #[default]
    Cors,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::default(),
            timeout: None,
        }
    }

    /// Create a navigation (full page load) request.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).mode(RequestMode::Navigate)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether this is a top-level navigation.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// URL with the fragment removed, as used for cache keys.
    pub fn key_url(&self) -> Url {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url
    }
}

/// Response type, mirroring the fetch standard's `Response.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Same-origin response.
    #[default]
    Basic,
    /// Cross-origin response that passed CORS.
    Cors,
    /// Cross-origin response with hidden status and body.
    Opaque,
    /// Redirect captured with `redirect: manual`.
    OpaqueRedirect,
    /// Network error placeholder.
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Basic => "basic",
            ResponseType::Cors => "cors",
            ResponseType::Opaque => "opaque",
            ResponseType::OpaqueRedirect => "opaqueredirect",
            ResponseType::Error => "error",
        }
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Option<Url>,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    pub redirected: bool,
    pub body: Bytes,
}

impl Response {
    /// Create a same-origin response.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            headers: HeaderMap::new(),
            response_type: ResponseType::Basic,
            redirected: false,
            body: body.into(),
        }
    }

    /// Create a 200 response with a content type.
    pub fn ok_with(content_type: &'static str, body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body).header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static(content_type),
        )
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Set the final URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if the status is 2xx.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Reason phrase for the status.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    /// Body as (lossy) UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Something that can perform a network fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a request. Non-2xx statuses are returned as `Ok`; only
    /// transport failures are errors.
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}
