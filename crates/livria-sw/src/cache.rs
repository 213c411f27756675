//! Cache generations and entries.
//!
//! A generation is a named set of `url → CacheEntry` pairs. Entries are
//! replaceable snapshots; concurrent writers to the same key race and the
//! last one wins.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use livria_net::{Request, Response, ResponseType};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::{SwError, SwResult};

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Request URL (fragment stripped).
    pub url: String,

    /// Request method. Always `GET`.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in order, repeated names allowed.
    pub headers: Vec<(String, String)>,

    /// Response body.
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch), set on insertion.
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response for a request.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        Self::from_parts(&request.key_url(), response)
    }

    /// Snapshot a response for a URL.
    pub fn from_parts(url: &Url, response: &Response) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);

        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: url.to_string(),
            method: Method::GET.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.clone(),
            cached_at: 0,
        }
    }

    /// Rebuild a response from this entry. Fails if the stored status is
    /// not a valid HTTP status.
    pub fn to_response(&self) -> SwResult<Response> {
        let status = StatusCode::from_u16(self.status).map_err(|_| {
            SwError::Cache(format!("invalid stored status {} for {}", self.status, self.url))
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(n, v);
            }
        }

        Ok(Response {
            url: Url::parse(&self.url).ok(),
            status,
            headers,
            response_type: ResponseType::Basic,
            redirected: false,
            body: self.body.clone(),
        })
    }

    pub(crate) fn stamp(mut self) -> Self {
        self.cached_at = now_millis();
        self
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Durable cache storage shared by every worker event.
///
/// This is the only state that survives between events.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a generation, creating it empty if absent.
    async fn open(&self, name: &str) -> SwResult<()>;

    /// Check if a generation exists.
    async fn has(&self, name: &str) -> SwResult<bool>;

    /// Names of all generations.
    async fn keys(&self) -> SwResult<Vec<String>>;

    /// Delete a generation. Returns whether it existed.
    async fn delete(&self, name: &str) -> SwResult<bool>;

    /// Look up the entry for `url` in a generation.
    async fn match_url(&self, name: &str, url: &Url) -> SwResult<Option<CacheEntry>>;

    /// Insert or replace an entry, creating the generation if needed.
    async fn put(&self, name: &str, entry: CacheEntry) -> SwResult<()>;

    /// Insert a batch of entries. Either all become visible or none do.
    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> SwResult<()>;

    /// URLs stored in a generation.
    async fn entry_urls(&self, name: &str) -> SwResult<Vec<String>>;

    /// Look up the entry for a request. Only `GET` requests can match.
    async fn match_request(&self, name: &str, request: &Request) -> SwResult<Option<CacheEntry>> {
        if request.method != Method::GET {
            return Ok(None);
        }
        self.match_url(name, &request.key_url()).await
    }
}

// ==================== Memory Storage ====================

/// A single in-memory generation.
#[derive(Debug, Default, Clone)]
struct Generation {
    entries: HashMap<String, CacheEntry>,
}

/// In-memory cache storage.
///
/// Clones share the same underlying generations, so a storage handed to a
/// fresh worker instance sees everything the previous instance wrote.
#[derive(Debug, Default, Clone)]
pub struct MemoryCacheStorage {
    caches: Arc<RwLock<HashMap<String, Generation>>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> SwResult<()> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> SwResult<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn keys(&self) -> SwResult<Vec<String>> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> SwResult<bool> {
        let existed = self.caches.write().await.remove(name).is_some();
        debug!(cache = name, existed, "Deleted cache generation");
        Ok(existed)
    }

    async fn match_url(&self, name: &str, url: &Url) -> SwResult<Option<CacheEntry>> {
        let mut key = url.clone();
        key.set_fragment(None);
        Ok(self
            .caches
            .read()
            .await
            .get(name)
            .and_then(|generation| generation.entries.get(key.as_str()))
            .cloned())
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> SwResult<()> {
        trace!(cache = name, url = %entry.url, "Cache put");
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .entries
            .insert(entry.url.clone(), entry.stamp());
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> SwResult<()> {
        // One write guard for the whole batch.
        let mut caches = self.caches.write().await;
        let generation = caches.entry(name.to_string()).or_default();
        for entry in entries {
            generation.entries.insert(entry.url.clone(), entry.stamp());
        }
        Ok(())
    }

    async fn entry_urls(&self, name: &str) -> SwResult<Vec<String>> {
        let mut urls: Vec<String> = self
            .caches
            .read()
            .await
            .get(name)
            .map(|generation| generation.entries.keys().cloned().collect())
            .unwrap_or_default();
        urls.sort();
        Ok(urls)
    }
}
