//! Worker configuration
//!
//! The worker may be torn down between any two events, so nothing here is a
//! process-wide singleton: a `WorkerConfig` is built by the host and handed
//! to every event handler.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{CoreError, CoreResult};

/// Offline worker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Application prefix shared by every cache generation
    pub cache_prefix: String,

    /// Version token of the current build
    pub version: String,

    /// Scope URL; precache paths and notification targets resolve against it
    pub scope: Url,

    /// Critical paths stored atomically at install time
    pub precache: Vec<String>,

    /// Path of the offline fallback document (must be precached)
    pub offline_page: String,

    /// Request routing settings
    pub routes: RouteConfig,

    /// Notification defaults
    pub notifications: NotificationConfig,
}

/// Request routing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RouteConfig {
    /// Path prefix of the backend API (network-first)
    pub api_prefix: String,

    /// File extensions treated as static assets (cache-first), without dot
    pub static_extensions: Vec<String>,
}

/// Notification defaults applied to push payloads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    /// Title used when the payload has none
    pub default_title: String,

    /// Body used when the payload is absent
    pub default_body: String,

    /// Tag used when the payload has none. Untagged notifications share it
    /// and therefore replace each other on platforms that collapse by tag.
    pub default_tag: String,

    /// Icon path
    pub icon: String,

    /// Badge path
    pub badge: String,

    /// Vibration pattern in milliseconds
    pub vibrate: Vec<u32>,

    /// Navigation target when a clicked notification carries no URL
    pub default_url: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "livria".to_string(),
            version: "v1".to_string(),
            scope: Url::parse("http://localhost:3000/").expect("static scope URL is valid"),
            precache: vec![
                "/".to_string(),
                "/offline.html".to_string(),
                "/manifest.json".to_string(),
                "/icons/icon-192x192.png".to_string(),
                "/icons/icon-512x512.png".to_string(),
            ],
            offline_page: "/offline.html".to_string(),
            routes: RouteConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api/".to_string(),
            static_extensions: [
                "js", "css", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2",
                "ttf", "eot",
            ]
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_title: "LIVRIA".to_string(),
            default_body: "Nova notificação".to_string(),
            default_tag: "livria-notification".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/icon-72x72.png".to_string(),
            vibrate: vec![100, 50, 100],
            default_url: "/".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading worker config");
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Check invariants the worker relies on.
    pub fn validate(&self) -> CoreResult<()> {
        if self.cache_prefix.is_empty() {
            return Err(CoreError::config("cache_prefix must not be empty"));
        }
        if self.version.is_empty() {
            return Err(CoreError::config("version must not be empty"));
        }
        if !matches!(self.scope.scheme(), "http" | "https") {
            return Err(CoreError::config(format!(
                "scope must be http(s), got {}",
                self.scope
            )));
        }
        if !self.precache.iter().any(|p| p == &self.offline_page) {
            return Err(CoreError::config(format!(
                "offline page {} is not in the precache set",
                self.offline_page
            )));
        }
        if !self.routes.api_prefix.starts_with('/') {
            return Err(CoreError::config("api_prefix must start with '/'"));
        }
        Ok(())
    }

    /// Name of the current cache generation.
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }

    /// Resolve a path or URL against the scope.
    pub fn resolve(&self, path: &str) -> CoreResult<Url> {
        Ok(self.scope.join(path)?)
    }

    /// Absolute URLs of the precache set, in order. Paths that resolve to
    /// the same URL (`./` and `/`, a repeated entry) are listed once.
    pub fn precache_urls(&self) -> CoreResult<Vec<Url>> {
        let mut urls: Vec<Url> = Vec::with_capacity(self.precache.len());
        for path in &self.precache {
            let mut url = self.resolve(path)?;
            url.set_fragment(None);
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        Ok(urls)
    }

    /// Absolute URL of the offline fallback document.
    pub fn offline_url(&self) -> CoreResult<Url> {
        self.resolve(&self.offline_page)
    }
}
