//! Request classification.

use http::Method;
use livria_core::RouteConfig;
use livria_net::Request;

/// Caching strategy applied to an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    Navigation,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
            Strategy::Navigation => "navigation",
        }
    }
}

/// Routing decision for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Not intercepted; the host performs its default fetch.
    Passthrough,
    /// Handled by a strategy.
    Handle(Strategy),
}

/// Classify a request. First match wins:
///
/// 1. non-`GET` or non-http(s) → passthrough
/// 2. path under the API prefix → network-first
/// 3. path with a static asset extension → cache-first
/// 4. navigation mode → navigation with offline fallback
/// 5. anything else → stale-while-revalidate
pub fn classify(config: &RouteConfig, request: &Request) -> Route {
    if request.method != Method::GET {
        return Route::Passthrough;
    }
    if !matches!(request.url.scheme(), "http" | "https") {
        return Route::Passthrough;
    }

    let path = request.url.path();
    let strategy = if path.starts_with(&config.api_prefix) {
        Strategy::NetworkFirst
    } else if is_static_asset(config, path) {
        Strategy::CacheFirst
    } else if request.is_navigation() {
        Strategy::Navigation
    } else {
        Strategy::StaleWhileRevalidate
    };
    Route::Handle(strategy)
}

/// Extension match on the last path segment; case-sensitive.
fn is_static_asset(config: &RouteConfig, path: &str) -> bool {
    let segment = path.rsplit('/').next().unwrap_or(path);
    match segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            config.static_extensions.iter().any(|known| known == ext)
        }
        _ => false,
    }
}
