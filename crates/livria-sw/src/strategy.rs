//! Cache strategies.
//!
//! Every strategy shares one write rule: a response is stored only when its
//! status is exactly 200 and its type is `basic`. Writes are registered on
//! the event's [`WaitUntil`] so the caller never waits for them.

use std::sync::Arc;

use livria_net::{Fetcher, Request, Response, ResponseType};
use tracing::{debug, trace, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStorage};
use crate::extend::WaitUntil;
use crate::router::Strategy;
use crate::SwResult;

/// Built-in offline document, served when even the precached copy is gone.
pub const OFFLINE_FALLBACK_HTML: &str = include_str!("../../../public/offline.html");

/// Per-event collaborators shared by the strategies.
#[derive(Clone)]
pub struct StrategyContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub storage: Arc<dyn CacheStorage>,
    /// Current cache generation.
    pub cache_name: String,
    /// Absolute URL of the precached offline document.
    pub offline_url: Url,
}

impl StrategyContext {
    /// Dispatch `request` to `strategy`.
    pub async fn run(
        &self,
        strategy: Strategy,
        request: Request,
        wait: &mut WaitUntil,
    ) -> SwResult<Response> {
        trace!(url = %request.url, strategy = strategy.as_str(), "Dispatching request");
        match strategy {
            Strategy::CacheFirst => cache_first(self, request, wait).await,
            Strategy::NetworkFirst => network_first(self, request, wait).await,
            Strategy::StaleWhileRevalidate => stale_while_revalidate(self, request, wait).await,
            Strategy::Navigation => navigation(self, request, wait).await,
        }
    }

    /// Cache lookup; storage failures count as a miss.
    async fn lookup(&self, request: &Request) -> Option<Response> {
        let hit = self
            .storage
            .match_request(&self.cache_name, request)
            .await
            .and_then(|hit| hit.map(|entry| entry.to_response()).transpose());
        match hit {
            Ok(hit) => hit,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Register a background write of `response`, if it is cacheable.
    fn store(&self, request: &Request, response: &Response, wait: &mut WaitUntil) {
        if !is_cacheable(response) {
            trace!(
                url = %request.url,
                status = response.status.as_u16(),
                response_type = response.response_type.as_str(),
                "Response not cacheable"
            );
            return;
        }

        let entry = CacheEntry::from_response(request, response);
        let storage = Arc::clone(&self.storage);
        let cache_name = self.cache_name.clone();
        wait.spawn(async move {
            if let Err(e) = storage.put(&cache_name, entry).await {
                warn!(cache = %cache_name, error = %e, "Cache write failed");
            }
        });
    }
}

/// Write filter shared by every strategy.
pub fn is_cacheable(response: &Response) -> bool {
    response.status.as_u16() == 200 && response.response_type == ResponseType::Basic
}

/// Serve from cache; go to the network only on a miss.
pub async fn cache_first(
    ctx: &StrategyContext,
    request: Request,
    wait: &mut WaitUntil,
) -> SwResult<Response> {
    if let Some(cached) = ctx.lookup(&request).await {
        trace!(url = %request.url, "Cache hit");
        return Ok(cached);
    }

    let response = ctx.fetcher.fetch(request.clone()).await?;
    ctx.store(&request, &response, wait);
    Ok(response)
}

/// Prefer the network; fall back to the cache when it fails.
pub async fn network_first(
    ctx: &StrategyContext,
    request: Request,
    wait: &mut WaitUntil,
) -> SwResult<Response> {
    match ctx.fetcher.fetch(request.clone()).await {
        Ok(response) => {
            ctx.store(&request, &response, wait);
            Ok(response)
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Network failed, trying cache");
            match ctx.lookup(&request).await {
                Some(cached) => Ok(cached),
                None => Err(e.into()),
            }
        }
    }
}

/// Answer from cache immediately and refresh it in the background.
///
/// On a miss the caller gets the network result directly; no second
/// response is ever produced for the same request.
pub async fn stale_while_revalidate(
    ctx: &StrategyContext,
    request: Request,
    wait: &mut WaitUntil,
) -> SwResult<Response> {
    if let Some(cached) = ctx.lookup(&request).await {
        let ctx = ctx.clone();
        wait.spawn(async move {
            match ctx.fetcher.fetch(request.clone()).await {
                Ok(fresh) if is_cacheable(&fresh) => {
                    let entry = CacheEntry::from_response(&request, &fresh);
                    if let Err(e) = ctx.storage.put(&ctx.cache_name, entry).await {
                        warn!(url = %request.url, error = %e, "Revalidation write failed");
                    }
                }
                Ok(_) => {}
                Err(e) => trace!(url = %request.url, error = %e, "Revalidation failed"),
            }
        });
        return Ok(cached);
    }

    let response = ctx.fetcher.fetch(request.clone()).await?;
    ctx.store(&request, &response, wait);
    Ok(response)
}

/// Network for page loads; the offline document when the network is down.
pub async fn navigation(
    ctx: &StrategyContext,
    request: Request,
    wait: &mut WaitUntil,
) -> SwResult<Response> {
    match ctx.fetcher.fetch(request.clone()).await {
        Ok(response) => {
            ctx.store(&request, &response, wait);
            Ok(response)
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Navigation failed, serving offline page");
            Ok(offline_response(ctx).await)
        }
    }
}

async fn offline_response(ctx: &StrategyContext) -> Response {
    let stored = ctx
        .storage
        .match_url(&ctx.cache_name, &ctx.offline_url)
        .await
        .and_then(|hit| hit.map(|entry| entry.to_response()).transpose());
    match stored {
        Ok(Some(response)) => response,
        Ok(None) => {
            warn!(url = %ctx.offline_url, "Offline page missing from cache, using built-in copy");
            builtin_offline_response()
        }
        Err(e) => {
            warn!(error = %e, "Offline page lookup failed, using built-in copy");
            builtin_offline_response()
        }
    }
}

fn builtin_offline_response() -> Response {
    Response::ok_with("text/html; charset=utf-8", OFFLINE_FALLBACK_HTML)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use http::StatusCode;
    use livria_net::MockFetcher;

    const CACHE: &str = "livria-v1";

    fn url(path: &str) -> Url {
        Url::parse("http://localhost:3000/").unwrap().join(path).unwrap()
    }

    fn setup() -> (Arc<MockFetcher>, MemoryCacheStorage, StrategyContext) {
        let fetcher = Arc::new(MockFetcher::new());
        let storage = MemoryCacheStorage::new();
        let ctx = StrategyContext {
            fetcher: fetcher.clone(),
            storage: Arc::new(storage.clone()),
            cache_name: CACHE.to_string(),
            offline_url: url("/offline.html"),
        };
        (fetcher, storage, ctx)
    }

    async fn seed(storage: &MemoryCacheStorage, path: &str, body: &str) {
        storage
            .put(
                CACHE,
                CacheEntry::from_parts(&url(path), &Response::ok_with("text/plain", body.to_string())),
            )
            .await
            .unwrap();
    }

    async fn cached_body(storage: &MemoryCacheStorage, path: &str) -> Option<String> {
        storage
            .match_url(CACHE, &url(path))
            .await
            .unwrap()
            .map(|e| String::from_utf8_lossy(&e.body).into_owned())
    }

    #[test]
    fn test_write_filter() {
        assert!(is_cacheable(&Response::new(StatusCode::OK, "")));
        assert!(!is_cacheable(&Response::new(StatusCode::NO_CONTENT, "")));
        assert!(!is_cacheable(&Response::new(StatusCode::NOT_FOUND, "")));
        assert!(!is_cacheable(
            &Response::new(StatusCode::OK, "").with_type(ResponseType::Cors)
        ));
        assert!(!is_cacheable(
            &Response::new(StatusCode::OK, "").with_type(ResponseType::Opaque)
        ));
    }

    #[tokio::test]
    async fn test_cache_first_hit_skips_network() {
        let (fetcher, storage, ctx) = setup();
        seed(&storage, "/app.js", "cached").await;
        fetcher.ok(&url("/app.js"), "fresh");

        let mut wait = WaitUntil::new();
        let response = cache_first(&ctx, Request::get(url("/app.js")), &mut wait)
            .await
            .unwrap();

        assert_eq!(response.text(), "cached");
        assert_eq!(fetcher.total_calls(), 0);
        assert_eq!(wait.pending(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_miss_fetches_and_stores() {
        let (fetcher, storage, ctx) = setup();
        fetcher.ok(&url("/app.css"), "body{}");

        let mut wait = WaitUntil::new();
        let response = cache_first(&ctx, Request::get(url("/app.css")), &mut wait)
            .await
            .unwrap();
        assert_eq!(response.text(), "body{}");

        wait.settle().await;
        assert_eq!(cached_body(&storage, "/app.css").await.as_deref(), Some("body{}"));
    }

    #[tokio::test]
    async fn test_cache_first_miss_offline_fails() {
        let (fetcher, _storage, ctx) = setup();
        fetcher.set_offline(true);

        let mut wait = WaitUntil::new();
        let result = cache_first(&ctx, Request::get(url("/app.js")), &mut wait).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_network_first_prefers_network() {
        let (fetcher, storage, ctx) = setup();
        seed(&storage, "/api/feed", "stale").await;
        fetcher.ok(&url("/api/feed"), "fresh");

        let mut wait = WaitUntil::new();
        let response = network_first(&ctx, Request::get(url("/api/feed")), &mut wait)
            .await
            .unwrap();
        assert_eq!(response.text(), "fresh");

        wait.settle().await;
        assert_eq!(cached_body(&storage, "/api/feed").await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let (fetcher, storage, ctx) = setup();
        seed(&storage, "/api/feed", "stale").await;
        fetcher.fail(&url("/api/feed"));

        let mut wait = WaitUntil::new();
        let response = network_first(&ctx, Request::get(url("/api/feed")), &mut wait)
            .await
            .unwrap();
        assert_eq!(response.text(), "stale");
    }

    #[tokio::test]
    async fn test_network_first_error_status_is_returned_not_cached() {
        let (fetcher, storage, ctx) = setup();
        seed(&storage, "/api/feed", "stale").await;
        fetcher.respond(
            &url("/api/feed"),
            Response::new(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
        );

        let mut wait = WaitUntil::new();
        let response = network_first(&ctx, Request::get(url("/api/feed")), &mut wait)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);

        wait.settle().await;
        assert_eq!(cached_body(&storage, "/api/feed").await.as_deref(), Some("stale"));
    }

    #[tokio::test]
    async fn test_swr_hit_returns_cached_and_refreshes() {
        let (fetcher, storage, ctx) = setup();
        seed(&storage, "/profile", "old").await;
        fetcher.ok(&url("/profile"), "new");

        let mut wait = WaitUntil::new();
        let response = stale_while_revalidate(&ctx, Request::get(url("/profile")), &mut wait)
            .await
            .unwrap();
        assert_eq!(response.text(), "old");
        assert_eq!(wait.pending(), 1);

        wait.settle().await;
        assert_eq!(fetcher.calls(&url("/profile")), 1);
        assert_eq!(cached_body(&storage, "/profile").await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_swr_hit_offline_keeps_entry() {
        let (fetcher, storage, ctx) = setup();
        seed(&storage, "/profile", "old").await;
        fetcher.set_offline(true);

        let mut wait = WaitUntil::new();
        let response = stale_while_revalidate(&ctx, Request::get(url("/profile")), &mut wait)
            .await
            .unwrap();
        assert_eq!(response.text(), "old");

        wait.settle().await;
        assert_eq!(cached_body(&storage, "/profile").await.as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_swr_miss_uses_network() {
        let (fetcher, storage, ctx) = setup();
        fetcher.ok(&url("/profile"), "net");

        let mut wait = WaitUntil::new();
        let response = stale_while_revalidate(&ctx, Request::get(url("/profile")), &mut wait)
            .await
            .unwrap();
        assert_eq!(response.text(), "net");

        wait.settle().await;
        assert_eq!(fetcher.calls(&url("/profile")), 1);
        assert_eq!(cached_body(&storage, "/profile").await.as_deref(), Some("net"));

        fetcher.set_offline(true);
        let mut wait = WaitUntil::new();
        let missing = stale_while_revalidate(&ctx, Request::get(url("/other")), &mut wait).await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_navigation_serves_precached_offline_page() {
        let (fetcher, storage, ctx) = setup();
        seed(&storage, "/offline.html", "precached offline").await;
        fetcher.set_offline(true);

        let mut wait = WaitUntil::new();
        let response = navigation(&ctx, Request::navigate(url("/books/42")), &mut wait)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), "precached offline");
    }

    #[tokio::test]
    async fn test_navigation_builtin_offline_page() {
        let (fetcher, _storage, ctx) = setup();
        fetcher.set_offline(true);

        let mut wait = WaitUntil::new();
        let response = navigation(&ctx, Request::navigate(url("/feed")), &mut wait)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.text().contains("offline"));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let (fetcher, storage, ctx) = setup();
        let mut entry = CacheEntry::from_parts(&url("/app.css"), &Response::ok_with("text/css", "old"));
        entry.status = 42;
        storage.put(CACHE, entry).await.unwrap();
        fetcher.ok(&url("/app.css"), "fresh");

        let mut wait = WaitUntil::new();
        let response = cache_first(&ctx, Request::get(url("/app.css")), &mut wait)
            .await
            .unwrap();
        assert_eq!(response.text(), "fresh");
        assert_eq!(fetcher.calls(&url("/app.css")), 1);
    }

    #[tokio::test]
    async fn test_navigation_online_stores_page() {
        let (fetcher, storage, ctx) = setup();
        fetcher.ok(&url("/feed"), "<h1>Feed</h1>");

        let mut wait = WaitUntil::new();
        let response = navigation(&ctx, Request::navigate(url("/feed")), &mut wait)
            .await
            .unwrap();
        assert_eq!(response.text(), "<h1>Feed</h1>");

        wait.settle().await;
        assert!(cached_body(&storage, "/feed").await.is_some());
    }

    #[tokio::test]
    async fn test_cross_origin_responses_are_never_stored() {
        let (fetcher, storage, ctx) = setup();
        let cdn = Url::parse("https://cdn.example.com/lib.js").unwrap();
        fetcher.respond(
            &cdn,
            Response::new(StatusCode::OK, "lib").with_type(ResponseType::Cors),
        );

        let mut wait = WaitUntil::new();
        cache_first(&ctx, Request::get(cdn.clone()), &mut wait)
            .await
            .unwrap();
        wait.settle().await;

        assert!(storage.match_url(CACHE, &cdn).await.unwrap().is_none());
    }
}
