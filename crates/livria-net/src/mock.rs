//! Scripted in-memory fetcher for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use http::StatusCode;
use url::Url;

use crate::{Fetcher, NetError, Request, Response};

#[derive(Debug, Clone)]
enum Route {
    Respond(Response),
    Fail,
}

/// A fetcher that answers from a route table and counts every call.
///
/// Unrouted URLs answer 404. `set_offline(true)` makes every fetch fail.
#[derive(Debug, Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<HashMap<String, usize>>,
    offline: AtomicBool,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `response`.
    pub fn respond(&self, url: &Url, response: Response) -> &Self {
        self.lock_routes()
            .insert(url.to_string(), Route::Respond(response.with_url(url.clone())));
        self
    }

    /// Answer `url` with a 200 same-origin body.
    pub fn ok(&self, url: &Url, body: &str) -> &Self {
        self.respond(url, Response::new(StatusCode::OK, body.to_string()))
    }

    /// Make fetches of `url` fail at the transport level.
    pub fn fail(&self, url: &Url) -> &Self {
        self.lock_routes().insert(url.to_string(), Route::Fail);
        self
    }

    /// Toggle a full network outage.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetches issued for `url`.
    pub fn calls(&self, url: &Url) -> usize {
        self.lock_calls().get(url.as_str()).copied().unwrap_or(0)
    }

    /// Total number of fetches issued.
    pub fn total_calls(&self) -> usize {
        self.lock_calls().values().sum()
    }

    fn lock_routes(&self) -> std::sync::MutexGuard<'_, HashMap<String, Route>> {
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let key = request.key_url().to_string();
        *self.lock_calls().entry(key.clone()).or_insert(0) += 1;

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Unreachable(key));
        }

        let route = self.lock_routes().get(&key).cloned();
        match route {
            Some(Route::Respond(response)) => Ok(response),
            Some(Route::Fail) => Err(NetError::Unreachable(key)),
            None => Ok(Response::new(StatusCode::NOT_FOUND, "").with_url(request.url)),
        }
    }
}
