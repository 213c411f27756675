//! `reqwest`-backed fetcher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, trace};
use url::{Origin, Url};

use crate::{Fetcher, NetError, Request, Response, ResponseType};

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Default timeout. This is the only timeout the worker's strategies
    /// are subject to.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("LivriaWorker/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "pt-BR,pt;q=0.9,en;q=0.8".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Fetches over HTTP and types responses relative to the worker origin.
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
    origin: Origin,
}

impl HttpFetcher {
    /// Create a fetcher for a worker whose scope is `scope`.
    pub fn new(config: LoaderConfig, scope: &Url) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = %scope.origin().ascii_serialization(), "HttpFetcher initialized");

        Ok(Self {
            client,
            config,
            origin: scope.origin(),
        })
    }

    fn classify(&self, final_url: &Url) -> ResponseType {
        if final_url.origin() == self.origin {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .header("Accept-Language", &self.config.accept_language);

        if let Some(body) = request.body.clone() {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                NetError::Timeout(timeout)
            } else if e.is_connect() {
                NetError::Unreachable(e.to_string())
            } else {
                NetError::HttpError(e)
            }
        };

        let response = builder.send().await.map_err(map_err)?;

        let status = response.status();
        let headers = response.headers().clone();
        let final_url = response.url().clone();
        let redirected = final_url != request.url;
        let response_type = self.classify(&final_url);

        let body = response.bytes().await.map_err(map_err)?;

        trace!(
            url = %final_url,
            status = %status,
            response_type = response_type.as_str(),
            redirected,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url: Some(final_url),
            status,
            headers,
            response_type,
            redirected,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("LivriaWorker/"));
        assert_eq!(config.max_redirects, 10);
    }

    #[tokio::test]
    async fn test_same_origin_response_is_basic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("console.log(1)"))
            .mount(&server)
            .await;

        let scope = Url::parse(&server.uri()).unwrap();
        let fetcher = HttpFetcher::new(LoaderConfig::default(), &scope).unwrap();
        let response = fetcher
            .fetch(Request::get(scope.join("/app.js").unwrap()))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.response_type, ResponseType::Basic);
        assert!(!response.redirected);
        assert_eq!(response.text(), "console.log(1)");
    }

    #[tokio::test]
    async fn test_cross_origin_response_is_cors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let scope = Url::parse("http://app.invalid/").unwrap();
        let fetcher = HttpFetcher::new(LoaderConfig::default(), &scope).unwrap();
        let url = Url::parse(&server.uri()).unwrap().join("/font.woff2").unwrap();
        let response = fetcher.fetch(Request::get(url)).await.unwrap();

        assert_eq!(response.response_type, ResponseType::Cors);
    }

    #[tokio::test]
    async fn test_error_status_is_not_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let scope = Url::parse(&server.uri()).unwrap();
        let fetcher = HttpFetcher::new(LoaderConfig::default(), &scope).unwrap();
        let response = fetcher
            .fetch(Request::get(scope.join("/missing").unwrap()))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_redirect_is_flagged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let scope = Url::parse(&server.uri()).unwrap();
        let fetcher = HttpFetcher::new(LoaderConfig::default(), &scope).unwrap();
        let response = fetcher
            .fetch(Request::get(scope.join("/old").unwrap()))
            .await
            .unwrap();

        assert!(response.redirected);
        assert_eq!(response.url.unwrap().path(), "/new");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_an_error() {
        let scope = Url::parse("http://127.0.0.1:9/").unwrap();
        let config = LoaderConfig {
            default_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let fetcher = HttpFetcher::new(config, &scope).unwrap();
        assert!(fetcher.fetch(Request::get(scope)).await.is_err());
    }
}
