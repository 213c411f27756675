//! Event entry points.

use std::sync::Arc;

use livria_core::WorkerConfig;
use livria_net::{Fetcher, Request, Response};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::cache::CacheStorage;
use crate::extend::WaitUntil;
use crate::host::{Clients, WorkerHost};
use crate::lifecycle::{self, ActivationReport, InstallReport};
use crate::message::{self, MessageOutcome, ReplyPort};
use crate::push::{self, ClickOutcome, Notification};
use crate::router::{classify, Route};
use crate::strategy::StrategyContext;
use crate::SwResult;

/// Result of a fetch event.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The worker answered the request.
    Respond(Response),
    /// The worker declined; the host performs its default fetch.
    Passthrough,
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::Passthrough => None,
        }
    }
}

/// The offline worker.
///
/// Holds configuration and collaborators only. Every event handler reads
/// what it needs from cache storage, so the host may drop and recreate the
/// worker between events.
pub struct OfflineWorker {
    config: WorkerConfig,
    fetcher: Arc<dyn Fetcher>,
    storage: Arc<dyn CacheStorage>,
    host: Arc<dyn WorkerHost>,
    clients: Arc<dyn Clients>,
}

impl OfflineWorker {
    /// Create a worker; fails if `config` is invalid.
    pub fn new(
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn CacheStorage>,
        host: Arc<dyn WorkerHost>,
        clients: Arc<dyn Clients>,
    ) -> SwResult<Self> {
        config.validate()?;
        debug!(cache = %config.cache_name(), scope = %config.scope, "Worker created");
        Ok(Self {
            config,
            fetcher,
            storage,
            host,
            clients,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Name of the cache generation this worker owns.
    pub fn cache_name(&self) -> String {
        self.config.cache_name()
    }

    pub async fn on_install(&self) -> SwResult<InstallReport> {
        lifecycle::install(
            &self.config,
            self.fetcher.as_ref(),
            self.storage.as_ref(),
            self.host.as_ref(),
        )
        .await
    }

    pub async fn on_activate(&self) -> SwResult<ActivationReport> {
        lifecycle::activate(&self.config, self.storage.as_ref(), self.clients.as_ref()).await
    }

    /// Route one intercepted request.
    ///
    /// Background cache writes land on `wait`; the host settles it after
    /// the response has been delivered.
    pub async fn on_fetch(&self, request: Request, wait: &mut WaitUntil) -> SwResult<FetchOutcome> {
        let strategy = match classify(&self.config.routes, &request) {
            Route::Passthrough => {
                debug!(method = %request.method, url = %request.url, "Passthrough");
                return Ok(FetchOutcome::Passthrough);
            }
            Route::Handle(strategy) => strategy,
        };

        let ctx = StrategyContext {
            fetcher: Arc::clone(&self.fetcher),
            storage: Arc::clone(&self.storage),
            cache_name: self.config.cache_name(),
            offline_url: self.config.offline_url()?,
        };
        let response = ctx.run(strategy, request, wait).await?;
        Ok(FetchOutcome::Respond(response))
    }

    pub async fn on_push(&self, data: Option<&[u8]>) -> SwResult<Notification> {
        push::handle_push(data, &self.config.notifications, self.host.as_ref()).await
    }

    pub async fn on_notification_click(&self, notification: &Notification) -> SwResult<ClickOutcome> {
        let outcome = push::handle_click(
            notification,
            &self.config,
            self.host.as_ref(),
            self.clients.as_ref(),
        )
        .await?;
        info!(?outcome, "Notification clicked");
        Ok(outcome)
    }

    pub async fn on_message(
        &self,
        message: &JsonValue,
        reply: Option<ReplyPort>,
    ) -> SwResult<MessageOutcome> {
        message::handle_message(
            message,
            reply,
            &self.config.cache_name(),
            self.storage.as_ref(),
            self.host.as_ref(),
        )
        .await
    }
}

impl std::fmt::Debug for OfflineWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineWorker")
            .field("cache_name", &self.config.cache_name())
            .field("scope", &self.config.scope.as_str())
            .finish_non_exhaustive()
    }
}
