//! # LIVRIA Offline Worker
//!
//! The background worker that sits between the LIVRIA front-end's network
//! requests and the network/cache storage.
//!
//! ## Features
//!
//! - **Lifecycle**: atomic precache on install, stale generation sweep on activate
//! - **Routing**: API → network-first, static assets → cache-first,
//!   navigations → offline fallback, everything else → stale-while-revalidate
//! - **Cache storage**: in-memory and on-disk generations
//! - **Push bridge**: push payload → notification, notification click → window
//! - **Control channel**: `SKIP_WAITING` and `CLEAR_CACHE` commands
//!
//! ## Architecture
//!
//! ```text
//! OfflineWorker (one call per event, no state between events)
//!     │
//!     ├── lifecycle   install / activate
//!     ├── router      Request → Route
//!     ├── strategy    cache-first | network-first | swr | navigation
//!     ├── push        PushPayload → Notification → ClickOutcome
//!     └── message     ControlMessage → MessageOutcome
//!
//! Collaborators (injected)
//!     ├── Fetcher       (livria-net)
//!     ├── CacheStorage  generation name → url → CacheEntry
//!     ├── WorkerHost    skip_waiting, notifications
//!     └── Clients       window enumeration, focus, navigate, open, claim
//! ```

use livria_core::CoreError;
use livria_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod extend;
pub mod fs_cache;
pub mod host;
pub mod lifecycle;
pub mod message;
pub mod push;
pub mod registration;
pub mod router;
pub mod strategy;
pub mod worker;

pub use cache::{CacheEntry, CacheStorage, MemoryCacheStorage};
pub use clients::ClientRegistry;
pub use extend::WaitUntil;
pub use fs_cache::FsCacheStorage;
pub use host::{ClientId, Clients, WindowClient, WorkerHost};
pub use lifecycle::{ActivationReport, InstallReport};
pub use message::{ClearCacheReply, ControlMessage, MessageOutcome, ReplyPort};
pub use push::{ClickOutcome, Notification, PushPayload};
pub use registration::{HostEvent, MemoryHost, ServiceWorkerState};
pub use router::{classify, Route, Strategy};
pub use worker::{FetchOutcome, OfflineWorker};

// ==================== Errors ====================

/// Errors that can occur in worker operations.
#[derive(Error, Debug, Clone)]
pub enum SwError {
    #[error("Precache failed for {url}: {reason}")]
    PrecacheFailed { url: String, reason: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<NetError> for SwError {
    fn from(e: NetError) -> Self {
        SwError::Network(e.to_string())
    }
}

impl From<CoreError> for SwError {
    fn from(e: CoreError) -> Self {
        SwError::Config(e.to_string())
    }
}

impl From<std::io::Error> for SwError {
    fn from(e: std::io::Error) -> Self {
        SwError::Cache(e.to_string())
    }
}

/// Result type alias for worker operations.
pub type SwResult<T> = Result<T, SwError>;
