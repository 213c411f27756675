//! Host collaborator interfaces.
//!
//! The worker never owns windows or the notification tray; it asks the
//! hosting runtime through these traits.

use async_trait::async_trait;
use url::Url;

use crate::push::Notification;
use crate::SwResult;

/// Identifier of a client window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of an open application window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowClient {
    pub id: ClientId,
    pub url: Url,
    pub focused: bool,
}

/// Services the runtime provides to the worker itself.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Activate as soon as installation completes, without waiting for
    /// existing clients to close.
    async fn skip_waiting(&self) -> SwResult<()>;

    /// Display a notification.
    async fn show_notification(&self, notification: Notification) -> SwResult<()>;

    /// Dismiss a displayed notification.
    async fn close_notification(&self, notification: &Notification) -> SwResult<()>;
}

/// The clients (windows) within the worker's scope.
#[async_trait]
pub trait Clients: Send + Sync {
    /// Window clients in discovery order, including uncontrolled ones.
    async fn match_windows(&self) -> SwResult<Vec<WindowClient>>;

    /// Open a new window at `url`.
    async fn open_window(&self, url: &Url) -> SwResult<WindowClient>;

    /// Bring a window to the foreground.
    async fn focus(&self, id: &ClientId) -> SwResult<()>;

    /// Navigate a window to `url`.
    async fn navigate(&self, id: &ClientId, url: &Url) -> SwResult<()>;

    /// Take control of every client in scope. Returns how many were claimed.
    async fn claim(&self) -> SwResult<usize>;
}
