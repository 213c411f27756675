//! In-memory client registry.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::host::{ClientId, Clients, WindowClient};
use crate::{SwError, SwResult};

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
}

/// A client known to the registry.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub url: Url,
    pub client_type: ClientType,
    pub focused: bool,
    /// Whether the worker controls this client.
    pub controlled: bool,
}

impl Client {
    fn window_snapshot(&self) -> WindowClient {
        WindowClient {
            id: self.id.clone(),
            url: self.url.clone(),
            focused: self.focused,
        }
    }
}

/// [`Clients`] over an insertion-ordered list.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<Vec<Client>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing (uncontrolled) client.
    pub async fn add(&self, url: Url, client_type: ClientType) -> ClientId {
        let id = next_client_id();
        self.clients.write().await.push(Client {
            id: id.clone(),
            url,
            client_type,
            focused: false,
            controlled: false,
        });
        id
    }

    /// Remove a client (window closed).
    pub async fn remove(&self, id: &ClientId) -> Option<Client> {
        let mut clients = self.clients.write().await;
        let index = clients.iter().position(|c| &c.id == id)?;
        Some(clients.remove(index))
    }

    /// Look up a client.
    pub async fn get(&self, id: &ClientId) -> Option<Client> {
        self.clients.read().await.iter().find(|c| &c.id == id).cloned()
    }

    async fn with_window<T>(
        &self,
        id: &ClientId,
        f: impl FnOnce(&mut Vec<Client>, usize) -> T,
    ) -> SwResult<T> {
        let mut clients = self.clients.write().await;
        let index = clients
            .iter()
            .position(|c| &c.id == id)
            .ok_or_else(|| SwError::NotFound(format!("client {id}")))?;
        if clients[index].client_type != ClientType::Window {
            return Err(SwError::Client(format!("client {id} is not a window")));
        }
        Ok(f(&mut clients, index))
    }
}

#[async_trait]
impl Clients for ClientRegistry {
    async fn match_windows(&self) -> SwResult<Vec<WindowClient>> {
        Ok(self
            .clients
            .read()
            .await
            .iter()
            .filter(|c| c.client_type == ClientType::Window)
            .map(Client::window_snapshot)
            .collect())
    }

    async fn open_window(&self, url: &Url) -> SwResult<WindowClient> {
        let client = Client {
            id: next_client_id(),
            url: url.clone(),
            client_type: ClientType::Window,
            focused: true,
            controlled: true,
        };
        let snapshot = client.window_snapshot();

        let mut clients = self.clients.write().await;
        for other in clients.iter_mut() {
            other.focused = false;
        }
        clients.push(client);
        debug!(client = %snapshot.id, url = %url, "Opened window");
        Ok(snapshot)
    }

    async fn focus(&self, id: &ClientId) -> SwResult<()> {
        self.with_window(id, |clients, index| {
            for (i, client) in clients.iter_mut().enumerate() {
                client.focused = i == index;
            }
        })
        .await
    }

    async fn navigate(&self, id: &ClientId, url: &Url) -> SwResult<()> {
        self.with_window(id, |clients, index| {
            clients[index].url = url.clone();
        })
        .await?;
        debug!(client = %id, url = %url, "Navigated window");
        Ok(())
    }

    async fn claim(&self) -> SwResult<usize> {
        let mut clients = self.clients.write().await;
        let mut claimed = 0;
        for client in clients.iter_mut().filter(|c| !c.controlled) {
            client.controlled = true;
            claimed += 1;
        }
        Ok(claimed)
    }
}

fn next_client_id() -> ClientId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    ClientId(format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse("http://localhost:3000/").unwrap().join(path).unwrap()
    }

    #[tokio::test]
    async fn test_open_window_focuses_it() {
        let clients = ClientRegistry::new();
        let existing = clients.add(url("/feed"), ClientType::Window).await;
        clients.focus(&existing).await.unwrap();

        let opened = clients.open_window(&url("/messages")).await.unwrap();
        assert!(opened.focused);
        assert!(!clients.get(&existing).await.unwrap().focused);
    }

    #[tokio::test]
    async fn test_match_windows_keeps_order_and_skips_workers() {
        let clients = ClientRegistry::new();
        let first = clients.add(url("/a"), ClientType::Window).await;
        clients.add(url("/worker.js"), ClientType::Worker).await;
        let second = clients.add(url("/b"), ClientType::Window).await;

        let windows = clients.match_windows().await.unwrap();
        let ids: Vec<_> = windows.iter().map(|w| w.id.clone()).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn test_focus_and_navigate_require_window() {
        let clients = ClientRegistry::new();
        let worker = clients.add(url("/worker.js"), ClientType::Worker).await;
        assert!(matches!(clients.focus(&worker).await, Err(SwError::Client(_))));
        assert!(matches!(
            clients.navigate(&ClientId("missing".into()), &url("/")).await,
            Err(SwError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_navigate_updates_url() {
        let clients = ClientRegistry::new();
        let id = clients.add(url("/feed"), ClientType::Window).await;
        clients.navigate(&id, &url("/chapters/3")).await.unwrap();
        assert_eq!(clients.get(&id).await.unwrap().url, url("/chapters/3"));
    }

    #[tokio::test]
    async fn test_claim_counts_uncontrolled() {
        let clients = ClientRegistry::new();
        clients.add(url("/a"), ClientType::Window).await;
        clients.add(url("/b"), ClientType::Window).await;
        assert_eq!(clients.claim().await.unwrap(), 2);
        assert_eq!(clients.claim().await.unwrap(), 0);
        assert!(clients.remove(&ClientId("nope".into())).await.is_none());
    }
}
