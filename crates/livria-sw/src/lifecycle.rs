//! Install and activate.

use futures::future::{join_all, try_join_all};
use livria_core::WorkerConfig;
use livria_net::{Fetcher, Request};
use tracing::{info, warn};

use crate::cache::{CacheEntry, CacheStorage};
use crate::host::{Clients, WorkerHost};
use crate::{SwError, SwResult};

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cache_name: String,
    pub precached: usize,
}

/// Result of an activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stale generations removed.
    pub deleted: Vec<String>,
    /// Stale generations whose deletion failed.
    pub failed: Vec<String>,
    /// Clients taken over.
    pub claimed: usize,
}

/// Precache the critical paths into the current generation.
///
/// Every path is fetched before anything is written. If one fetch fails or
/// answers non-2xx the install fails and no entry is stored; the host
/// decides whether to retry. On success the worker asks to skip waiting.
pub async fn install(
    config: &WorkerConfig,
    fetcher: &dyn Fetcher,
    storage: &dyn CacheStorage,
    host: &dyn WorkerHost,
) -> SwResult<InstallReport> {
    let cache_name = config.cache_name();
    let urls = config.precache_urls()?;
    info!(cache = %cache_name, count = urls.len(), "Installing");

    storage.open(&cache_name).await?;

    let entries = try_join_all(urls.into_iter().map(|url| async move {
        let response = fetcher
            .fetch(Request::get(url.clone()))
            .await
            .map_err(|e| SwError::PrecacheFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if !response.ok() {
            return Err(SwError::PrecacheFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status.as_u16()),
            });
        }
        Ok(CacheEntry::from_parts(&url, &response))
    }))
    .await
    .inspect_err(|e| warn!(cache = %cache_name, error = %e, "Install failed"))?;

    let precached = entries.len();
    storage.put_all(&cache_name, entries).await?;
    host.skip_waiting().await?;

    info!(cache = %cache_name, precached, "Installed");
    Ok(InstallReport {
        cache_name,
        precached,
    })
}

/// Delete every generation except the current one, then claim clients.
///
/// Deletions are independent; a failure is logged and the sweep goes on.
/// Clients are claimed only after every deletion has settled.
pub async fn activate(
    config: &WorkerConfig,
    storage: &dyn CacheStorage,
    clients: &dyn Clients,
) -> SwResult<ActivationReport> {
    let current = config.cache_name();
    let stale: Vec<String> = storage
        .keys()
        .await?
        .into_iter()
        .filter(|name| *name != current)
        .collect();

    let results = join_all(stale.iter().map(|name| storage.delete(name))).await;

    let mut report = ActivationReport::default();
    for (name, result) in stale.into_iter().zip(results) {
        match result {
            Ok(_) => {
                info!(cache = %name, "Deleted stale cache");
                report.deleted.push(name);
            }
            Err(e) => {
                warn!(cache = %name, error = %e, "Failed to delete stale cache");
                report.failed.push(name);
            }
        }
    }

    report.claimed = clients.claim().await?;
    info!(
        cache = %current,
        deleted = report.deleted.len(),
        failed = report.failed.len(),
        claimed = report.claimed,
        "Activated"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::clients::{ClientRegistry, ClientType};
    use crate::fs_cache::FsCacheStorage;
    use crate::registration::MemoryHost;
    use http::StatusCode;
    use livria_net::{MockFetcher, Response};

    fn seed_precache(config: &WorkerConfig, fetcher: &MockFetcher) {
        for url in config.precache_urls().unwrap() {
            fetcher.ok(&url, url.path());
        }
    }

    #[tokio::test]
    async fn test_install_precaches_everything() {
        let config = WorkerConfig::default();
        let fetcher = MockFetcher::new();
        seed_precache(&config, &fetcher);
        let storage = MemoryCacheStorage::new();
        let (host, _rx) = MemoryHost::new(config.scope.clone());

        let report = install(&config, &fetcher, &storage, &host).await.unwrap();
        assert_eq!(report.cache_name, "livria-v1");
        assert_eq!(report.precached, config.precache.len());
        assert_eq!(
            storage.entry_urls("livria-v1").await.unwrap().len(),
            config.precache.len()
        );
    }

    #[tokio::test]
    async fn test_install_is_atomic_on_404() {
        let config = WorkerConfig::default();
        let fetcher = MockFetcher::new();
        seed_precache(&config, &fetcher);
        let manifest = config.resolve("/manifest.json").unwrap();
        fetcher.respond(&manifest, Response::new(StatusCode::NOT_FOUND, ""));
        let storage = MemoryCacheStorage::new();
        let (host, _rx) = MemoryHost::new(config.scope.clone());

        let err = install(&config, &fetcher, &storage, &host).await.unwrap_err();
        assert!(matches!(err, SwError::PrecacheFailed { ref url, .. } if url.ends_with("/manifest.json")));
        assert!(storage.entry_urls("livria-v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_is_atomic_on_network_error() {
        let config = WorkerConfig::default();
        let fetcher = MockFetcher::new();
        seed_precache(&config, &fetcher);
        fetcher.fail(&config.offline_url().unwrap());
        let storage = MemoryCacheStorage::new();
        let (host, _rx) = MemoryHost::new(config.scope.clone());

        assert!(install(&config, &fetcher, &storage, &host).await.is_err());
        assert!(storage.entry_urls("livria-v1").await.unwrap().is_empty());
        // Nothing was promoted.
        assert!(!host.needs_activation().await);
    }

    #[tokio::test]
    async fn test_install_with_repeated_paths_on_disk() {
        let mut config = WorkerConfig::default();
        config.precache.push("./".to_string());
        config.precache.push("/manifest.json".to_string());
        let fetcher = MockFetcher::new();
        seed_precache(&config, &fetcher);
        let dir = tempfile::tempdir().unwrap();
        let storage = FsCacheStorage::open_dir(dir.path()).await.unwrap();
        let (host, _rx) = MemoryHost::new(config.scope.clone());

        let report = install(&config, &fetcher, &storage, &host).await.unwrap();
        assert_eq!(report.precached, 5);
        assert_eq!(storage.entry_urls("livria-v1").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_activate_sweeps_stale_generations() {
        let config = WorkerConfig::default();
        let storage = MemoryCacheStorage::new();
        for name in ["livria-v0", "livria-v1", "livria-beta", "third-party"] {
            storage.open(name).await.unwrap();
        }
        let clients = ClientRegistry::new();
        clients
            .add(config.resolve("/feed").unwrap(), ClientType::Window)
            .await;

        let report = activate(&config, &storage, &clients).await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["livria-v1".to_string()]);
        assert_eq!(report.deleted.len(), 3);
        assert!(report.failed.is_empty());
        assert_eq!(report.claimed, 1);
    }
}
