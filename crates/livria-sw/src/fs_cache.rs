//! On-disk cache storage.
//!
//! Layout:
//!
//! ```text
//! root/
//!   <base64url(generation name)>/
//!     <sha256(url)>.json                  one StoredEntry per file
//!     <sha256(url)>.json.<pid>-<n>.tmp    write in progress
//!   .staging-<pid>-<n>/                   batch in progress (ignored by keys())
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use bytes::Bytes;
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, trace, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStorage};
use crate::{SwError, SwResult};

/// Serialized form of a [`CacheEntry`].
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    url: String,
    method: String,
    status: u16,
    headers: Vec<(String, String)>,
    /// Base64 (standard alphabet).
    body: String,
    cached_at: u64,
}

impl From<&CacheEntry> for StoredEntry {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            url: entry.url.clone(),
            method: entry.method.clone(),
            status: entry.status,
            headers: entry.headers.clone(),
            body: STANDARD.encode(&entry.body),
            cached_at: entry.cached_at,
        }
    }
}

impl TryFrom<StoredEntry> for CacheEntry {
    type Error = SwError;

    fn try_from(stored: StoredEntry) -> Result<Self, Self::Error> {
        let body = STANDARD
            .decode(stored.body.as_bytes())
            .map_err(|e| SwError::Cache(format!("corrupt body for {}: {e}", stored.url)))?;
        Ok(Self {
            url: stored.url,
            method: stored.method,
            status: stored.status,
            headers: stored.headers,
            body: Bytes::from(body),
            cached_at: stored.cached_at,
        })
    }
}

/// Cache storage persisted under a directory.
#[derive(Debug, Clone)]
pub struct FsCacheStorage {
    root: PathBuf,
}

impl FsCacheStorage {
    /// Use `root` as the storage directory, creating it if needed.
    pub async fn open_dir(root: impl Into<PathBuf>) -> SwResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Opened cache storage directory");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, name: &str) -> PathBuf {
        self.root.join(URL_SAFE_NO_PAD.encode(name.as_bytes()))
    }

    fn entry_file(url: &str) -> String {
        format!("{:x}.json", Sha256::digest(url.as_bytes()))
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(format!(".staging-{}", unique_suffix()))
    }

    async fn write_entry(dir: &Path, entry: &CacheEntry) -> SwResult<PathBuf> {
        let file = Self::entry_file(&entry.url);
        let path = dir.join(&file);
        let json = serde_json::to_vec(&StoredEntry::from(entry))
            .map_err(|e| SwError::Cache(e.to_string()))?;
        // Each writer gets its own temp file; the rename is the commit point,
        // so racing writers to one key end with the last rename winning.
        let tmp = dir.join(format!("{file}.{}.tmp", unique_suffix()));
        fs::write(&tmp, json).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(path)
    }

    async fn read_entry(path: &Path) -> SwResult<Option<CacheEntry>> {
        match fs::read(path).await {
            Ok(raw) => {
                let stored: StoredEntry =
                    serde_json::from_slice(&raw).map_err(|e| SwError::Cache(e.to_string()))?;
                Ok(Some(stored.try_into()?))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Move staged files into `target`. Entries they replace are parked in
    /// `staging`; on failure every move is undone and the parked entries are
    /// put back.
    async fn commit(staging: &Path, target: &Path, files: &[String]) -> SwResult<()> {
        let mut moved: Vec<(PathBuf, Option<PathBuf>)> = Vec::with_capacity(files.len());
        for file in files {
            let dest = target.join(file);
            let parked = staging.join(format!("{file}.prev"));
            let previous = match fs::rename(&dest, &parked).await {
                Ok(()) => Some(parked),
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => {
                    warn!(error = %e, file = %file, "Batch commit failed, rolling back");
                    Self::roll_back(&moved).await;
                    return Err(e.into());
                }
            };
            if let Err(e) = fs::rename(staging.join(file), &dest).await {
                warn!(error = %e, file = %file, "Batch commit failed, rolling back");
                moved.push((dest, previous));
                Self::roll_back(&moved).await;
                return Err(e.into());
            }
            moved.push((dest, previous));
        }
        Ok(())
    }

    async fn roll_back(moved: &[(PathBuf, Option<PathBuf>)]) {
        for (dest, previous) in moved.iter().rev() {
            let restored = match previous {
                Some(parked) => fs::rename(parked, dest).await,
                None => match fs::remove_file(dest).await {
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            };
            if let Err(e) = restored {
                warn!(error = %e, path = %dest.display(), "Rollback step failed");
            }
        }
    }
}

fn unique_suffix() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!(
        "{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

#[async_trait]
impl CacheStorage for FsCacheStorage {
    async fn open(&self, name: &str) -> SwResult<()> {
        fs::create_dir_all(self.generation_dir(name)).await?;
        Ok(())
    }

    async fn has(&self, name: &str) -> SwResult<bool> {
        Ok(fs::try_exists(self.generation_dir(name)).await?)
    }

    async fn keys(&self) -> SwResult<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let file_name = item.file_name();
            let Some(encoded) = file_name.to_str() else {
                continue;
            };
            if encoded.starts_with('.') || !item.file_type().await?.is_dir() {
                continue;
            }
            match URL_SAFE_NO_PAD
                .decode(encoded)
                .ok()
                .and_then(|raw| String::from_utf8(raw).ok())
            {
                Some(name) => names.push(name),
                None => warn!(dir = encoded, "Skipping unrecognised cache directory"),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> SwResult<bool> {
        match fs::remove_dir_all(self.generation_dir(name)).await {
            Ok(()) => {
                debug!(cache = name, "Deleted cache generation");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn match_url(&self, name: &str, url: &Url) -> SwResult<Option<CacheEntry>> {
        let mut key = url.clone();
        key.set_fragment(None);
        let path = self
            .generation_dir(name)
            .join(Self::entry_file(key.as_str()));
        Self::read_entry(&path).await
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> SwResult<()> {
        let dir = self.generation_dir(name);
        fs::create_dir_all(&dir).await?;
        let path = Self::write_entry(&dir, &entry.stamp()).await?;
        trace!(cache = name, path = %path.display(), "Cache put");
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> SwResult<()> {
        let staging = self.staging_dir();
        fs::create_dir_all(&staging).await?;

        let result = async {
            // A repeated URL overwrites its staged file; the last one wins.
            let mut files = Vec::with_capacity(entries.len());
            let mut seen = HashSet::with_capacity(entries.len());
            for entry in entries {
                let entry = entry.stamp();
                Self::write_entry(&staging, &entry).await?;
                let file = Self::entry_file(&entry.url);
                if seen.insert(file.clone()) {
                    files.push(file);
                }
            }
            let target = self.generation_dir(name);
            fs::create_dir_all(&target).await?;
            Self::commit(&staging, &target, &files).await
        }
        .await;

        if let Err(e) = fs::remove_dir_all(&staging).await {
            warn!(error = %e, staging = %staging.display(), "Failed to remove staging directory");
        }
        result
    }

    async fn entry_urls(&self, name: &str) -> SwResult<Vec<String>> {
        let mut dir = match fs::read_dir(self.generation_dir(name)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut urls = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(entry) = Self::read_entry(&path).await? {
                urls.push(entry.url);
            }
        }
        urls.sort();
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livria_net::Response;

    fn entry(u: &str, body: &str) -> CacheEntry {
        CacheEntry::from_parts(
            &Url::parse(u).unwrap(),
            &Response::ok_with("text/plain", body.to_string()),
        )
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsCacheStorage::open_dir(dir.path()).await.unwrap();
        storage
            .put("livria-v1", entry("http://localhost/a.js", "alert(1)"))
            .await
            .unwrap();

        let reopened = FsCacheStorage::open_dir(dir.path()).await.unwrap();
        assert_eq!(reopened.keys().await.unwrap(), vec!["livria-v1".to_string()]);
        let hit = reopened
            .match_url("livria-v1", &Url::parse("http://localhost/a.js").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.body, Bytes::from_static(b"alert(1)"));
        assert_eq!(hit.to_response().unwrap().headers.get("content-type").unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn test_put_all_and_entry_urls() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsCacheStorage::open_dir(dir.path()).await.unwrap();
        storage
            .put_all(
                "livria-v1",
                vec![
                    entry("http://localhost/", "home"),
                    entry("http://localhost/offline.html", "offline"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(
            storage.entry_urls("livria-v1").await.unwrap(),
            vec![
                "http://localhost/".to_string(),
                "http://localhost/offline.html".to_string()
            ]
        );
        // Staging directories never show up as generations.
        assert_eq!(storage.keys().await.unwrap(), vec!["livria-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_generation() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsCacheStorage::open_dir(dir.path()).await.unwrap();
        storage.open("livria-v0").await.unwrap();

        assert!(storage.has("livria-v0").await.unwrap());
        assert!(storage.delete("livria-v0").await.unwrap());
        assert!(!storage.delete("livria-v0").await.unwrap());
        assert!(storage.entry_urls("livria-v0").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_to_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsCacheStorage::open_dir(dir.path()).await.unwrap();
        let profile = Url::parse("http://localhost:3000/profile").unwrap();

        for round in 0..25 {
            let writers: Vec<_> = (0..4)
                .map(|i| {
                    let storage = storage.clone();
                    let body = format!("round {round} writer {i}");
                    tokio::spawn(async move {
                        storage
                            .put("livria-v1", entry("http://localhost:3000/profile", &body))
                            .await
                    })
                })
                .collect();
            for writer in writers {
                writer.await.unwrap().unwrap();
            }

            let hit = storage.match_url("livria-v1", &profile).await.unwrap().unwrap();
            assert!(String::from_utf8_lossy(&hit.body).starts_with(&format!("round {round} ")));
        }

        assert_eq!(
            storage.entry_urls("livria-v1").await.unwrap(),
            vec!["http://localhost:3000/profile".to_string()]
        );
    }

    #[tokio::test]
    async fn test_put_all_with_repeated_url() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsCacheStorage::open_dir(dir.path()).await.unwrap();
        storage
            .put_all(
                "livria-v1",
                vec![
                    entry("http://localhost/", "first"),
                    entry("http://localhost/offline.html", "offline"),
                    entry("http://localhost/", "second"),
                ],
            )
            .await
            .unwrap();

        let home = storage
            .match_url("livria-v1", &Url::parse("http://localhost/").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(home.body, Bytes::from_static(b"second"));
        assert_eq!(storage.entry_urls("livria-v1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_commit_restores_replaced_entries() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsCacheStorage::open_dir(dir.path()).await.unwrap();
        storage
            .put("livria-v1", entry("http://localhost/", "installed"))
            .await
            .unwrap();

        let staging = storage.staging_dir();
        fs::create_dir_all(&staging).await.unwrap();
        FsCacheStorage::write_entry(&staging, &entry("http://localhost/", "replacement"))
            .await
            .unwrap();
        let files = vec![
            FsCacheStorage::entry_file("http://localhost/"),
            FsCacheStorage::entry_file("http://localhost/never-staged"),
        ];

        let target = storage.generation_dir("livria-v1");
        assert!(FsCacheStorage::commit(&staging, &target, &files).await.is_err());

        let home = storage
            .match_url("livria-v1", &Url::parse("http://localhost/").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(home.body, Bytes::from_static(b"installed"));
        assert_eq!(
            storage.entry_urls("livria-v1").await.unwrap(),
            vec!["http://localhost/".to_string()]
        );
    }
}
