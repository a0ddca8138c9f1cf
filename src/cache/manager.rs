//! Population and garbage collection of the worker's named stores.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::info;
use url::Url;

use super::key::RequestKey;
use super::storage::CacheStorage;
use crate::config::CacheNames;
use crate::network::{CacheMode, Network, Request, Response};

/// Owns the precache and runtime stores across install and activate.
pub struct CacheStoreManager<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  names: CacheNames,
  origin: Url,
}

impl<S: CacheStorage, N: Network> CacheStoreManager<S, N> {
  pub fn new(storage: Arc<S>, network: Arc<N>, names: CacheNames, origin: Url) -> Self {
    Self {
      storage,
      network,
      names,
      origin,
    }
  }

  /// Fill the precache with the manifest, bypassing HTTP caches.
  ///
  /// Either every entry is fetched with a 2xx status and the precache is
  /// replaced as a whole, or nothing is written.
  pub async fn install(&self, manifest: &[String]) -> Result<usize> {
    info!("Precaching {} assets into {}", manifest.len(), self.names.precache);

    let entries = self.fetch_all(manifest, CacheMode::Reload).await?;
    self.storage.replace_all(&self.names.precache, &entries)?;

    Ok(entries.len())
  }

  /// Delete every store that is not one of the current two.
  ///
  /// Returns the names of the deleted stores.
  pub async fn activate(&self) -> Result<Vec<String>> {
    let mut removed = Vec::new();

    for name in self.storage.store_names()? {
      if self.names.is_current(&name) {
        continue;
      }

      info!("Deleting old cache: {}", name);
      if self.storage.delete_store(&name)? {
        removed.push(name);
      }
    }

    Ok(removed)
  }

  /// Fetch `urls` and add them to the runtime store, all or nothing.
  pub async fn cache_urls(&self, urls: &[String]) -> Result<usize> {
    let entries = self.fetch_all(urls, CacheMode::Default).await?;
    self.storage.put_all(&self.names.runtime, &entries)?;

    info!("Cached {} URLs into {}", entries.len(), self.names.runtime);
    Ok(entries.len())
  }

  /// Resolve a root-relative path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid asset URL '{}': {}", path, e))
  }

  async fn fetch_all(&self, urls: &[String], cache_mode: CacheMode) -> Result<Vec<(RequestKey, Response)>> {
    let requests = urls
      .iter()
      .map(|u| Ok(Request::get(self.resolve(u)?).with_cache_mode(cache_mode)))
      .collect::<Result<Vec<_>>>()?;

    let fetches = requests
      .iter()
      .map(|request| fetch_ok(self.network.as_ref(), request));

    try_join_all(fetches).await
  }
}

/// Fetch one request; anything but a 2xx status is an error.
async fn fetch_ok<N: Network>(network: &N, request: &Request) -> Result<(RequestKey, Response)> {
  let response = network.fetch(request).await?;
  if !response.is_ok() {
    return Err(eyre!(
      "Request for {} failed with status {}",
      request.url,
      response.status
    ));
  }
  Ok((RequestKey::from(request), response))
}

impl<S: CacheStorage, N: Network> Clone for CacheStoreManager<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      names: self.names.clone(),
      origin: self.origin.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStorage;
  use crate::network::testing::ScriptedNetwork;

  const ORIGIN: &str = "http://localhost:8080";

  fn setup() -> (CacheStoreManager<SqliteStorage, ScriptedNetwork>, Arc<SqliteStorage>, Arc<ScriptedNetwork>) {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(ScriptedNetwork::new());
    let manager = CacheStoreManager::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      CacheNames::default(),
      Url::parse(ORIGIN).unwrap(),
    );
    (manager, storage, network)
  }

  fn manifest(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| p.to_string()).collect()
  }

  fn key(path: &str) -> RequestKey {
    RequestKey::get(&Url::parse(ORIGIN).unwrap().join(path).unwrap())
  }

  #[tokio::test]
  async fn test_install_precaches_manifest_with_reload() {
    let (manager, storage, network) = setup();
    network.respond("http://localhost:8080/", 200, "root");
    network.respond("http://localhost:8080/index.html", 200, "index");

    let count = manager.install(&manifest(&["/", "/index.html"])).await.unwrap();

    assert_eq!(count, 2);
    assert_eq!(storage.entry_count("smart-parking-v1").unwrap(), 2);
    let entry = storage.match_in("smart-parking-v1", &key("/")).unwrap().unwrap();
    assert_eq!(entry.response.body, b"root");
    assert!(network
      .requests()
      .iter()
      .all(|r| r.cache_mode == CacheMode::Reload));
  }

  #[tokio::test]
  async fn test_install_fails_as_a_whole() {
    let (manager, storage, network) = setup();
    network.respond("http://localhost:8080/", 200, "root");
    network.respond("http://localhost:8080/main.dart.js", 404, "missing");

    let result = manager.install(&manifest(&["/", "/main.dart.js"])).await;

    assert!(result.is_err());
    assert_eq!(storage.entry_count("smart-parking-v1").unwrap(), 0);
  }

  #[tokio::test]
  async fn test_install_network_failure_keeps_previous_precache() {
    let (manager, storage, network) = setup();
    network.respond("http://localhost:8080/", 200, "v1");
    manager.install(&manifest(&["/"])).await.unwrap();

    network.fail("http://localhost:8080/");
    assert!(manager.install(&manifest(&["/"])).await.is_err());

    let entry = storage.match_in("smart-parking-v1", &key("/")).unwrap().unwrap();
    assert_eq!(entry.response.body, b"v1");
  }

  #[tokio::test]
  async fn test_reinstall_replaces_precache_wholesale() {
    let (manager, storage, network) = setup();
    network.respond("http://localhost:8080/", 200, "root");
    network.respond("http://localhost:8080/old.js", 200, "old");
    manager.install(&manifest(&["/", "/old.js"])).await.unwrap();

    manager.install(&manifest(&["/"])).await.unwrap();

    assert!(storage
      .match_in("smart-parking-v1", &key("/old.js"))
      .unwrap()
      .is_none());
    assert_eq!(storage.entry_count("smart-parking-v1").unwrap(), 1);
  }

  #[tokio::test]
  async fn test_activate_removes_only_stale_stores() {
    let (manager, storage, _network) = setup();
    for name in ["smart-parking-v0", "smart-parking-v1", "runtime-cache-v0", "runtime-cache-v1", "other"] {
      storage.open_store(name).unwrap();
    }

    let mut removed = manager.activate().await.unwrap();
    removed.sort();

    assert_eq!(removed, vec!["other", "runtime-cache-v0", "smart-parking-v0"]);
    assert_eq!(
      storage.store_names().unwrap(),
      vec!["smart-parking-v1", "runtime-cache-v1"]
    );
  }

  #[tokio::test]
  async fn test_activate_with_nothing_to_remove() {
    let (manager, _storage, _network) = setup();
    assert!(manager.activate().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_cache_urls_adds_to_runtime_store() {
    let (manager, storage, network) = setup();
    network.respond("http://localhost:8080/icons/Icon-512.png", 200, "icon");
    network.respond("https://fonts.googleapis.com/css2", 200, "css");

    let count = manager
      .cache_urls(&manifest(&["/icons/Icon-512.png", "https://fonts.googleapis.com/css2"]))
      .await
      .unwrap();

    assert_eq!(count, 2);
    assert_eq!(storage.entry_count("runtime-cache-v1").unwrap(), 2);
    assert!(network
      .requests()
      .iter()
      .all(|r| r.cache_mode == CacheMode::Default));
  }

  #[test]
  fn test_resolve() {
    let (manager, _storage, _network) = setup();
    assert_eq!(
      manager.resolve("/icons/Icon-192.png").unwrap().as_str(),
      "http://localhost:8080/icons/Icon-192.png"
    );
    assert_eq!(
      manager.resolve("https://other.example/x").unwrap().as_str(),
      "https://other.example/x"
    );
  }
}
