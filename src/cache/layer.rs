//! Cache layer that orchestrates store lookups with network fetching.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::key::RequestKey;
use super::storage::CacheStorage;
use super::traits::Served;
use crate::event::WaitUntil;
use crate::network::{Network, Request, Response};

/// Cache layer that implements the two fetch strategies.
///
/// This layer sits between intercepted requests and the network,
/// providing transparent caching with offline support.
pub struct CacheLayer<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  /// Store that receives copies of successful static responses
  runtime_store: String,
  /// Document served when a static asset cannot be fetched at all
  offline_fallback: Url,
  /// Refresh store hits from the network in the background
  refresh_on_hit: bool,
}

impl<S: CacheStorage, N: Network> CacheLayer<S, N> {
  pub fn new(storage: Arc<S>, network: Arc<N>, runtime_store: &str, offline_fallback: Url) -> Self {
    Self {
      storage,
      network,
      runtime_store: runtime_store.to_string(),
      offline_fallback,
      refresh_on_hit: false,
    }
  }

  pub fn with_refresh_on_hit(mut self, refresh_on_hit: bool) -> Self {
    self.refresh_on_hit = refresh_on_hit;
    self
  }

  /// Fetch with network-first strategy.
  ///
  /// 1. Try the network - any response (even non-2xx) is returned as is
  /// 2. On network failure, return a stored match from any store
  /// 3. With no stored match, the network failure propagates
  pub async fn network_first(&self, request: &Request) -> Result<Served> {
    let network_err = match self.network.fetch(request).await {
      Ok(response) => return Ok(Served::from_network(response)),
      Err(e) => e,
    };

    let key = RequestKey::from(request);
    match self.storage.match_any(&key) {
      Ok(Some(entry)) => {
        debug!("Network failed for {}, serving from {}", key.url(), entry.store);
        Ok(Served::offline(entry.response, entry.cached_at))
      }
      Ok(None) => {
        debug!("Network failed for {} with nothing stored: {}", key.url(), network_err);
        Err(network_err)
      }
      Err(e) => {
        warn!("Store lookup failed for {}: {}", key.url(), e);
        Err(network_err)
      }
    }
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Return a stored match from any store, without touching the network
  /// 2. On a miss, fetch from the network; a 200 response is copied into
  ///    the runtime store in the background before being returned
  /// 3. If the network fails too, serve the offline fallback document
  /// 4. With no fallback stored, the network failure propagates
  pub async fn cache_first(&self, request: &Request, lifetime: &WaitUntil) -> Result<Served> {
    let key = RequestKey::from(request);

    match self.storage.match_any(&key) {
      Ok(Some(entry)) => {
        if self.refresh_on_hit {
          lifetime.wait_until(self.refresh(request.clone(), key));
        }
        return Ok(Served::from_cache(entry.response, entry.cached_at));
      }
      Ok(None) => {}
      Err(e) => warn!("Store lookup failed for {}, going to network: {}", key.url(), e),
    }

    let network_err = match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_cacheable() {
          lifetime.wait_until(self.store_copy(key, response.clone()));
        }
        return Ok(Served::from_network(response));
      }
      Err(e) => e,
    };

    debug!(
      "Fetch failed for {}, serving {} if available: {}",
      key.url(),
      self.offline_fallback,
      network_err
    );

    match self.storage.match_any(&RequestKey::get(&self.offline_fallback)) {
      Ok(Some(entry)) => Ok(Served::offline(entry.response, entry.cached_at)),
      Ok(None) => Err(network_err),
      Err(e) => {
        warn!("Offline fallback lookup failed: {}", e);
        Err(network_err)
      }
    }
  }

  /// Background write of a network response into the runtime store.
  /// Failures are logged and dropped; the response is already on its way.
  fn store_copy(&self, key: RequestKey, response: Response) -> impl Future<Output = ()> + Send + 'static {
    let storage = Arc::clone(&self.storage);
    let store = self.runtime_store.clone();

    async move {
      if let Err(e) = storage.put(&store, &key, &response) {
        warn!("Failed to store {} in {}: {}", key.url(), store, e);
      }
    }
  }

  /// Background network refresh of a store hit.
  fn refresh(&self, request: Request, key: RequestKey) -> impl Future<Output = ()> + Send + 'static {
    let storage = Arc::clone(&self.storage);
    let network = Arc::clone(&self.network);
    let store = self.runtime_store.clone();

    async move {
      match network.fetch(&request).await {
        Ok(response) if response.is_cacheable() => {
          if let Err(e) = storage.put(&store, &key, &response) {
            warn!("Failed to refresh {} in {}: {}", key.url(), store, e);
          }
        }
        Ok(response) => debug!(
          "Not refreshing {}: status {}",
          key.url(),
          response.status
        ),
        Err(e) => warn!("Background update failed for {}: {}", key.url(), e),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStorage;
  use crate::cache::traits::ResponseSource;
  use crate::network::testing::ScriptedNetwork;

  const RUNTIME: &str = "runtime-cache-v1";

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn setup() -> (CacheLayer<SqliteStorage, ScriptedNetwork>, Arc<SqliteStorage>, Arc<ScriptedNetwork>) {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(ScriptedNetwork::new());
    let layer = CacheLayer::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      RUNTIME,
      url("http://localhost:8080/index.html"),
    );
    (layer, storage, network)
  }

  fn seed(storage: &SqliteStorage, store: &str, u: &str, body: &str) {
    storage
      .put(store, &RequestKey::get(&url(u)), &Response::new(url(u), 200, body))
      .unwrap();
  }

  #[tokio::test]
  async fn test_network_first_returns_network_response() {
    let (layer, storage, network) = setup();
    seed(&storage, RUNTIME, "http://localhost:8080/api/spots", "stale");
    network.respond("http://localhost:8080/api/spots", 200, "fresh");

    let served = layer
      .network_first(&Request::get(url("http://localhost:8080/api/spots")))
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.body, b"fresh");
  }

  #[tokio::test]
  async fn test_network_first_keeps_error_statuses() {
    let (layer, storage, network) = setup();
    seed(&storage, RUNTIME, "http://localhost:8080/api/spots", "stale");
    network.respond("http://localhost:8080/api/spots", 503, "busy");

    let served = layer
      .network_first(&Request::get(url("http://localhost:8080/api/spots")))
      .await
      .unwrap();

    assert_eq!(served.response.status, 503);
    assert_eq!(served.source, ResponseSource::Network);
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_store() {
    let (layer, storage, network) = setup();
    seed(&storage, "smart-parking-v1", "http://localhost:8080/api/spots", "stored");
    network.fail("http://localhost:8080/api/spots");

    let served = layer
      .network_first(&Request::get(url("http://localhost:8080/api/spots")))
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Offline);
    assert_eq!(served.response.body, b"stored");
    assert!(served.cached_at.is_some());
  }

  #[tokio::test]
  async fn test_network_first_propagates_failure_without_fallback() {
    let (layer, _storage, network) = setup();
    network.fail("http://localhost:8080/api/spots");

    let result = layer
      .network_first(&Request::get(url("http://localhost:8080/api/spots")))
      .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("network unreachable"));
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_network() {
    let (layer, storage, network) = setup();
    seed(&storage, "smart-parking-v1", "http://localhost:8080/main.dart.js", "bundle");
    let lifetime = WaitUntil::new();

    let served = layer
      .cache_first(&Request::get(url("http://localhost:8080/main.dart.js")), &lifetime)
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"bundle");
    assert_eq!(network.total_calls(), 0);
    assert_eq!(lifetime.pending(), 0);
  }

  #[tokio::test]
  async fn test_cache_first_miss_stores_copy_once() {
    let (layer, storage, network) = setup();
    network.respond("http://localhost:8080/logo.png", 200, "png");
    let request = Request::get(url("http://localhost:8080/logo.png"));

    let lifetime = WaitUntil::new();
    let served = layer.cache_first(&request, &lifetime).await.unwrap();
    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(lifetime.pending(), 1);
    lifetime.settle().await;

    let stored = storage
      .match_in(RUNTIME, &RequestKey::from(&request))
      .unwrap()
      .unwrap();
    assert_eq!(stored.response.body, b"png");

    let lifetime = WaitUntil::new();
    let again = layer.cache_first(&request, &lifetime).await.unwrap();
    assert_eq!(again.source, ResponseSource::Cache);
    assert_eq!(network.calls_to("http://localhost:8080/logo.png"), 1);
    assert_eq!(storage.entry_count(RUNTIME).unwrap(), 1);
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_non_200() {
    let (layer, storage, network) = setup();
    network.respond("http://localhost:8080/missing.png", 404, "nope");

    let lifetime = WaitUntil::new();
    let served = layer
      .cache_first(&Request::get(url("http://localhost:8080/missing.png")), &lifetime)
      .await
      .unwrap();
    lifetime.settle().await;

    assert_eq!(served.response.status, 404);
    assert_eq!(storage.entry_count(RUNTIME).unwrap(), 0);
  }

  #[tokio::test]
  async fn test_cache_first_offline_serves_root_document() {
    let (layer, storage, network) = setup();
    seed(&storage, "smart-parking-v1", "http://localhost:8080/index.html", "<html>");
    network.fail("http://localhost:8080/parking/42");

    let lifetime = WaitUntil::new();
    let served = layer
      .cache_first(&Request::get(url("http://localhost:8080/parking/42")), &lifetime)
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Offline);
    assert_eq!(served.response.body, b"<html>");
  }

  #[tokio::test]
  async fn test_cache_first_offline_without_fallback_is_error() {
    let (layer, _storage, network) = setup();
    network.fail("http://localhost:8080/parking/42");

    let lifetime = WaitUntil::new();
    let result = layer
      .cache_first(&Request::get(url("http://localhost:8080/parking/42")), &lifetime)
      .await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_refresh_on_hit_updates_runtime_store() {
    let (layer, storage, network) = setup();
    let layer = layer.with_refresh_on_hit(true);
    seed(&storage, RUNTIME, "http://localhost:8080/style.css", "old");
    network.respond("http://localhost:8080/style.css", 200, "new");
    let request = Request::get(url("http://localhost:8080/style.css"));

    let lifetime = WaitUntil::new();
    let served = layer.cache_first(&request, &lifetime).await.unwrap();
    assert_eq!(served.response.body, b"old");
    lifetime.settle().await;

    let stored = storage
      .match_in(RUNTIME, &RequestKey::from(&request))
      .unwrap()
      .unwrap();
    assert_eq!(stored.response.body, b"new");
  }

  #[tokio::test]
  async fn test_refresh_failure_is_dropped() {
    let (layer, storage, network) = setup();
    let layer = layer.with_refresh_on_hit(true);
    seed(&storage, RUNTIME, "http://localhost:8080/style.css", "old");
    network.fail("http://localhost:8080/style.css");
    let request = Request::get(url("http://localhost:8080/style.css"));

    let lifetime = WaitUntil::new();
    let served = layer.cache_first(&request, &lifetime).await.unwrap();
    lifetime.settle().await;

    assert_eq!(served.response.body, b"old");
    let stored = storage
      .match_in(RUNTIME, &RequestKey::from(&request))
      .unwrap()
      .unwrap();
    assert_eq!(stored.response.body, b"old");
  }
}
