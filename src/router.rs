//! Request classification and strategy selection for intercepted fetches.

use color_eyre::Result;
use reqwest::Method;
use tracing::debug;
use url::Url;

use crate::cache::{CacheLayer, CacheStorage, Served};
use crate::config::RoutingConfig;
use crate::event::WaitUntil;
use crate::network::{Network, Request};

/// What kind of resource a request targets. Every request falls in exactly one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Same-origin asset
  Static,
  /// API endpoint or push provider host
  Dynamic,
  /// Cross-origin host on the allow list
  AllowedCrossOrigin,
  /// Non-GET, bypassed host, or cross-origin host not on the allow list
  Bypass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Not intercepted; the request goes to the network untouched
  Passthrough,
  NetworkFirst,
  CacheFirst,
}

impl RequestClass {
  pub fn strategy(self) -> Strategy {
    match self {
      RequestClass::Bypass => Strategy::Passthrough,
      RequestClass::Dynamic => Strategy::NetworkFirst,
      RequestClass::Static | RequestClass::AllowedCrossOrigin => Strategy::CacheFirst,
    }
  }
}

/// Pure classifier derived from the worker origin and routing rules.
#[derive(Debug, Clone)]
pub struct Classifier {
  origin: Url,
  rules: RoutingConfig,
}

impl Classifier {
  pub fn new(origin: Url, rules: RoutingConfig) -> Self {
    Self { origin, rules }
  }

  pub fn classify(&self, method: &Method, url: &Url) -> RequestClass {
    if *method != Method::GET {
      return RequestClass::Bypass;
    }

    let host = url.host_str().unwrap_or_default();
    if matches_any(host, &self.rules.bypass_hosts) {
      return RequestClass::Bypass;
    }

    let same_origin = url.origin() == self.origin.origin();
    if !same_origin && !matches_any(host, &self.rules.allowed_cross_origin_hosts) {
      return RequestClass::Bypass;
    }

    let api_path = self
      .rules
      .api_markers
      .iter()
      .any(|marker| url.path().contains(marker.as_str()));

    if api_path || matches_any(host, &self.rules.network_first_hosts) {
      RequestClass::Dynamic
    } else if same_origin {
      RequestClass::Static
    } else {
      RequestClass::AllowedCrossOrigin
    }
  }
}

fn matches_any(host: &str, fragments: &[String]) -> bool {
  !host.is_empty() && fragments.iter().any(|f| host.contains(f.as_str()))
}

/// Result of handling an intercepted fetch
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// The worker did not intercept; the host performs the request itself
  Passthrough,
  Responded(Served),
}

/// Picks one strategy per request and runs it.
pub struct CacheRouter<S: CacheStorage, N: Network> {
  classifier: Classifier,
  layer: CacheLayer<S, N>,
}

impl<S: CacheStorage, N: Network> CacheRouter<S, N> {
  pub fn new(classifier: Classifier, layer: CacheLayer<S, N>) -> Self {
    Self { classifier, layer }
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    self.classifier.classify(&request.method, &request.url)
  }

  /// Handle one intercepted request.
  ///
  /// `Err` is the network failure surfaced to the requester when no stored
  /// fallback applies.
  pub async fn handle(&self, request: &Request, lifetime: &WaitUntil) -> Result<FetchOutcome> {
    let class = self.classify(request);
    let strategy = class.strategy();
    debug!("{} {} -> {:?} ({:?})", request.method, request.url, class, strategy);

    let served = match strategy {
      Strategy::Passthrough => return Ok(FetchOutcome::Passthrough),
      Strategy::NetworkFirst => self.layer.network_first(request).await?,
      Strategy::CacheFirst => self.layer.cache_first(request, lifetime).await?,
    };

    Ok(FetchOutcome::Responded(served))
  }
}
