//! Request/response values and the network collaborator.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::Method;
use std::future::Future;
use url::Url;

/// How a request interacts with HTTP caches between the worker and the origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
  #[default]
  Default,
  /// Always fetch fresh bytes from the origin
  Reload,
}

/// An intercepted outgoing resource request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub cache_mode: CacheMode,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      cache_mode: CacheMode::Default,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
    self.cache_mode = cache_mode;
    self
  }

  /// Add a request header, sent as is to the network.
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub url: Url,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(url: Url, status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      url,
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// Any 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only plain 200 responses are copied into the runtime store.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// The network collaborator used by the fetch strategies.
///
/// A resolved future with a non-2xx status is still a successful fetch;
/// `Err` means the request never produced a response.
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// Network backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("pwa-worker/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    if request.cache_mode == CacheMode::Reload {
      builder = builder
        .header(CACHE_CONTROL, "no-cache")
        .header(PRAGMA, "no-cache");
    }

    let url = request.url.clone();

    async move {
      let response = builder
        .send()
        .await
        .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

      let status = response.status().as_u16();
      let final_url = response.url().clone();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?
        .to_vec();

      Ok(Response {
        url: final_url,
        status,
        headers,
        body,
      })
    }
  }
}
