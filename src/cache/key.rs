//! Request identity used to address stored responses.

use sha2::{Digest, Sha256};
use url::Url;

use crate::network::Request;

/// Identity of a request inside a named store: method plus URL.
///
/// The fragment is not part of the identity, so `/page#a` and `/page#b`
/// share an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);

    Self {
      method: method.to_ascii_uppercase(),
      url: url.to_string(),
    }
  }

  pub fn get(url: &Url) -> Self {
    Self::new("GET", url)
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// SHA256 of the identity, for stable fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl From<&Request> for RequestKey {
  fn from(request: &Request) -> Self {
    Self::new(request.method.as_str(), &request.url)
  }
}
