//! Core types describing where a served response came from.

use chrono::{DateTime, Utc};

use crate::network::Response;

/// A response handed back to the requester, with metadata about its source.
#[derive(Debug, Clone)]
pub struct Served {
  /// The actual response
  pub response: Response,
  /// Where the response came from
  pub source: ResponseSource,
  /// When the response was stored (if from a store)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  /// Create a served response from a network fetch.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  /// Create a served response from a store hit.
  pub fn from_cache(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a served response standing in for a failed network fetch.
  pub fn offline(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ResponseSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh response from the network
  Network,
  /// Stored response served without touching the network
  Cache,
  /// Network unavailable, serving a stored fallback
  Offline,
}

impl std::fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ResponseSource::Network => write!(f, "network"),
      ResponseSource::Cache => write!(f, "cache"),
      ResponseSource::Offline => write!(f, "offline"),
    }
  }
}
