//! Core types describing where a served response came from.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from a cache hit served before trying the network.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// A cached copy of the designated offline page.
  pub fn offline_page(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::OfflinePage,
      cached_at: Some(cached_at),
    }
  }

  /// A response built locally because neither network nor cache could answer.
  pub fn synthesized(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Synthesized,
      cached_at: None,
    }
  }
}

/// Indicates where served data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Cache hit, network not consulted
  Cache,
  /// Network unavailable, serving the cached copy of this request
  Offline,
  /// Network unavailable, serving the cached offline page instead
  OfflinePage,
  /// Nothing available, placeholder built locally
  Synthesized,
}
