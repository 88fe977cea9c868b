//! Cache layer that orchestrates caching logic with network fetching.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::{CacheStorage, CachedResponse};
use super::traits::CacheResult;
use crate::http::{RequestKey, Response};

/// Cache layer bound to one named store of one origin.
///
/// Sits between the controller and the network, implementing the generic
/// network-first and cache-first strategies. Lookup and write failures are
/// logged and treated as misses so a strategy only fails when neither side
/// can answer.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  origin: String,
  name: String,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a cache layer over the store called `name` of `origin`.
  pub fn new(storage: Arc<S>, origin: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      storage,
      origin: origin.into(),
      name: name.into(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Create the backing store if it does not exist yet.
  pub fn open(&self) -> Result<()> {
    self.storage.open(&self.origin, &self.name)
  }

  /// Names of every store of this origin, including this one.
  pub fn store_names(&self) -> Result<Vec<String>> {
    self.storage.keys(&self.origin)
  }

  /// Delete another store of this origin.
  pub fn delete_store(&self, name: &str) -> Result<bool> {
    self.storage.delete(&self.origin, name)
  }

  /// Request keys held by this store.
  pub fn entries(&self) -> Result<Vec<RequestKey>> {
    self.storage.entries(&self.origin, &self.name)
  }

  /// Look up a cached response, treating storage errors as a miss.
  pub fn lookup(&self, key: &RequestKey) -> Option<CachedResponse> {
    match self.storage.match_request(&self.origin, &self.name, key) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(store = %self.name, %key, "Cache lookup failed: {e}");
        None
      }
    }
  }

  /// Write a response, propagating storage errors.
  pub fn put(&self, key: &RequestKey, response: &Response) -> Result<()> {
    self.storage.put(&self.origin, &self.name, key, response)
  }

  /// Store a successful response. Failures are logged and ignored.
  pub fn store(&self, key: &RequestKey, response: &Response) {
    if !response.is_success() {
      debug!(%key, status = response.status, "Not caching unsuccessful response");
      return;
    }
    if let Err(e) = self.put(key, response) {
      warn!(store = %self.name, %key, "Cache write failed: {e}");
    }
  }

  /// Fetch with a network-first strategy.
  ///
  /// 1. Try the network; on success optionally write the response back
  /// 2. On network failure, return the cached entry for `key` (offline mode)
  /// 3. Return `None` when neither is available
  pub async fn network_first<F, Fut>(
    &self,
    key: &RequestKey,
    write_back: bool,
    fetcher: F,
  ) -> Option<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    match fetcher().await {
      Ok(response) => {
        if write_back {
          self.store(key, &response);
        }
        Some(CacheResult::from_network(response))
      }
      Err(e) => {
        debug!(%key, "Network failed, trying cache: {e}");
        self
          .lookup(key)
          .map(|cached| CacheResult::offline(cached.response, cached.cached_at))
      }
    }
  }

  /// Fetch with a cache-first strategy.
  ///
  /// 1. Check cache - on a hit, return immediately
  /// 2. On a miss, fetch from network and write the result back
  /// 3. Return `None` when the network fails too
  pub async fn cache_first<F, Fut>(&self, key: &RequestKey, fetcher: F) -> Option<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    if let Some(cached) = self.lookup(key) {
      return Some(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    match fetcher().await {
      Ok(response) => {
        self.store(key, &response);
        Some(CacheResult::from_network(response))
      }
      Err(e) => {
        debug!(%key, "Not cached and network failed: {e}");
        None
      }
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      origin: self.origin.clone(),
      name: self.name.clone(),
    }
  }
}
