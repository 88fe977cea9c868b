//! Test doubles shared by the unit tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::{CacheStorage, CachedResponse, SqliteStorage};
use crate::config::Config;
use crate::controller::OfflineController;
use crate::http::{Request, RequestKey, Response};
use crate::network::Network;

pub fn origin_url(path: &str) -> Url {
  Config::default().resolve(path).unwrap()
}

/// In-process network with a switchable connection.
///
/// Known URLs answer with their registered response, unknown ones with 404.
/// Clones share state, so a test can keep a handle after giving one away.
#[derive(Clone, Default)]
pub struct FakeNetwork {
  inner: Arc<FakeInner>,
}

#[derive(Default)]
struct FakeInner {
  offline: AtomicBool,
  requests: AtomicUsize,
  routes: Mutex<HashMap<String, Response>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_page(self, path: &str, body: &str) -> Self {
    self.serve(path, Response::new(200, body).with_header("Content-Type", "text/html"));
    self
  }

  pub fn with_json(self, path: &str, body: &str) -> Self {
    self.serve(
      path,
      Response::new(200, body).with_header("Content-Type", "application/json"),
    );
    self
  }

  pub fn serve(&self, path: &str, response: Response) {
    self.serve_url(origin_url(path), response);
  }

  /// Register a response for an absolute URL on any origin.
  pub fn serve_url(&self, url: Url, response: Response) {
    self.inner.routes.lock().unwrap().insert(url.to_string(), response);
  }

  pub fn set_online(&self, online: bool) {
    self.inner.offline.store(!online, Ordering::SeqCst);
  }

  /// Number of requests that reached the network while online.
  pub fn request_count(&self) -> usize {
    self.inner.requests.load(Ordering::SeqCst)
  }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    if self.inner.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to fetch {}: network unreachable", request.url));
    }
    self.inner.requests.fetch_add(1, Ordering::SeqCst);

    let routes = self.inner.routes.lock().unwrap();
    Ok(
      routes
        .get(request.url.as_str())
        .cloned()
        .unwrap_or_else(|| Response::new(404, "")),
    )
  }
}

/// Storage whose reads and writes always fail, as with a full or corrupt disk.
pub struct FailingStorage;

impl CacheStorage for FailingStorage {
  fn open(&self, _origin: &str, _name: &str) -> Result<()> {
    Ok(())
  }

  fn match_request(
    &self,
    _origin: &str,
    _name: &str,
    key: &RequestKey,
  ) -> Result<Option<CachedResponse>> {
    Err(eyre!("Failed to read {key}: disk I/O error"))
  }

  fn put(&self, _origin: &str, _name: &str, key: &RequestKey, _response: &Response) -> Result<()> {
    Err(eyre!("Failed to write {key}: database or disk is full"))
  }

  fn delete(&self, _origin: &str, _name: &str) -> Result<bool> {
    Ok(false)
  }

  fn keys(&self, _origin: &str) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn entries(&self, _origin: &str, _name: &str) -> Result<Vec<RequestKey>> {
    Ok(Vec::new())
  }
}

pub fn controller(network: FakeNetwork) -> OfflineController<SqliteStorage, FakeNetwork> {
  controller_with(Config::default(), network)
}

pub fn controller_with(
  config: Config,
  network: FakeNetwork,
) -> OfflineController<SqliteStorage, FakeNetwork> {
  let storage = Arc::new(SqliteStorage::in_memory().unwrap());
  OfflineController::new(config, storage, Arc::new(network)).unwrap()
}
